// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! HTTP API.
//!
//! | Route | Auth |
//! |---|---|
//! | `POST /api/v1/deployments`, `GET /api/v1/deployments` | bearer |
//! | `GET`, `PATCH`, `DELETE /api/v1/deployments/{name}` | bearer |
//! | `GET /api/v1/status` | bearer |
//! | `GET /health/liveness`, `/health/readiness`, `/health/startup` | none |
//! | `GET /metrics`, `/openapi.json`, `/docs` | none |
//!
//! Errors are rendered as `{"error": <kind>, "message": <text>}`. Every route answers
//! CORS preflights for the configured origins.

pub mod auth;
pub mod cors;
pub mod error;
pub mod handlers;
pub mod health;
pub mod openapi;

use crate::constants::DEFAULT_CORS_ORIGINS;
use crate::reconcilers::Reconciler;
use axum::routing::get;
use axum::{middleware, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    token_digest: Arc<[u8; 32]>,
    started: Arc<AtomicBool>,
    cors_origins: Arc<[String]>,
}

impl AppState {
    #[must_use]
    pub fn new(reconciler: Arc<Reconciler>, secret_key: &str) -> Self {
        Self {
            reconciler,
            token_digest: Arc::new(auth::token_digest(secret_key)),
            started: Arc::new(AtomicBool::new(false)),
            cors_origins: Arc::from([DEFAULT_CORS_ORIGINS.to_string()]),
        }
    }

    /// Restrict browser access to `origins` (`*` allows any).
    #[must_use]
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins.into();
        self
    }

    /// Flip the start-up probe to healthy.
    pub fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub(crate) fn token_digest(&self) -> &[u8; 32] {
        &self.token_digest
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route(
            "/api/v1/deployments",
            get(handlers::list_deployments).post(handlers::create_deployment),
        )
        .route(
            "/api/v1/deployments/{name}",
            get(handlers::get_deployment)
                .patch(handlers::update_deployment)
                .delete(handlers::delete_deployment),
        )
        .route("/api/v1/status", get(handlers::service_status))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    let public = Router::new()
        .route("/health/liveness", get(health::liveness))
        .route("/health/readiness", get(health::readiness))
        .route("/health/startup", get(health::startup))
        .route("/metrics", get(health::prometheus_metrics))
        .route("/openapi.json", get(openapi::openapi_json))
        .route("/docs", get(openapi::docs));

    let cors = cors::cors_layer(&state.cors_origins);
    authenticated
        .merge(public)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
