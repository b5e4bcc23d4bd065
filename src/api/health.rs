// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unauthenticated probe and metrics endpoints.

use super::AppState;
use crate::metrics;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

/// Probe answer.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProbeStatus {
    #[schema(example = "ok")]
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn probe(status: StatusCode, label: &'static str, message: Option<String>) -> Response {
    (
        status,
        Json(ProbeStatus {
            status: label,
            message,
        }),
    )
        .into_response()
}

/// The process is running.
#[utoipa::path(
    get,
    path = "/health/liveness",
    tag = "Health",
    responses((status = 200, description = "Alive", body = ProbeStatus))
)]
pub async fn liveness() -> Response {
    probe(StatusCode::OK, "ok", None)
}

/// The Kubernetes API answers.
#[utoipa::path(
    get,
    path = "/health/readiness",
    tag = "Health",
    responses(
        (status = 200, description = "Ready", body = ProbeStatus),
        (status = 503, description = "Kubernetes unreachable", body = ProbeStatus),
    )
)]
pub async fn readiness(State(state): State<AppState>) -> Response {
    match state.reconciler.helm().ping().await {
        Ok(()) => probe(StatusCode::OK, "ready", None),
        Err(e) => {
            warn!(error = %e, "Readiness probe failed");
            probe(
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                Some(e.to_string()),
            )
        }
    }
}

/// Start-up adoption of existing releases has completed.
#[utoipa::path(
    get,
    path = "/health/startup",
    tag = "Health",
    responses(
        (status = 200, description = "Started", body = ProbeStatus),
        (status = 503, description = "Still starting", body = ProbeStatus),
    )
)]
pub async fn startup(State(state): State<AppState>) -> Response {
    if state.is_started() {
        probe(StatusCode::OK, "started", None)
    } else {
        probe(StatusCode::SERVICE_UNAVAILABLE, "starting", None)
    }
}

/// Prometheus metrics in text exposition format.
pub async fn prometheus_metrics() -> Response {
    match metrics::gather_metrics() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
