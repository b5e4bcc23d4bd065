// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Deployment endpoints.
//!
//! Mutating calls only admit work and answer `201`/`202` right away; clients follow
//! progress with `GET /api/v1/deployments/{name}`.

use super::error::ErrorBody;
use super::AppState;
use crate::constants::SERVICE_NAME;
use crate::errors::{ProvisionError, Result};
use crate::types::{DeploymentRecord, DeploymentRequest, DeploymentUpdate, Phase};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Filter of `GET /api/v1/deployments`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Only return deployments in this phase
    pub phase: Option<Phase>,
}

/// Answer of `GET /api/v1/status`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ServiceStatus {
    #[schema(example = "dbt-provisioner")]
    pub service: String,
    pub version: String,
    /// Namespace dbt servers are deployed into
    pub namespace: String,
    /// Number of known deployments
    pub deployments: usize,
}

fn bad_body(rejection: &JsonRejection) -> ProvisionError {
    ProvisionError::invalid(rejection.body_text())
}

/// Provision a dbt API server.
#[utoipa::path(
    post,
    path = "/api/v1/deployments",
    tag = "Deployments",
    request_body = DeploymentRequest,
    security(("bearer" = [])),
    responses(
        (status = 201, description = "Deployment accepted", body = DeploymentRecord),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 409, description = "A live deployment holds the name", body = ErrorBody),
        (status = 422, description = "Invalid request", body = ErrorBody),
    )
)]
pub async fn create_deployment(
    State(state): State<AppState>,
    payload: std::result::Result<Json<DeploymentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DeploymentRecord>)> {
    let Json(request) = payload.map_err(|e| bad_body(&e))?;
    let record = state.reconciler.submit(request).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// List deployments.
#[utoipa::path(
    get,
    path = "/api/v1/deployments",
    tag = "Deployments",
    params(ListQuery),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Every known deployment", body = [DeploymentRecord]),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 422, description = "Unknown phase", body = ErrorBody),
    )
)]
pub async fn list_deployments(
    State(state): State<AppState>,
    query: std::result::Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<DeploymentRecord>>> {
    let Query(query) = query.map_err(|e| ProvisionError::invalid(e.body_text()))?;
    Ok(Json(state.reconciler.list(query.phase).await))
}

/// Read one deployment.
#[utoipa::path(
    get,
    path = "/api/v1/deployments/{name}",
    tag = "Deployments",
    params(("name" = String, Path, description = "Release name")),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Deployment", body = DeploymentRecord),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 404, description = "Unknown deployment", body = ErrorBody),
    )
)]
pub async fn get_deployment(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<DeploymentRecord>> {
    Ok(Json(state.reconciler.get(&name).await?))
}

/// Upgrade a deployment with a new image tag or server settings.
#[utoipa::path(
    patch,
    path = "/api/v1/deployments/{name}",
    tag = "Deployments",
    params(("name" = String, Path, description = "Release name")),
    request_body = DeploymentUpdate,
    security(("bearer" = [])),
    responses(
        (status = 202, description = "Update accepted", body = DeploymentRecord),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 404, description = "Unknown deployment", body = ErrorBody),
        (status = 409, description = "Deployment busy", body = ErrorBody),
        (status = 422, description = "Invalid update", body = ErrorBody),
    )
)]
pub async fn update_deployment(
    State(state): State<AppState>,
    Path(name): Path<String>,
    payload: std::result::Result<Json<DeploymentUpdate>, JsonRejection>,
) -> Result<(StatusCode, Json<DeploymentRecord>)> {
    let Json(update) = payload.map_err(|e| bad_body(&e))?;
    let record = state.reconciler.update(&name, update).await?;
    Ok((StatusCode::ACCEPTED, Json(record)))
}

/// Tear a deployment down: connection first, then the release and its volumes.
#[utoipa::path(
    delete,
    path = "/api/v1/deployments/{name}",
    tag = "Deployments",
    params(("name" = String, Path, description = "Release name")),
    security(("bearer" = [])),
    responses(
        (status = 202, description = "Deletion accepted", body = DeploymentRecord),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 404, description = "Unknown deployment", body = ErrorBody),
    )
)]
pub async fn delete_deployment(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<DeploymentRecord>)> {
    let record = state.reconciler.delete(&name).await?;
    Ok((StatusCode::ACCEPTED, Json(record)))
}

/// Service identity.
#[utoipa::path(
    get,
    path = "/api/v1/status",
    tag = "Service",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Service status", body = ServiceStatus),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
    )
)]
pub async fn service_status(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(ServiceStatus {
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        namespace: state.reconciler.namespace().to_string(),
        deployments: state.reconciler.list(None).await.len(),
    })
}
