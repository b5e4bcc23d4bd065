// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Airflow connection management.
//!
//! Every dbt API server is registered in Airflow as an `http` connection whose id is
//! the deployment's connection id. DAGs look the server up by that id and call its
//! `/invocations` endpoint with the stored basic-auth credentials.
//!
//! Both operations are idempotent:
//!
//! - `create_connection` updates the connection when it already exists.
//! - `delete_connection` treats a missing connection as already deleted.
//!
//! Rate limiting, 5xx answers and transport failures are retried with
//! [`http_backoff`]; any other 4xx fails immediately.

use crate::config::Config;
use crate::constants::AIRFLOW_REQUEST_TIMEOUT_SECS;
use crate::errors::{ProvisionError, Result};
use crate::http_errors::{map_airflow_status, map_transport_error};
use crate::metrics;
use crate::reconcilers::retry::{http_backoff, is_retryable_http_status, retry_with_backoff};
use crate::types::Credentials;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

/// Registers dbt API servers with the workflow orchestrator.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Create the connection, or update it in place when it already exists.
    async fn create_connection(
        &self,
        connection_id: &str,
        target_url: &str,
        credentials: &Credentials,
    ) -> Result<()>;

    /// Delete the connection. Deleting an unknown connection succeeds.
    async fn delete_connection(&self, connection_id: &str) -> Result<()>;
}

/// Connection body accepted by `POST` and `PATCH /api/v1/connections`.
#[derive(Debug, Serialize)]
struct ConnectionBody<'a> {
    conn_type: &'static str,
    connection_id: &'a str,
    description: String,
    host: &'a str,
    login: &'a str,
    password: &'a str,
    port: Option<u16>,
    schema: &'static str,
    extra: &'static str,
}

/// Failure of a single Airflow call.
#[derive(Debug, Error)]
enum CallError {
    /// Airflow answered with an unexpected status
    #[error("HTTP {status}: {message}")]
    Status { status: StatusCode, message: String },
    /// No response was received
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl CallError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => is_retryable_http_status(*status),
            Self::Transport(e) => !e.is_builder(),
        }
    }

    fn into_connection_error(self, connection_id: &str) -> ProvisionError {
        let (reason, message) = match &self {
            Self::Status { status, .. } => map_airflow_status(status.as_u16()),
            Self::Transport(_) => map_transport_error(),
        };
        ProvisionError::ConnectionError {
            connection_id: connection_id.to_string(),
            reason: format!("{reason}: {message} ({self})"),
        }
    }
}

/// [`ConnectionManager`] talking to the Airflow stable REST API with basic auth.
#[derive(Clone)]
pub struct AirflowClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl AirflowClient {
    /// # Errors
    ///
    /// Returns [`ProvisionError::Internal`] when the HTTP client cannot be built.
    pub fn new(
        base_url: &Url,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(AIRFLOW_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(ProvisionError::internal)?;

        let base_url = base_url.as_str().trim_end_matches('/').to_string();
        info!(base_url = %base_url, "Initialized Airflow client");

        Ok(Self {
            http,
            base_url,
            username: username.into(),
            password: password.into(),
        })
    }

    /// # Errors
    ///
    /// Returns [`ProvisionError::Internal`] when the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.airflow_url,
            config.airflow_user.clone(),
            config.airflow_password.clone(),
        )
    }

    fn connections_url(&self) -> String {
        format!("{}/api/v1/connections", self.base_url)
    }

    fn connection_url(&self, connection_id: &str) -> String {
        format!("{}/{connection_id}", self.connections_url())
    }

    /// Send one request. Success statuses and `accepted` come back as `Ok`.
    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&ConnectionBody<'_>>,
        accepted: &[StatusCode],
    ) -> std::result::Result<StatusCode, CallError> {
        debug!(method = %method, url = %url, "Airflow API request");

        let mut request = self
            .http
            .request(method.clone(), url)
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() || accepted.contains(&status) {
            return Ok(status);
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
        error!(
            method = %method,
            url = %url,
            status = %status,
            body = %message,
            "Airflow API request failed"
        );
        Err(CallError::Status { status, message })
    }

    async fn send_with_retry(
        &self,
        operation_name: &str,
        method: Method,
        url: &str,
        body: Option<&ConnectionBody<'_>>,
        accepted: &[StatusCode],
    ) -> std::result::Result<StatusCode, CallError> {
        retry_with_backoff(http_backoff(), operation_name, CallError::is_retryable, || {
            self.send(method.clone(), url, body, accepted)
        })
        .await
    }
}

#[async_trait]
impl ConnectionManager for AirflowClient {
    async fn create_connection(
        &self,
        connection_id: &str,
        target_url: &str,
        credentials: &Credentials,
    ) -> Result<()> {
        let body = ConnectionBody {
            conn_type: "http",
            connection_id,
            description: format!("dbt API server {connection_id}"),
            host: target_url,
            login: &credentials.user,
            password: &credentials.password,
            port: None,
            schema: "",
            extra: "",
        };
        let url = self.connection_url(connection_id);

        let existing = self
            .send_with_retry(
                "get airflow connection",
                Method::GET,
                &url,
                None,
                &[StatusCode::NOT_FOUND],
            )
            .await
            .map_err(|e| e.into_connection_error(connection_id))?;

        if existing == StatusCode::NOT_FOUND {
            info!(connection_id = %connection_id, host = %target_url, "Creating Airflow connection");
            self.send_with_retry(
                "create airflow connection",
                Method::POST,
                &self.connections_url(),
                Some(&body),
                &[],
            )
            .await
            .map_err(|e| e.into_connection_error(connection_id))?;
            metrics::record_resource_created("connection");
        } else {
            info!(connection_id = %connection_id, host = %target_url, "Updating existing Airflow connection");
            self.send_with_retry(
                "update airflow connection",
                Method::PATCH,
                &url,
                Some(&body),
                &[],
            )
            .await
            .map_err(|e| e.into_connection_error(connection_id))?;
        }

        Ok(())
    }

    async fn delete_connection(&self, connection_id: &str) -> Result<()> {
        let status = self
            .send_with_retry(
                "delete airflow connection",
                Method::DELETE,
                &self.connection_url(connection_id),
                None,
                &[StatusCode::NOT_FOUND],
            )
            .await
            .map_err(|e| e.into_connection_error(connection_id))?;

        if status == StatusCode::NOT_FOUND {
            debug!(connection_id = %connection_id, "Airflow connection already deleted");
        } else {
            info!(connection_id = %connection_id, "Deleted Airflow connection");
            metrics::record_resource_deleted("connection");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "airflow_mock.rs"]
pub(crate) mod mock;

#[cfg(test)]
#[path = "airflow_tests.rs"]
mod airflow_tests;
