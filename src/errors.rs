// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the dbt provisioner.
//!
//! Every failure a caller can observe maps onto one [`ProvisionError`] variant.
//! The variant decides the HTTP status code and the stable `error` kind string
//! rendered in JSON error bodies, so the API layer never inspects messages.

use thiserror::Error;

/// Errors surfaced by the naming engine, the release orchestrator, the connection
/// manager and the deployment reconciler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    /// Client-correctable input problem (HTTP 422)
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// What is wrong with the request
        reason: String,
    },

    /// A live deployment already owns the derived name (HTTP 409)
    #[error("deployment '{name}' conflicts with an existing deployment: {reason}")]
    Conflict {
        /// Derived release name
        name: String,
        /// Why the request conflicts
        reason: String,
    },

    /// Unknown deployment (HTTP 404)
    #[error("deployment '{name}' not found")]
    NotFound {
        /// Requested release name
        name: String,
    },

    /// Non-retriable failure at the release layer
    ///
    /// The deployment is left `Failed` for inspection or delete-then-recreate.
    #[error("release '{release}' failed: {reason}")]
    DeploymentFailed {
        /// Release name
        release: String,
        /// Diagnostic detail from the cluster
        reason: String,
    },

    /// Failure talking to the workflow orchestrator
    #[error("connection '{connection_id}' failed: {reason}")]
    ConnectionError {
        /// Airflow connection id
        connection_id: String,
        /// Diagnostic detail from Airflow
        reason: String,
    },

    /// Persistent volumes were not reclaimed within the cleanup bound
    ///
    /// Reported, not fatal: the cleanup sweep retries later.
    #[error("release '{release}' cleanup timed out after {timeout_secs}s ({remaining} PVCs remaining)")]
    CleanupTimeout {
        /// Release name
        release: String,
        /// Timeout that elapsed
        timeout_secs: u64,
        /// Number of claims still present
        remaining: usize,
    },

    /// Missing or incorrect bearer token (HTTP 401)
    #[error("unauthorized: {reason}")]
    Unauthorized {
        /// Why authorization failed
        reason: String,
    },

    /// Unexpected internal failure (HTTP 500)
    #[error("internal error: {reason}")]
    Internal {
        /// Diagnostic detail
        reason: String,
    },
}

impl ProvisionError {
    /// Stable machine-readable kind used in JSON error bodies and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "InvalidInput",
            Self::Conflict { .. } => "Conflict",
            Self::NotFound { .. } => "NotFound",
            Self::DeploymentFailed { .. } => "DeploymentFailed",
            Self::ConnectionError { .. } => "ConnectionError",
            Self::CleanupTimeout { .. } => "CleanupTimeout",
            Self::Unauthorized { .. } => "Unauthorized",
            Self::Internal { .. } => "Internal",
        }
    }

    /// HTTP status code the API layer answers with.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput { .. } => 422,
            Self::Conflict { .. } => 409,
            Self::NotFound { .. } => 404,
            Self::Unauthorized { .. } => 401,
            Self::DeploymentFailed { .. } | Self::ConnectionError { .. } => 502,
            Self::CleanupTimeout { .. } => 504,
            Self::Internal { .. } => 500,
        }
    }

    /// Shorthand for [`ProvisionError::InvalidInput`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`ProvisionError::Internal`].
    pub fn internal(reason: impl std::fmt::Display) -> Self {
        Self::Internal {
            reason: reason.to_string(),
        }
    }
}

/// Convenience alias used across the crate.
pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
