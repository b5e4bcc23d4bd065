// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Mapping of Airflow REST API failures to diagnostic reasons.
//!
//! The connection manager folds every failed call into a
//! [`ProvisionError::ConnectionError`](crate::errors::ProvisionError::ConnectionError).
//! The reason string it carries comes from this table, so operators see the same
//! wording for the same failure whether it happened on create, update or delete.
//!
//! ```rust
//! use dbt_provisioner::http_errors::map_airflow_status;
//!
//! let (reason, message) = map_airflow_status(401);
//! assert_eq!(reason, "AirflowAuthFailed");
//! assert!(message.contains("401"));
//! ```

/// Airflow rejected the request body
pub const REASON_AIRFLOW_BAD_REQUEST: &str = "AirflowBadRequest";

/// Airflow rejected the configured credentials
pub const REASON_AIRFLOW_AUTH_FAILED: &str = "AirflowAuthFailed";

/// The connection does not exist
pub const REASON_CONNECTION_NOT_FOUND: &str = "ConnectionNotFound";

/// A connection with the same id was created concurrently
pub const REASON_CONNECTION_CONFLICT: &str = "ConnectionConflict";

/// Airflow failed while handling the request
pub const REASON_AIRFLOW_INTERNAL_ERROR: &str = "AirflowInternalError";

/// A proxy in front of Airflow failed or timed out
pub const REASON_GATEWAY_ERROR: &str = "GatewayError";

/// No HTTP response was received
pub const REASON_AIRFLOW_UNREACHABLE: &str = "AirflowUnreachable";

/// Map an HTTP status code returned by Airflow to a reason and a message.
///
/// | HTTP Code | Reason |
/// |-----------|--------|
/// | 400 | `AirflowBadRequest` |
/// | 401, 403 | `AirflowAuthFailed` |
/// | 404 | `ConnectionNotFound` |
/// | 409 | `ConnectionConflict` |
/// | 500 | `AirflowInternalError` |
/// | 502, 503, 504 | `GatewayError` |
/// | Other | `AirflowUnreachable` |
#[must_use]
pub fn map_airflow_status(status_code: u16) -> (&'static str, String) {
    match status_code {
        400 => (
            REASON_AIRFLOW_BAD_REQUEST,
            "Invalid connection payload sent to Airflow (400)".into(),
        ),
        401 => (
            REASON_AIRFLOW_AUTH_FAILED,
            "Airflow authentication required (401)".into(),
        ),
        403 => (
            REASON_AIRFLOW_AUTH_FAILED,
            "Airflow user lacks permission to manage connections (403)".into(),
        ),
        404 => (
            REASON_CONNECTION_NOT_FOUND,
            "Connection not found in Airflow (404)".into(),
        ),
        409 => (
            REASON_CONNECTION_CONFLICT,
            "Connection already exists in Airflow (409)".into(),
        ),
        500 => (
            REASON_AIRFLOW_INTERNAL_ERROR,
            "Airflow API internal error (500)".into(),
        ),
        502 => (
            REASON_GATEWAY_ERROR,
            "Bad gateway reaching Airflow (502)".into(),
        ),
        503 => (
            REASON_GATEWAY_ERROR,
            "Airflow service unavailable (503)".into(),
        ),
        504 => (
            REASON_GATEWAY_ERROR,
            "Gateway timeout reaching Airflow (504)".into(),
        ),
        _ => (
            REASON_AIRFLOW_UNREACHABLE,
            format!("Unexpected HTTP error from Airflow ({status_code})"),
        ),
    }
}

/// Reason and message for a request that never got an HTTP response.
#[must_use]
pub fn map_transport_error() -> (&'static str, String) {
    (
        REASON_AIRFLOW_UNREACHABLE,
        "Cannot connect to the Airflow webserver".into(),
    )
}

#[cfg(test)]
#[path = "http_errors_tests.rs"]
mod http_errors_tests;
