// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Bearer token authentication.
//!
//! Only the SHA-256 digest of the configured secret key is kept in memory. Presented
//! tokens are hashed and compared in constant time, so neither the comparison time
//! nor the token length leaks anything about the key.

use super::AppState;
use crate::errors::ProvisionError;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use tracing::warn;

/// SHA-256 digest of a token.
#[must_use]
pub fn token_digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

/// Compare two digests without short-circuiting.
#[must_use]
pub fn digests_match(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn bearer_token(request: &Request) -> Option<&str> {
    let value = request.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}

/// Reject requests without a valid `Authorization: Bearer <SECRET_KEY>` header.
pub async fn require_bearer(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(token) = bearer_token(&request) else {
        warn!(path = %request.uri().path(), "Request without bearer token rejected");
        return ProvisionError::Unauthorized {
            reason: "missing bearer token".to_string(),
        }
        .into_response();
    };

    if !digests_match(&token_digest(token), state.token_digest()) {
        warn!(path = %request.uri().path(), "Request with invalid bearer token rejected");
        return ProvisionError::Unauthorized {
            reason: "invalid bearer token".to_string(),
        }
        .into_response();
    }

    next.run(request).await
}
