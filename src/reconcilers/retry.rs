// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Retry logic with bounded exponential backoff.
//!
//! Kubernetes API calls and Airflow API calls both go through [`retry_with_backoff`]:
//! transient failures (429, 5xx, network) are retried with exponential backoff and
//! jitter, permanent failures (other 4xx) are returned immediately. Unlike an
//! unbounded retry loop, every schedule here stops after [`MAX_RETRY_ATTEMPTS`]
//! attempts and hands the *last* error back to the caller, so it can still be mapped
//! into the domain error taxonomy.

use crate::constants::MAX_RETRY_ATTEMPTS;
use rand::Rng;
use reqwest::StatusCode;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Initial retry interval for Kubernetes API calls (200ms)
const KUBE_INITIAL_INTERVAL_MILLIS: u64 = 200;

/// Maximum interval between Kubernetes API retries (10 seconds)
const KUBE_MAX_INTERVAL_SECS: u64 = 10;

/// HTTP retry initial interval (100ms)
const HTTP_INITIAL_INTERVAL_MILLIS: u64 = 100;

/// HTTP retry maximum interval (5 seconds)
const HTTP_MAX_INTERVAL_SECS: u64 = 5;

/// Backoff multiplier (exponential growth factor)
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Randomization factor to prevent thundering herd (±10%)
const RANDOMIZATION_FACTOR: f64 = 0.1;

/// Exponential backoff with jitter and an attempt budget.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Current interval duration
    pub current_interval: Duration,
    /// Initial interval duration
    pub initial_interval: Duration,
    /// Maximum interval duration
    pub max_interval: Duration,
    /// Total attempts allowed, the first call included
    pub max_attempts: u32,
    /// Backoff multiplier (typically 2.0 for doubling)
    pub multiplier: f64,
    /// Randomization factor (e.g., 0.1 for ±10%)
    pub randomization_factor: f64,
    retries: u32,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with specified parameters.
    #[must_use]
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        max_attempts: u32,
        multiplier: f64,
        randomization_factor: f64,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            initial_interval,
            max_interval,
            max_attempts,
            multiplier,
            randomization_factor,
            retries: 0,
        }
    }

    /// Get the next backoff interval, or `None` once the attempt budget is spent.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        // The first attempt is not a retry
        if self.retries + 1 >= self.max_attempts {
            return None;
        }
        self.retries += 1;

        let interval = self.current_interval;
        let jittered = self.apply_jitter(interval);

        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        Some(jittered)
    }

    /// Apply randomization (jitter) to an interval.
    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        let jittered = rand::rng().random_range((secs - delta)..=(secs + delta));

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Backoff schedule for Kubernetes API calls.
///
/// 5 attempts: immediately, then after ~200ms, ~400ms, ~800ms and ~1.6s.
#[must_use]
pub fn kube_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(KUBE_INITIAL_INTERVAL_MILLIS),
        Duration::from_secs(KUBE_MAX_INTERVAL_SECS),
        MAX_RETRY_ATTEMPTS,
        BACKOFF_MULTIPLIER,
        RANDOMIZATION_FACTOR,
    )
}

/// Backoff schedule for Airflow API calls.
///
/// 5 attempts: immediately, then after ~100ms, ~200ms, ~400ms and ~800ms.
#[must_use]
pub fn http_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(HTTP_INITIAL_INTERVAL_MILLIS),
        Duration::from_secs(HTTP_MAX_INTERVAL_SECS),
        MAX_RETRY_ATTEMPTS,
        BACKOFF_MULTIPLIER,
        RANDOMIZATION_FACTOR,
    )
}

/// Determine if an HTTP status code is retryable.
///
/// Retryable: 429 and every 5xx.
#[must_use]
pub fn is_retryable_http_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Determine if a Kubernetes error is retryable.
///
/// # Retryable Errors
///
/// - **HTTP 429** (Too Many Requests) - Rate limiting
/// - **HTTP 5xx** (Server Errors) - Temporary API server issues
/// - **Service Errors** - Network/connection issues
///
/// Everything else (invalid objects, forbidden, not found) is permanent.
#[must_use]
pub fn is_retryable_kube_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(api_err) => {
            api_err.code == 429 || (api_err.code >= 500 && api_err.code < 600)
        }
        kube::Error::Service(_) => true,
        _ => false,
    }
}

/// Run `operation` until it succeeds, fails permanently, or the backoff is exhausted.
///
/// # Errors
///
/// Returns the last error produced by `operation`.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    mut backoff: ExponentialBackoff,
    operation_name: &str,
    is_retryable: R,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let start_time = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        "Call succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(e) => {
                if !is_retryable(&e) {
                    debug!(
                        operation = operation_name,
                        error = %e,
                        "Non-retryable error, failing immediately"
                    );
                    return Err(e);
                }

                if let Some(duration) = backoff.next_backoff() {
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        retry_after = ?duration,
                        error = %e,
                        "Retryable error, will retry"
                    );
                    tokio::time::sleep(duration).await;
                } else {
                    error!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        error = %e,
                        "Retries exhausted, giving up"
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
