// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Service configuration.
//!
//! Every setting can be passed as a flag or through the environment, which is how the
//! service is configured when it runs in a pod:
//!
//! | Variable | Default |
//! |---|---|
//! | `SECRET_KEY` | required |
//! | `AIRFLOW_URL` | required |
//! | `AIRFLOW_USER` / `AIRFLOW_PASSWORD` | required |
//! | `KUBERNETES_NAMESPACE` | `dbt-server` |
//! | `DEBUG` | `false` |
//! | `BIND_ADDRESS` | `0.0.0.0:6798` |
//! | `CORS_ORIGINS` | `*` (comma separated list otherwise) |
//! | `WORKER_THREADS` | `4` |
//! | `DEPLOY_TIMEOUT_SECS` | `600` |
//! | `CLEANUP_TIMEOUT_SECS` | `120` |
//! | `READINESS_INTERVAL_SECS` | `30` |
//! | `SWEEP_INTERVAL_SECS` | `300` |
//! | `RUST_LOG_FORMAT` | `text` |

use crate::constants::{
    DEFAULT_BIND_ADDRESS, DEFAULT_CLEANUP_TIMEOUT_SECS, DEFAULT_CORS_ORIGINS, DEFAULT_DEPLOY_TIMEOUT_SECS,
    DEFAULT_NAMESPACE, DEFAULT_READINESS_INTERVAL_SECS, DEFAULT_SWEEP_INTERVAL_SECS,
    DEFAULT_WORKER_THREADS,
};
use anyhow::{ensure, Result};
use axum::http::HeaderValue;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Compact human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// dbt server provisioner.
#[derive(Clone, Parser)]
#[command(name = "dbt-provisioner")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Bearer token clients must present
    #[arg(long, env = "SECRET_KEY", hide_env_values = true)]
    pub secret_key: String,

    /// Base URL of the Airflow webserver
    #[arg(long, env = "AIRFLOW_URL")]
    pub airflow_url: Url,

    /// Airflow API user
    #[arg(long, env = "AIRFLOW_USER")]
    pub airflow_user: String,

    /// Airflow API password
    #[arg(long, env = "AIRFLOW_PASSWORD", hide_env_values = true)]
    pub airflow_password: String,

    /// Namespace dbt servers are deployed into
    #[arg(long, env = "KUBERNETES_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Lower the default log level to debug
    #[arg(long, env = "DEBUG")]
    pub debug: bool,

    /// Listen address of the HTTP API
    #[arg(long, env = "BIND_ADDRESS", default_value = DEFAULT_BIND_ADDRESS)]
    pub bind_address: SocketAddr,

    /// Origins allowed to call the API from a browser; `*` allows any
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',', default_value = DEFAULT_CORS_ORIGINS)]
    pub cors_origins: Vec<String>,

    /// Tokio worker threads
    #[arg(long, env = "WORKER_THREADS", default_value_t = DEFAULT_WORKER_THREADS)]
    pub worker_threads: usize,

    /// How long a deploy waits for the release to become ready
    #[arg(long, env = "DEPLOY_TIMEOUT_SECS", default_value_t = DEFAULT_DEPLOY_TIMEOUT_SECS)]
    pub deploy_timeout_secs: u64,

    /// How long a destroy waits for persistent volumes to be reclaimed
    #[arg(long, env = "CLEANUP_TIMEOUT_SECS", default_value_t = DEFAULT_CLEANUP_TIMEOUT_SECS)]
    pub cleanup_timeout_secs: u64,

    /// Interval of the readiness monitor
    #[arg(long, env = "READINESS_INTERVAL_SECS", default_value_t = DEFAULT_READINESS_INTERVAL_SECS)]
    pub readiness_interval_secs: u64,

    /// Interval of the cleanup sweep
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = DEFAULT_SWEEP_INTERVAL_SECS)]
    pub sweep_interval_secs: u64,

    /// Log output format
    #[arg(long, env = "RUST_LOG_FORMAT", value_enum, ignore_case = true, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("secret_key", &"<redacted>")
            .field("airflow_url", &self.airflow_url.as_str())
            .field("airflow_user", &self.airflow_user)
            .field("airflow_password", &"<redacted>")
            .field("namespace", &self.namespace)
            .field("debug", &self.debug)
            .field("bind_address", &self.bind_address)
            .field("cors_origins", &self.cors_origins)
            .field("worker_threads", &self.worker_threads)
            .field("deploy_timeout_secs", &self.deploy_timeout_secs)
            .field("cleanup_timeout_secs", &self.cleanup_timeout_secs)
            .field("readiness_interval_secs", &self.readiness_interval_secs)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Config {
    /// Reject settings the service cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.secret_key.trim().is_empty(), "SECRET_KEY must not be empty");
        ensure!(
            matches!(self.airflow_url.scheme(), "http" | "https"),
            "AIRFLOW_URL must be an http(s) URL, got '{}'",
            self.airflow_url
        );
        ensure!(!self.airflow_user.is_empty(), "AIRFLOW_USER must not be empty");
        ensure!(!self.namespace.trim().is_empty(), "KUBERNETES_NAMESPACE must not be empty");
        ensure!(self.worker_threads > 0, "WORKER_THREADS must be at least 1");
        ensure!(self.deploy_timeout_secs > 0, "DEPLOY_TIMEOUT_SECS must be positive");
        ensure!(self.cleanup_timeout_secs > 0, "CLEANUP_TIMEOUT_SECS must be positive");
        ensure!(
            self.readiness_interval_secs > 0,
            "READINESS_INTERVAL_SECS must be positive"
        );
        ensure!(self.sweep_interval_secs > 0, "SWEEP_INTERVAL_SECS must be positive");
        ensure!(!self.cors_origins.is_empty(), "CORS_ORIGINS must not be empty");
        if self.cors_origins.iter().any(|o| o == "*") {
            ensure!(
                self.cors_origins.len() == 1,
                "CORS_ORIGINS: '*' must be the only origin, got {:?}",
                self.cors_origins
            );
        }
        for origin in &self.cors_origins {
            ensure!(
                !origin.trim().is_empty() && HeaderValue::from_str(origin).is_ok(),
                "CORS_ORIGINS: invalid origin '{origin}'"
            );
        }
        Ok(())
    }

    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    #[must_use]
    pub fn default_log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }

    #[must_use]
    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_secs(self.deploy_timeout_secs)
    }

    #[must_use]
    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_secs)
    }

    #[must_use]
    pub fn readiness_interval(&self) -> Duration {
        Duration::from_secs(self.readiness_interval_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
