// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context, Result};
use clap::Parser;
use dbt_provisioner::{
    airflow::AirflowClient,
    api::{self, AppState},
    config::{Config, LogFormat},
    constants::ADOPTION_RETRY_INTERVAL_SECS,
    helm::{kube_client::KubeReleaseClient, HelmOrchestrator},
    reconcilers::Reconciler,
};
use kube::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

fn main() -> Result<()> {
    let config = Config::parse();
    config.validate()?;

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .thread_name("dbt-provisioner")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(config))
}

/// Format: timestamp file:line LEVEL message
///
/// Respects `RUST_LOG` if set, otherwise `info` (or `debug` with `DEBUG=true`).
fn initialize_logging(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.default_log_level()));

    match config.log_format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(config: Config) -> Result<()> {
    initialize_logging(&config);
    info!(config = ?config, "Starting dbt server provisioner");

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }

    debug!("Initializing Kubernetes client");
    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let helm = HelmOrchestrator::new(Arc::new(KubeReleaseClient::new(
        client,
        config.namespace.clone(),
    )))
    .with_timeouts(config.deploy_timeout(), config.cleanup_timeout());
    let airflow = AirflowClient::from_config(&config)?;
    let reconciler = Arc::new(Reconciler::new(
        helm,
        Arc::new(airflow),
        config.namespace.clone(),
    ));
    let state = AppState::new(reconciler.clone(), &config.secret_key)
        .with_cors_origins(config.cors_origins.clone());

    tokio::spawn(start_background_tasks(
        reconciler,
        state.clone(),
        config.readiness_interval(),
        config.sweep_interval(),
    ));

    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    info!(address = %config.bind_address, "HTTP API listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Graceful shutdown completed");
    Ok(())
}

/// Adopt existing releases, then run the readiness monitor and the cleanup sweep.
///
/// Adoption is retried until the cluster answers; the start-up probe stays failing
/// until it succeeds.
async fn start_background_tasks(
    reconciler: Arc<Reconciler>,
    state: AppState,
    readiness_interval: Duration,
    sweep_interval: Duration,
) {
    loop {
        match reconciler.adopt_existing().await {
            Ok(adopted) => {
                info!(adopted, "Adopted existing releases");
                break;
            }
            Err(e) => {
                warn!(
                    error = %e,
                    retry_in_secs = ADOPTION_RETRY_INTERVAL_SECS,
                    "Failed to adopt existing releases"
                );
                tokio::time::sleep(Duration::from_secs(ADOPTION_RETRY_INTERVAL_SECS)).await;
            }
        }
    }
    state.mark_started();

    tokio::select! {
        () = reconciler.clone().run_readiness_monitor(readiness_interval) => {
            error!("CRITICAL: readiness monitor exited unexpectedly");
        }
        () = reconciler.run_cleanup_sweep(sweep_interval) => {
            error!("CRITICAL: cleanup sweep exited unexpectedly");
        }
    }
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
        () = terminate => info!("Received SIGTERM (pod termination), initiating graceful shutdown"),
    }
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod main_tests;
