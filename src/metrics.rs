// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the dbt provisioner.
//!
//! All metrics carry the namespace prefix `dbt_provisioner_` and are exposed by the
//! `/metrics` endpoint.
//!
//! # Metrics Categories
//!
//! - **Reconciliation Metrics** - Pipeline runs by operation and outcome
//! - **Resource Lifecycle Metrics** - Releases and connections created and deleted
//! - **Error Metrics** - Failures by error kind
//! - **Deployment Metrics** - Live deployments by phase
//!
//! # Example
//!
//! ```rust,no_run
//! use dbt_provisioner::metrics::record_reconciliation_success;
//!
//! record_reconciliation_success("create", std::time::Duration::from_secs(42));
//! ```

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

/// Namespace prefix for all provisioner metrics
const METRICS_NAMESPACE: &str = "dbt_provisioner";

/// Global Prometheus metrics registry
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Total number of reconciliations by operation and status
///
/// Labels:
/// - `operation`: Pipeline that ran (`create`, `update`, `delete`, `sweep`)
/// - `status`: Outcome (`success`, `error`)
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciliations_total"),
        "Total number of reconciliations by operation and status",
    );
    let counter = CounterVec::new(opts, &["operation", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of reconciliations in seconds
///
/// Releases wait for pods to become ready, so buckets reach into minutes.
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of reconciliations in seconds by operation",
    )
    .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]);
    let histogram = HistogramVec::new(opts, &["operation"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

// ============================================================================
// Resource Lifecycle Metrics
// ============================================================================

/// Total number of external resources created
///
/// Labels:
/// - `resource_type`: `release` or `connection`
pub static RESOURCES_CREATED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_resources_created_total"),
        "Total number of resources created by type",
    );
    let counter = CounterVec::new(opts, &["resource_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of external resources deleted
pub static RESOURCES_DELETED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_resources_deleted_total"),
        "Total number of resources deleted by type",
    );
    let counter = CounterVec::new(opts, &["resource_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Error Metrics
// ============================================================================

/// Total number of errors by operation and error kind
///
/// Labels:
/// - `operation`: Pipeline that failed
/// - `error_kind`: [`crate::errors::ProvisionError::kind`]
pub static ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_errors_total"),
        "Total number of errors by operation and error kind",
    );
    let counter = CounterVec::new(opts, &["operation", "error_kind"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Deployment Metrics
// ============================================================================

/// Number of deployment records by phase
pub static DEPLOYMENTS_ACTIVE: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_deployments"),
        "Number of deployment records by phase",
    );
    let gauge = GaugeVec::new(opts, &["phase"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a successful reconciliation
///
/// # Arguments
/// * `operation` - Pipeline that ran (e.g., `create`)
/// * `duration` - Duration of the reconciliation
pub fn record_reconciliation_success(operation: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[operation, "success"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration.as_secs_f64());
}

/// Record a failed reconciliation together with its error kind
pub fn record_reconciliation_error(operation: &str, error_kind: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[operation, "error"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration.as_secs_f64());
    ERRORS_TOTAL
        .with_label_values(&[operation, error_kind])
        .inc();
}

/// Record resource creation
pub fn record_resource_created(resource_type: &str) {
    RESOURCES_CREATED_TOTAL
        .with_label_values(&[resource_type])
        .inc();
}

/// Record resource deletion
pub fn record_resource_deleted(resource_type: &str) {
    RESOURCES_DELETED_TOTAL
        .with_label_values(&[resource_type])
        .inc();
}

/// Replace the per-phase deployment gauge with a fresh snapshot
pub fn set_deployments_by_phase<'a>(counts: impl IntoIterator<Item = (&'a str, usize)>) {
    DEPLOYMENTS_ACTIVE.reset();
    for (phase, count) in counts {
        #[allow(clippy::cast_precision_loss)]
        DEPLOYMENTS_ACTIVE
            .with_label_values(&[phase])
            .set(count as f64);
    }
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_reconciliation_success() {
        let operation = "test_create";
        record_reconciliation_success(operation, Duration::from_millis(500));

        let counter = RECONCILIATION_TOTAL.with_label_values(&[operation, "success"]);
        assert!(counter.get() > 0.0);

        let histogram = RECONCILIATION_DURATION_SECONDS.with_label_values(&[operation]);
        assert!(histogram.get_sample_count() > 0);
    }

    #[test]
    fn test_record_reconciliation_error_counts_kind() {
        let operation = "test_delete";
        record_reconciliation_error(operation, "CleanupTimeout", Duration::from_millis(250));

        let counter = RECONCILIATION_TOTAL.with_label_values(&[operation, "error"]);
        assert!(counter.get() > 0.0);

        let errors = ERRORS_TOTAL.with_label_values(&[operation, "CleanupTimeout"]);
        assert!(errors.get() > 0.0);
    }

    #[test]
    fn test_gather_metrics() {
        record_reconciliation_success("gather_test", Duration::from_millis(100));
        record_resource_created("release");

        let metrics_text = gather_metrics().unwrap();
        assert!(
            metrics_text.contains("dbt_provisioner_reconciliations_total"),
            "Metrics should contain reconciliation counter"
        );
        assert!(metrics_text.contains("dbt_provisioner_resources_created_total"));
    }
}
