// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Release orchestration for dbt API servers.
//!
//! A *release* is the set of Kubernetes objects running one dbt API server: a
//! credentials `Secret`, a `Service` and a `StatefulSet` whose volume claim template
//! provides the persistent workspace. Like Helm, every release also owns a release
//! record (`<name>-release` `ConfigMap`) holding its revision, status and the last
//! applied values.
//!
//! The module is split in two layers:
//!
//! - [`ReleaseClient`] performs single cluster operations (read the record, apply the
//!   manifests, delete objects). [`kube_client::KubeReleaseClient`] implements it with
//!   server-side apply.
//! - [`HelmOrchestrator`] implements the release contract on top: `deploy` is an
//!   upsert that waits for readiness, `status` always re-queries the cluster, and
//!   `destroy` uninstalls and waits until every persistent volume claim is gone.
//!
//! Transient cluster errors are retried with bounded backoff; anything else surfaces
//! as [`ProvisionError::DeploymentFailed`].

pub mod kube_client;
pub mod values;

use crate::constants::{
    DBT_INVOCATIONS_PATH, DEFAULT_CLEANUP_TIMEOUT_SECS, DEFAULT_DEPLOY_TIMEOUT_SECS,
    RELEASE_POLL_INTERVAL_SECS,
};
use crate::errors::{ProvisionError, Result};
use crate::metrics;
use crate::naming::{public_host, service_host, ResourceNames};
use crate::reconcilers::retry::{is_retryable_kube_error, kube_backoff, retry_with_backoff};
use crate::types::{
    CeleryLogLevel, Credentials, DatawarehouseType, DeploymentRequest, DeploymentUpdate,
    Environment, ImageSpec, ResourceSpec,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

/// Observed state of a release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum ReleaseState {
    /// Applied, workload not ready yet
    Pending,
    /// Workload ready
    Deployed,
    /// The last install or upgrade failed
    Failed,
    /// Teardown in progress
    Uninstalling,
    /// No release record exists
    #[default]
    NotFound,
}

/// Status stored in the release record, following Helm's release statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordStatus {
    PendingInstall,
    PendingUpgrade,
    Deployed,
    Failed,
    Uninstalling,
}

/// Values a release is rendered from.
///
/// Everything except [`ReleaseSecrets`] is persisted in the release record; secrets
/// only live in the release's `Secret`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartValues {
    /// Release name (the derived Kubernetes name)
    pub release: String,
    pub namespace: String,
    pub connection_id: String,
    /// Normalized project name, used for collision detection
    pub project_key: String,
    /// Normalized branch, used for collision detection
    pub branch_key: Option<String>,
    /// Project name as submitted
    pub project_name: String,
    /// Branch as submitted
    pub git_branch: Option<String>,
    pub customer: Option<String>,
    pub domain: Option<String>,
    pub environment: Environment,
    pub https_enabled: bool,
    pub dbt_repo_name: String,
    pub datawarehouse_type: DatawarehouseType,
    pub image: ImageSpec,
    pub resources: ResourceSpec,
    pub worker_num: u32,
    pub max_requests: u32,
    pub debug: bool,
    pub celery_log_level: CeleryLogLevel,
    #[serde(skip)]
    pub secrets: ReleaseSecrets,
}

/// Secret material of a release.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ReleaseSecrets {
    pub credentials: Credentials,
    pub gitlink_secret: String,
}

impl std::fmt::Debug for ReleaseSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseSecrets")
            .field("credentials", &self.credentials)
            .field("gitlink_secret", &"<redacted>")
            .finish()
    }
}

impl ChartValues {
    /// Build release values from a validated request and its derived names.
    #[must_use]
    pub fn from_request(
        request: &DeploymentRequest,
        names: &ResourceNames,
        namespace: &str,
    ) -> Self {
        Self {
            release: names.k8s_name.clone(),
            namespace: namespace.to_string(),
            connection_id: names.connection_id.clone(),
            project_key: names.project_key.clone(),
            branch_key: names.branch_key.clone(),
            project_name: request.project_name.clone(),
            git_branch: request.git_branch.clone().filter(|b| !b.trim().is_empty()),
            customer: request.customer.clone(),
            domain: request.domain.clone(),
            environment: request.environment,
            https_enabled: request.https_enabled,
            dbt_repo_name: request.dbt_repo_name.clone(),
            datawarehouse_type: request.datawarehouse_type,
            image: request.image.clone(),
            resources: request.resources.clone(),
            worker_num: request.worker_num,
            max_requests: request.max_requests,
            debug: request.debug,
            celery_log_level: request.celery_log_level,
            secrets: ReleaseSecrets {
                credentials: request.credentials(),
                gitlink_secret: request.gitlink_secret.clone(),
            },
        }
    }

    /// Names the values were derived from.
    #[must_use]
    pub fn names(&self) -> ResourceNames {
        ResourceNames {
            k8s_name: self.release.clone(),
            connection_id: self.connection_id.clone(),
            project_key: self.project_key.clone(),
            branch_key: self.branch_key.clone(),
        }
    }

    /// Apply the fields of a validated update.
    pub fn apply_update(&mut self, update: &DeploymentUpdate) {
        if let Some(tag) = &update.tag {
            self.image.tag.clone_from(tag);
        }
        if let Some(worker_num) = update.worker_num {
            self.worker_num = worker_num;
        }
        if let Some(max_requests) = update.max_requests {
            self.max_requests = max_requests;
        }
        if let Some(debug) = update.debug {
            self.debug = debug;
        }
        if let Some(level) = update.celery_log_level {
            self.celery_log_level = level;
        }
    }

    /// URL the Airflow connection points at.
    ///
    /// Public `https://<release>.<customer>.<domain>/invocations` when HTTPS is enabled,
    /// otherwise the in-cluster Service address.
    #[must_use]
    pub fn connection_target(&self) -> String {
        match (self.https_enabled, &self.customer, &self.domain) {
            (true, Some(customer), Some(domain)) => format!(
                "https://{}{DBT_INVOCATIONS_PATH}",
                public_host(&self.release, customer, domain)
            ),
            _ => format!(
                "http://{}{DBT_INVOCATIONS_PATH}",
                service_host(&self.release, &self.namespace)
            ),
        }
    }
}

/// Content of a release record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub name: String,
    pub namespace: String,
    pub revision: u32,
    pub status: RecordStatus,
    /// Last status change detail
    pub description: String,
    pub updated_at: DateTime<Utc>,
    pub values: ChartValues,
}

/// Errors raised by a [`ReleaseClient`].
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error(transparent)]
    Kube(#[from] kube::Error),

    /// A release record exists but cannot be decoded
    #[error("release record for '{name}' is unreadable: {reason}")]
    Record { name: String, reason: String },

    /// A rendered object cannot be applied
    #[error("invalid manifest for '{name}': {reason}")]
    Manifest { name: String, reason: String },
}

impl ReleaseError {
    /// Transient errors worth another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube(e) => is_retryable_kube_error(e),
            Self::Record { .. } | Self::Manifest { .. } => false,
        }
    }
}

/// Single cluster operations on releases.
///
/// Implementations perform one call each and never wait; waiting, retrying and the
/// install/upgrade decision belong to [`HelmOrchestrator`].
#[async_trait]
pub trait ReleaseClient: Send + Sync {
    /// Read the release record, `None` when absent.
    async fn get_release(&self, name: &str) -> Result<Option<ReleaseInfo>, ReleaseError>;

    /// Apply the release manifests and write the record with `revision`.
    async fn apply_release(
        &self,
        values: &ChartValues,
        revision: u32,
        status: RecordStatus,
    ) -> Result<(), ReleaseError>;

    /// Update the status stored in the release record.
    async fn set_status(
        &self,
        name: &str,
        status: RecordStatus,
        description: &str,
    ) -> Result<(), ReleaseError>;

    /// Whether every desired replica of the release's workload is ready.
    async fn workload_ready(&self, name: &str) -> Result<bool, ReleaseError>;

    /// Delete the workload, Service and Secret of a release.
    async fn uninstall(&self, name: &str) -> Result<(), ReleaseError>;

    /// Delete the release's persistent volume claims.
    async fn delete_pvcs(&self, name: &str) -> Result<(), ReleaseError>;

    /// Names of persistent volume claims of the release still present.
    async fn remaining_pvcs(&self, name: &str) -> Result<Vec<String>, ReleaseError>;

    /// Delete the release record.
    async fn delete_record(&self, name: &str) -> Result<(), ReleaseError>;

    /// Every release record managed by this service.
    async fn list_releases(&self) -> Result<Vec<ReleaseInfo>, ReleaseError>;

    /// Cheap connectivity check.
    async fn ping(&self) -> Result<(), ReleaseError>;
}

/// Release lifecycle: upsert with wait, live status, destroy with PVC reclamation.
#[derive(Clone)]
pub struct HelmOrchestrator {
    client: Arc<dyn ReleaseClient>,
    deploy_timeout: Duration,
    cleanup_timeout: Duration,
    poll_interval: Duration,
}

impl HelmOrchestrator {
    #[must_use]
    pub fn new(client: Arc<dyn ReleaseClient>) -> Self {
        Self {
            client,
            deploy_timeout: Duration::from_secs(DEFAULT_DEPLOY_TIMEOUT_SECS),
            cleanup_timeout: Duration::from_secs(DEFAULT_CLEANUP_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(RELEASE_POLL_INTERVAL_SECS),
        }
    }

    #[must_use]
    pub fn with_timeouts(mut self, deploy_timeout: Duration, cleanup_timeout: Duration) -> Self {
        self.deploy_timeout = deploy_timeout;
        self.cleanup_timeout = cleanup_timeout;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Install the release if absent, upgrade it otherwise, then wait until it is ready.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::DeploymentFailed`] when the manifests are rejected,
    /// retries run out, or the release is not ready within the deploy timeout.
    pub async fn deploy(&self, values: &ChartValues) -> Result<ReleaseState> {
        let name = values.release.as_str();
        let existing = self.get_release(name).await?;

        let (revision, status) = match &existing {
            None => (1, RecordStatus::PendingInstall),
            Some(info) if info.status == RecordStatus::Uninstalling => {
                return Err(deployment_failed(name, "release is being uninstalled"));
            }
            Some(info) => (info.revision + 1, RecordStatus::PendingUpgrade),
        };

        info!(
            release = %name,
            namespace = %values.namespace,
            revision,
            upgrade = existing.is_some(),
            image = %values.image.reference(),
            "Applying release"
        );

        retry_with_backoff(
            kube_backoff(),
            "apply release",
            ReleaseError::is_retryable,
            || self.client.apply_release(values, revision, status),
        )
        .await
        .map_err(|e| deployment_failed(name, e))?;

        if existing.is_none() {
            metrics::record_resource_created("release");
        }

        self.wait_until_deployed(name).await
    }

    async fn wait_until_deployed(&self, name: &str) -> Result<ReleaseState> {
        let deadline = Instant::now() + self.deploy_timeout;

        loop {
            match self.status(name).await? {
                ReleaseState::Deployed => {
                    self.set_status(name, RecordStatus::Deployed, "release is ready")
                        .await?;
                    info!(release = %name, "Release deployed");
                    return Ok(ReleaseState::Deployed);
                }
                ReleaseState::Failed => {
                    return Err(deployment_failed(name, "release reported failed"));
                }
                ReleaseState::NotFound | ReleaseState::Uninstalling => {
                    return Err(deployment_failed(
                        name,
                        "release disappeared while waiting for readiness",
                    ));
                }
                ReleaseState::Pending => {}
            }

            if Instant::now() >= deadline {
                let reason = format!(
                    "workload not ready within {}s",
                    self.deploy_timeout.as_secs()
                );
                warn!(release = %name, %reason, "Release timed out");
                if let Err(e) = self.set_status(name, RecordStatus::Failed, &reason).await {
                    warn!(release = %name, error = %e, "Failed to mark release as failed");
                }
                return Err(deployment_failed(name, reason));
            }

            debug!(release = %name, "Release pending, polling again");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Query the live state of a release.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::DeploymentFailed`] when the cluster cannot be queried.
    pub async fn status(&self, name: &str) -> Result<ReleaseState> {
        let Some(info) = self.get_release(name).await? else {
            return Ok(ReleaseState::NotFound);
        };

        match info.status {
            RecordStatus::Failed => Ok(ReleaseState::Failed),
            RecordStatus::Uninstalling => Ok(ReleaseState::Uninstalling),
            RecordStatus::PendingInstall | RecordStatus::PendingUpgrade | RecordStatus::Deployed => {
                let ready = retry_with_backoff(
                    kube_backoff(),
                    "read workload readiness",
                    ReleaseError::is_retryable,
                    || self.client.workload_ready(name),
                )
                .await
                .map_err(|e| deployment_failed(name, e))?;

                Ok(if ready {
                    ReleaseState::Deployed
                } else {
                    ReleaseState::Pending
                })
            }
        }
    }

    /// Uninstall a release and wait until its persistent volume claims are reclaimed.
    ///
    /// Safe to call repeatedly: a missing record, workload or claim is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::CleanupTimeout`] when claims remain after the cleanup
    /// timeout, [`ProvisionError::DeploymentFailed`] when the cluster rejects a call.
    pub async fn destroy(&self, name: &str) -> Result<()> {
        info!(release = %name, "Uninstalling release");

        if self.get_release(name).await?.is_some() {
            self.set_status(name, RecordStatus::Uninstalling, "uninstall requested")
                .await?;
        }

        retry_with_backoff(
            kube_backoff(),
            "uninstall release",
            ReleaseError::is_retryable,
            || self.client.uninstall(name),
        )
        .await
        .map_err(|e| deployment_failed(name, e))?;

        retry_with_backoff(
            kube_backoff(),
            "delete release PVCs",
            ReleaseError::is_retryable,
            || self.client.delete_pvcs(name),
        )
        .await
        .map_err(|e| deployment_failed(name, e))?;

        let deadline = Instant::now() + self.cleanup_timeout;
        loop {
            let remaining = retry_with_backoff(
                kube_backoff(),
                "list release PVCs",
                ReleaseError::is_retryable,
                || self.client.remaining_pvcs(name),
            )
            .await
            .map_err(|e| deployment_failed(name, e))?;

            if remaining.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    release = %name,
                    remaining = ?remaining,
                    "Persistent volume claims still present after cleanup timeout"
                );
                return Err(ProvisionError::CleanupTimeout {
                    release: name.to_string(),
                    timeout_secs: self.cleanup_timeout.as_secs(),
                    remaining: remaining.len(),
                });
            }

            debug!(release = %name, remaining = remaining.len(), "Waiting for PVCs to be reclaimed");
            tokio::time::sleep(self.poll_interval).await;
        }

        // The record goes last so an interrupted teardown is found again at start-up
        retry_with_backoff(
            kube_backoff(),
            "delete release record",
            ReleaseError::is_retryable,
            || self.client.delete_record(name),
        )
        .await
        .map_err(|e| deployment_failed(name, e))?;

        metrics::record_resource_deleted("release");
        info!(release = %name, "Release uninstalled");
        Ok(())
    }

    /// Every managed release in the namespace.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Internal`] when the records cannot be listed.
    pub async fn list(&self) -> Result<Vec<ReleaseInfo>> {
        retry_with_backoff(
            kube_backoff(),
            "list releases",
            ReleaseError::is_retryable,
            || self.client.list_releases(),
        )
        .await
        .map_err(ProvisionError::internal)
    }

    /// Whether the cluster answers.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Internal`] when the cluster is unreachable.
    pub async fn ping(&self) -> Result<()> {
        self.client.ping().await.map_err(ProvisionError::internal)
    }

    async fn get_release(&self, name: &str) -> Result<Option<ReleaseInfo>> {
        retry_with_backoff(
            kube_backoff(),
            "get release record",
            ReleaseError::is_retryable,
            || self.client.get_release(name),
        )
        .await
        .map_err(|e| deployment_failed(name, e))
    }

    async fn set_status(&self, name: &str, status: RecordStatus, description: &str) -> Result<()> {
        retry_with_backoff(
            kube_backoff(),
            "update release status",
            ReleaseError::is_retryable,
            || self.client.set_status(name, status, description),
        )
        .await
        .map_err(|e| deployment_failed(name, e))
    }
}

fn deployment_failed(release: &str, reason: impl std::fmt::Display) -> ProvisionError {
    ProvisionError::DeploymentFailed {
        release: release.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod mock;

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
