// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Deployment reconciler.
//!
//! Drives every deployment through its lifecycle:
//!
//! ```text
//! Requested -> Naming -> HelmDeploying -> ConnectionCreating -> Ready
//!      any step -> Failed          Ready | Failed -> Deleting -> Deleted
//! ```
//!
//! API calls only admit work: [`Reconciler::submit`], [`Reconciler::update`] and
//! [`Reconciler::delete`] decide under the registry lock, spawn a pipeline task and
//! return the record right away. Pipelines of the same name are serialized by the
//! name's mutex; different names run in parallel.
//!
//! A delete that arrives while a create is running is recorded on the deployment.
//! The create pipeline checks it between steps, stops after the step in flight and
//! hands over to the deletion pipeline while still holding the name's mutex.

use super::registry::{new_record, DeleteAction, Registry};
use crate::airflow::ConnectionManager;
use crate::errors::{ProvisionError, Result};
use crate::helm::{ChartValues, HelmOrchestrator, RecordStatus, ReleaseInfo, ReleaseState};
use crate::metrics;
use crate::naming::derive_names;
use crate::types::{ConnectionState, DeploymentRecord, DeploymentRequest, DeploymentUpdate, Phase};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Outcome of a create pipeline that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CreateOutcome {
    Ready,
    /// Stopped early because a delete was requested
    Interrupted,
}

/// Owns the deployment registry and runs the pipelines.
pub struct Reconciler {
    pub(super) helm: HelmOrchestrator,
    pub(super) connections: Arc<dyn ConnectionManager>,
    pub(super) namespace: String,
    pub(super) registry: Registry,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        helm: HelmOrchestrator,
        connections: Arc<dyn ConnectionManager>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            helm,
            connections,
            namespace: namespace.into(),
            registry: Registry::new(),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Release orchestrator used by the pipelines.
    #[must_use]
    pub fn helm(&self) -> &HelmOrchestrator {
        &self.helm
    }

    // ========================================================================
    // Admission
    // ========================================================================

    /// Validate a request, claim its name and start the create pipeline.
    ///
    /// # Errors
    ///
    /// - [`ProvisionError::InvalidInput`] when the request is invalid
    /// - [`ProvisionError::Conflict`] when a live deployment holds the derived name
    pub async fn submit(self: &Arc<Self>, request: DeploymentRequest) -> Result<DeploymentRecord> {
        request.validate()?;
        let names = derive_names(&request.project_name, request.git_branch.as_deref())?;
        let values = ChartValues::from_request(&request, &names, &self.namespace);

        let record = self.registry.reserve(values).await?;
        info!(
            deployment = %record.name,
            connection_id = %record.connection_id,
            project = %record.project_name,
            "Deployment accepted"
        );
        self.refresh_phase_gauge().await;

        self.spawn_create(&record.name, "create");
        Ok(record)
    }

    /// Re-deploy an existing release with changed settings.
    ///
    /// # Errors
    ///
    /// - [`ProvisionError::InvalidInput`] when the update is empty or out of range
    /// - [`ProvisionError::NotFound`] for unknown deployments
    /// - [`ProvisionError::Conflict`] unless the deployment is `Ready` or `Failed`
    pub async fn update(
        self: &Arc<Self>,
        name: &str,
        update: DeploymentUpdate,
    ) -> Result<DeploymentRecord> {
        update.validate()?;
        let record = self.registry.begin_update(name, &update).await?;
        info!(deployment = %name, image_tag = %record.image_tag, "Deployment update accepted");
        self.refresh_phase_gauge().await;

        self.spawn_create(name, "update");
        Ok(record)
    }

    /// Start tearing a deployment down.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotFound`] for unknown deployments.
    pub async fn delete(self: &Arc<Self>, name: &str) -> Result<DeploymentRecord> {
        let (record, action) = self.registry.request_delete(name).await?;
        match action {
            DeleteAction::Start => {
                info!(deployment = %name, "Deletion accepted");
                self.spawn_delete(name);
            }
            DeleteAction::Deferred => {
                info!(
                    deployment = %name,
                    phase = record.phase.as_str(),
                    "Deletion deferred until the running step completes"
                );
            }
            DeleteAction::AlreadyDeleting => {
                debug!(deployment = %name, "Deletion already in progress");
            }
        }
        self.refresh_phase_gauge().await;
        Ok(record)
    }

    /// # Errors
    ///
    /// Returns [`ProvisionError::NotFound`] for unknown deployments.
    pub async fn get(&self, name: &str) -> Result<DeploymentRecord> {
        self.registry
            .get(name)
            .await
            .ok_or_else(|| ProvisionError::NotFound {
                name: name.to_string(),
            })
    }

    /// Every deployment, optionally restricted to one phase.
    pub async fn list(&self, phase: Option<Phase>) -> Vec<DeploymentRecord> {
        let mut records = self.registry.list().await;
        if let Some(phase) = phase {
            records.retain(|r| r.phase == phase);
        }
        records
    }

    // ========================================================================
    // Start-up adoption
    // ========================================================================

    /// Rebuild registry records from the release records found in the namespace.
    ///
    /// Deployed releases come back `Ready`. Interrupted installs and upgrades are
    /// resumed, interrupted teardowns are restarted and failed releases stay `Failed`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Internal`] when the releases cannot be listed.
    pub async fn adopt_existing(self: &Arc<Self>) -> Result<usize> {
        let releases = self.helm.list().await?;
        let mut adopted = 0;

        for info in releases {
            let name = info.name.clone();
            let status = info.status;
            if !self.registry.adopt(info.values.clone(), adopted_record(&info)).await {
                continue;
            }
            adopted += 1;
            info!(deployment = %name, status = ?status, "Adopted existing release");

            match status {
                RecordStatus::PendingInstall | RecordStatus::PendingUpgrade => {
                    self.spawn_create(&name, "resume");
                }
                RecordStatus::Uninstalling => self.spawn_delete(&name),
                RecordStatus::Deployed | RecordStatus::Failed => {}
            }
        }

        self.refresh_phase_gauge().await;
        Ok(adopted)
    }

    // ========================================================================
    // Create pipeline
    // ========================================================================

    fn spawn_create(self: &Arc<Self>, name: &str, operation: &'static str) {
        let this = Arc::clone(self);
        let name = name.to_string();
        tokio::spawn(async move { this.run_create(&name, operation).await });
    }

    /// Run the create pipeline for a name, then any deferred deletion.
    pub(super) async fn run_create(&self, name: &str, operation: &'static str) {
        let Some(lock) = self.registry.lock_for(name).await else {
            return;
        };
        let _guard = lock.lock().await;
        let start = Instant::now();

        match self.create_pipeline(name).await {
            Ok(CreateOutcome::Ready) => {
                metrics::record_reconciliation_success(operation, start.elapsed());
                info!(deployment = %name, elapsed = ?start.elapsed(), "Deployment ready");
            }
            Ok(CreateOutcome::Interrupted) => {
                info!(deployment = %name, "Create pipeline stopped for deletion");
            }
            Err(e) => {
                metrics::record_reconciliation_error(operation, e.kind(), start.elapsed());
                self.fail(name, &e).await;
            }
        }

        if self.registry.delete_requested(name).await {
            self.delete_pipeline(name).await;
        }
        self.refresh_phase_gauge().await;
    }

    async fn create_pipeline(&self, name: &str) -> Result<CreateOutcome> {
        let values = self
            .registry
            .values(name)
            .await
            .ok_or_else(|| ProvisionError::NotFound {
                name: name.to_string(),
            })?;
        // Updates and resubmits already have a registered connection
        let connection_existed = self
            .registry
            .get(name)
            .await
            .is_some_and(|r| r.connection_state == ConnectionState::Created);

        self.transition(name, Phase::Naming, "deriving resource names")
            .await;
        let names = derive_names(&values.project_name, values.git_branch.as_deref())?;
        if names.k8s_name != values.release || names.connection_id != values.connection_id {
            return Err(ProvisionError::internal(format!(
                "derived names {}/{} do not match the stored release {}/{}",
                names.k8s_name, names.connection_id, values.release, values.connection_id
            )));
        }
        if self.registry.delete_requested(name).await {
            return Ok(CreateOutcome::Interrupted);
        }

        self.transition(name, Phase::HelmDeploying, "deploying release")
            .await;
        if self.helm.status(name).await? == ReleaseState::Uninstalling {
            info!(deployment = %name, "Finishing interrupted teardown before deploying");
            self.helm.destroy(name).await?;
            self.registry
                .update(name, |r| r.release_state = ReleaseState::NotFound)
                .await;
        }
        let state = self.helm.deploy(&values).await?;
        self.registry
            .update(name, |r| {
                r.release_state = state;
                r.image_tag.clone_from(&values.image.tag);
            })
            .await;
        if self.registry.delete_requested(name).await {
            return Ok(CreateOutcome::Interrupted);
        }

        self.transition(
            name,
            Phase::ConnectionCreating,
            "registering Airflow connection",
        )
        .await;
        let target = values.connection_target();
        if let Err(e) = self
            .connections
            .create_connection(
                &values.connection_id,
                &target,
                &values.secrets.credentials,
            )
            .await
        {
            if connection_existed {
                // Destroying the release would leave the registered connection dangling
                warn!(
                    deployment = %name,
                    error = %e,
                    "Connection update failed, keeping release and existing connection"
                );
            } else {
                warn!(deployment = %name, "Connection registration failed, rolling back release");
                self.registry
                    .update(name, |r| r.connection_state = ConnectionState::Failed)
                    .await;
                self.rollback_release(name).await;
            }
            return Err(e);
        }
        self.registry
            .update(name, |r| r.connection_state = ConnectionState::Created)
            .await;

        self.transition(name, Phase::Ready, "dbt server is ready")
            .await;
        Ok(CreateOutcome::Ready)
    }

    /// Remove a release whose connection could not be registered.
    ///
    /// An incomplete teardown leaves the release `Uninstalling`; the cleanup sweep
    /// picks it up from there. The record phase is left to the caller.
    pub(super) async fn rollback_release(&self, name: &str) {
        let state = match self.helm.destroy(name).await {
            Ok(()) => {
                info!(deployment = %name, "Release rolled back");
                ReleaseState::NotFound
            }
            Err(e) => {
                warn!(deployment = %name, error = %e, "Rollback of release incomplete, sweep will retry");
                ReleaseState::Uninstalling
            }
        };
        self.registry
            .update(name, |r| r.release_state = state)
            .await;
    }

    // ========================================================================
    // Delete pipeline
    // ========================================================================

    pub(super) fn spawn_delete(self: &Arc<Self>, name: &str) {
        let this = Arc::clone(self);
        let name = name.to_string();
        tokio::spawn(async move { this.run_delete(&name).await });
    }

    /// Run the deletion pipeline under the name's mutex.
    pub(super) async fn run_delete(&self, name: &str) {
        let Some(lock) = self.registry.lock_for(name).await else {
            return;
        };
        let _guard = lock.lock().await;
        self.delete_pipeline(name).await;
        self.refresh_phase_gauge().await;
    }

    /// Connection first, then the release. The caller holds the name's mutex.
    pub(super) async fn delete_pipeline(&self, name: &str) {
        let Some(values) = self.registry.values(name).await else {
            return;
        };
        let start = Instant::now();

        self.registry
            .update(name, |r| {
                r.phase = Phase::Deleting;
                r.delete_requested = false;
                r.message = Some("deleting Airflow connection".to_string());
            })
            .await;

        if let Err(e) = self
            .connections
            .delete_connection(&values.connection_id)
            .await
        {
            metrics::record_reconciliation_error("delete", e.kind(), start.elapsed());
            self.fail(name, &e).await;
            return;
        }
        self.registry
            .update(name, |r| {
                r.connection_state = ConnectionState::Absent;
                r.message = Some("uninstalling release".to_string());
            })
            .await;

        match self.helm.destroy(name).await {
            Ok(()) => {
                self.transition(name, Phase::Deleted, "deployment deleted")
                    .await;
                self.registry.remove(name).await;
                metrics::record_reconciliation_success("delete", start.elapsed());
                info!(deployment = %name, elapsed = ?start.elapsed(), "Deployment deleted");
            }
            Err(e @ ProvisionError::CleanupTimeout { .. }) => {
                metrics::record_reconciliation_error("delete", e.kind(), start.elapsed());
                warn!(deployment = %name, error = %e, "Cleanup timed out, sweep will retry");
                self.registry
                    .update(name, |r| {
                        r.release_state = ReleaseState::Uninstalling;
                        r.message = Some(e.to_string());
                        r.error_kind = Some(e.kind().to_string());
                    })
                    .await;
            }
            Err(e) => {
                metrics::record_reconciliation_error("delete", e.kind(), start.elapsed());
                self.fail(name, &e).await;
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn transition(&self, name: &str, phase: Phase, message: &str) {
        debug!(deployment = %name, phase = phase.as_str(), "{message}");
        self.registry
            .update(name, |r| {
                r.phase = phase;
                r.message = Some(message.to_string());
                r.error_kind = None;
            })
            .await;
        self.refresh_phase_gauge().await;
    }

    async fn fail(&self, name: &str, err: &ProvisionError) {
        error!(deployment = %name, error = %err, kind = err.kind(), "Deployment failed");
        self.registry
            .update(name, |r| {
                r.phase = Phase::Failed;
                r.message = Some(err.to_string());
                r.error_kind = Some(err.kind().to_string());
            })
            .await;
    }

    pub(super) async fn refresh_phase_gauge(&self) {
        let counts = self.registry.phase_counts().await;
        metrics::set_deployments_by_phase(counts.iter().map(|(p, n)| (p.as_str(), *n)));
    }
}

fn adopted_record(info: &ReleaseInfo) -> DeploymentRecord {
    let (phase, release_state, connection_state) = match info.status {
        RecordStatus::Deployed => (Phase::Ready, ReleaseState::Deployed, ConnectionState::Created),
        RecordStatus::PendingInstall | RecordStatus::PendingUpgrade => {
            (Phase::Requested, ReleaseState::Pending, ConnectionState::Absent)
        }
        RecordStatus::Failed => (Phase::Failed, ReleaseState::Failed, ConnectionState::Absent),
        RecordStatus::Uninstalling => (
            Phase::Deleting,
            ReleaseState::Uninstalling,
            ConnectionState::Absent,
        ),
    };

    let mut record = new_record(&info.values, phase);
    record.release_state = release_state;
    record.connection_state = connection_state;
    record.message = Some(format!("adopted release: {}", info.description));
    if phase == Phase::Failed {
        record.error_kind = Some("DeploymentFailed".to_string());
    }
    record
}

#[cfg(test)]
#[path = "deployment_tests.rs"]
mod deployment_tests;
