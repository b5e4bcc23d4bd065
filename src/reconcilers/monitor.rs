// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Background loops of the reconciler: readiness monitoring and the cleanup sweep.

use super::deployment::Reconciler;
use crate::constants::READINESS_CHECK_CONCURRENCY;
use crate::errors::ProvisionError;
use crate::helm::ReleaseState;
use crate::metrics;
use crate::types::{ConnectionState, DeploymentRecord, Phase};
use chrono::Utc;
use futures::{future, stream, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

impl Reconciler {
    /// Query the release of every settled deployment once.
    ///
    /// `Ready` deployments whose release failed or vanished become `Failed`. Records
    /// with a pipeline in flight are skipped; their pipeline owns the release state.
    /// Returns the number of releases checked.
    pub async fn check_readiness_once(&self) -> usize {
        let settled: Vec<DeploymentRecord> = self
            .registry
            .list()
            .await
            .into_iter()
            .filter(|r| matches!(r.phase, Phase::Ready | Phase::Failed))
            .collect();

        let checked = stream::iter(settled)
            .map(|record| self.check_release(record))
            .buffer_unordered(READINESS_CHECK_CONCURRENCY)
            .filter(|checked| future::ready(*checked))
            .count()
            .await;

        self.refresh_phase_gauge().await;
        checked
    }

    /// Refresh one record from its release; `false` when the status call failed.
    async fn check_release(&self, record: DeploymentRecord) -> bool {
        let state = match self.helm.status(&record.name).await {
            Ok(state) => state,
            Err(e) => {
                warn!(deployment = %record.name, error = %e, "Readiness check failed");
                return false;
            }
        };

        let lost = record.phase == Phase::Ready
            && matches!(state, ReleaseState::NotFound | ReleaseState::Failed);
        if lost {
            let err = ProvisionError::DeploymentFailed {
                release: record.name.clone(),
                reason: format!("release reported {state:?} while ready"),
            };
            warn!(deployment = %record.name, error = %err, "Ready deployment lost its release");
            metrics::record_reconciliation_error("monitor", err.kind(), Duration::ZERO);
        } else if record.release_state != state {
            debug!(
                deployment = %record.name,
                from = ?record.release_state,
                to = ?state,
                "Release state changed"
            );
        }

        self.registry
            .update(&record.name, |r| {
                // The record may have moved on while the status call was in flight
                if !matches!(r.phase, Phase::Ready | Phase::Failed) {
                    return;
                }
                r.release_state = state;
                r.last_checked_at = Some(Utc::now());
                if lost && r.phase == Phase::Ready {
                    r.phase = Phase::Failed;
                    r.message = Some(format!("release reported {state:?} while ready"));
                    r.error_kind = Some("DeploymentFailed".to_string());
                }
            })
            .await;
        true
    }

    /// Run [`Reconciler::check_readiness_once`] every `interval`, forever.
    pub async fn run_readiness_monitor(self: Arc<Self>, interval: Duration) {
        info!(interval = ?interval, "Starting readiness monitor");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let start = Instant::now();
            let checked = self.check_readiness_once().await;
            debug!(checked, elapsed = ?start.elapsed(), "Readiness check complete");
        }
    }

    /// Retry teardowns that did not finish.
    ///
    /// Covers deletions whose cleanup timed out and `Failed` deployments whose release
    /// rollback was cut short. Deployments whose pipeline is busy are left for the next
    /// pass. Returns the number of teardowns retried.
    pub async fn sweep_once(&self) -> usize {
        let mut retried = 0;

        for record in self.registry.list().await {
            if stalled_teardown(&record).is_none() {
                continue;
            }
            let Some(lock) = self.registry.lock_for(&record.name).await else {
                continue;
            };
            let Ok(_guard) = lock.try_lock() else {
                debug!(deployment = %record.name, "Teardown busy, skipping sweep");
                continue;
            };
            // Re-read under the lock; a pipeline may have finished in between
            let Some(stall) = self
                .registry
                .get(&record.name)
                .await
                .as_ref()
                .and_then(stalled_teardown)
            else {
                continue;
            };

            match stall {
                StalledTeardown::Deletion => {
                    info!(deployment = %record.name, "Retrying stalled teardown");
                    self.delete_pipeline(&record.name).await;
                }
                StalledTeardown::Rollback => {
                    info!(deployment = %record.name, "Retrying stalled rollback");
                    self.rollback_release(&record.name).await;
                }
            }
            retried += 1;
        }

        if retried > 0 {
            self.refresh_phase_gauge().await;
        }
        retried
    }

    /// Run [`Reconciler::sweep_once`] every `interval`, forever.
    pub async fn run_cleanup_sweep(self: Arc<Self>, interval: Duration) {
        info!(interval = ?interval, "Starting cleanup sweep");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let retried = self.sweep_once().await;
            if retried > 0 {
                info!(retried, "Cleanup sweep complete");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StalledTeardown {
    /// Deletion hit the cleanup timeout
    Deletion,
    /// Release rollback after a failed connection did not finish
    Rollback,
}

fn stalled_teardown(record: &DeploymentRecord) -> Option<StalledTeardown> {
    match record.phase {
        Phase::Deleting if record.error_kind.as_deref() == Some("CleanupTimeout") => {
            Some(StalledTeardown::Deletion)
        }
        // A registered connection must go first, which only the delete pipeline does
        Phase::Failed
            if record.release_state == ReleaseState::Uninstalling
                && record.connection_state != ConnectionState::Created =>
        {
            Some(StalledTeardown::Rollback)
        }
        _ => None,
    }
}
