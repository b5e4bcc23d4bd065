// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory registry of deployment records.
//!
//! The registry is the only owner of [`DeploymentRecord`]s. Every entry also keeps the
//! release values it was created from and a per-name async mutex that serializes
//! pipelines for that name. The map itself sits behind an `RwLock` that is only held
//! for the duration of a lookup or a mutation, never across cluster or Airflow calls.
//!
//! Admission decisions (conflicts, busy updates, deferred deletes) are taken under the
//! write lock, so two concurrent requests for the same name can never both win.

use crate::errors::{ProvisionError, Result};
use crate::helm::{ChartValues, ReleaseState};
use crate::types::{ConnectionState, DeploymentRecord, DeploymentUpdate, Phase};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// What a delete request should trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteAction {
    /// Start the deletion pipeline now
    Start,
    /// A pipeline is running; it runs the deletion when its current step ends
    Deferred,
    /// Deletion is already running
    AlreadyDeleting,
}

struct Entry {
    record: DeploymentRecord,
    values: ChartValues,
    lock: Arc<Mutex<()>>,
}

/// Deployment records keyed by release name.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, Entry>>,
}

/// Fresh record for `values` in `phase`.
#[must_use]
pub fn new_record(values: &ChartValues, phase: Phase) -> DeploymentRecord {
    let now = Utc::now();
    DeploymentRecord {
        name: values.release.clone(),
        connection_id: values.connection_id.clone(),
        project_name: values.project_name.clone(),
        git_branch: values.git_branch.clone(),
        namespace: values.namespace.clone(),
        phase,
        release_state: ReleaseState::NotFound,
        connection_state: ConnectionState::Absent,
        image_tag: values.image.tag.clone(),
        message: None,
        error_kind: None,
        created_at: now,
        updated_at: now,
        last_checked_at: None,
        delete_requested: false,
    }
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the name of `values` for a new deployment.
    ///
    /// A `Failed` record of the same origin is replaced. Its release and connection
    /// states carry over, since those objects outlive the record.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Conflict`] when a live record holds the name, or when
    /// the name is held by a record derived from a different project and branch.
    pub async fn reserve(&self, values: ChartValues) -> Result<DeploymentRecord> {
        let mut entries = self.entries.write().await;
        let name = values.release.clone();

        let (lock, previous) = match entries.get(&name) {
            Some(existing) if !existing.values.names().same_origin(&values.names()) => {
                return Err(ProvisionError::Conflict {
                    name,
                    reason: format!(
                        "name is already used by project '{}' branch '{}'",
                        existing.values.project_name,
                        existing.values.git_branch.as_deref().unwrap_or("")
                    ),
                });
            }
            Some(existing) if existing.record.phase.is_live() => {
                return Err(ProvisionError::Conflict {
                    name,
                    reason: format!("deployment is {}", existing.record.phase.as_str()),
                });
            }
            Some(existing) => (existing.lock.clone(), Some(existing.record.clone())),
            None => (Arc::new(Mutex::new(())), None),
        };

        let mut record = new_record(&values, Phase::Requested);
        if let Some(previous) = previous {
            record.release_state = previous.release_state;
            record.connection_state = previous.connection_state;
        }
        entries.insert(
            name,
            Entry {
                record: record.clone(),
                values,
                lock,
            },
        );
        Ok(record)
    }

    /// Insert a record rebuilt from the cluster. Existing entries win.
    pub async fn adopt(&self, values: ChartValues, record: DeploymentRecord) -> bool {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&record.name) {
            return false;
        }
        entries.insert(
            record.name.clone(),
            Entry {
                record,
                values,
                lock: Arc::new(Mutex::new(())),
            },
        );
        true
    }

    pub async fn get(&self, name: &str) -> Option<DeploymentRecord> {
        self.entries.read().await.get(name).map(|e| e.record.clone())
    }

    /// Every record, sorted by name.
    pub async fn list(&self) -> Vec<DeploymentRecord> {
        let mut records: Vec<_> = self
            .entries
            .read()
            .await
            .values()
            .map(|e| e.record.clone())
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub async fn values(&self, name: &str) -> Option<ChartValues> {
        self.entries.read().await.get(name).map(|e| e.values.clone())
    }

    /// Pipeline mutex of a name.
    pub async fn lock_for(&self, name: &str) -> Option<Arc<Mutex<()>>> {
        self.entries.read().await.get(name).map(|e| e.lock.clone())
    }

    /// Mutate a record in place and bump `updated_at`.
    pub async fn update<F>(&self, name: &str, mutate: F) -> Option<DeploymentRecord>
    where
        F: FnOnce(&mut DeploymentRecord),
    {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(name)?;
        mutate(&mut entry.record);
        entry.record.updated_at = Utc::now();
        Some(entry.record.clone())
    }

    /// Apply an update to the stored values and move the record back to `Requested`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotFound`] for unknown names and
    /// [`ProvisionError::Conflict`] unless the record is `Ready` or `Failed`.
    pub async fn begin_update(
        &self,
        name: &str,
        update: &DeploymentUpdate,
    ) -> Result<DeploymentRecord> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(name).ok_or_else(|| ProvisionError::NotFound {
            name: name.to_string(),
        })?;

        if !matches!(entry.record.phase, Phase::Ready | Phase::Failed)
            || entry.record.delete_requested
        {
            return Err(ProvisionError::Conflict {
                name: name.to_string(),
                reason: format!(
                    "deployment is {}, updates need Ready or Failed",
                    entry.record.phase.as_str()
                ),
            });
        }

        entry.values.apply_update(update);
        let record = &mut entry.record;
        record.phase = Phase::Requested;
        record.image_tag.clone_from(&entry.values.image.tag);
        record.message = Some("update requested".to_string());
        record.error_kind = None;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    /// Register a delete request.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotFound`] for unknown names.
    pub async fn request_delete(&self, name: &str) -> Result<(DeploymentRecord, DeleteAction)> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(name).ok_or_else(|| ProvisionError::NotFound {
            name: name.to_string(),
        })?;
        let record = &mut entry.record;

        let action = match record.phase {
            Phase::Deleting | Phase::Deleted => DeleteAction::AlreadyDeleting,
            phase if phase.is_in_progress() => {
                record.delete_requested = true;
                record.message = Some("delete requested, waiting for the current step".into());
                DeleteAction::Deferred
            }
            _ => {
                record.phase = Phase::Deleting;
                record.message = Some("delete requested".to_string());
                DeleteAction::Start
            }
        };
        record.updated_at = Utc::now();
        Ok((record.clone(), action))
    }

    /// Whether a delete arrived for a name while its pipeline was running.
    pub async fn delete_requested(&self, name: &str) -> bool {
        self.entries
            .read()
            .await
            .get(name)
            .is_some_and(|e| e.record.delete_requested)
    }

    pub async fn remove(&self, name: &str) -> Option<DeploymentRecord> {
        self.entries.write().await.remove(name).map(|e| e.record)
    }

    /// Number of records per phase, every phase included.
    pub async fn phase_counts(&self) -> Vec<(Phase, usize)> {
        let entries = self.entries.read().await;
        Phase::ALL
            .iter()
            .map(|phase| {
                (
                    *phase,
                    entries.values().filter(|e| e.record.phase == *phase).count(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod registry_tests;
