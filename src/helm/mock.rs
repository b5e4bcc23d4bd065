// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory [`ReleaseClient`] for unit tests.

use super::{ChartValues, RecordStatus, ReleaseClient, ReleaseError, ReleaseInfo};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Shared, ordered log of external calls made by mocks.
pub(crate) type EventLog = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
struct MockState {
    releases: HashMap<String, ReleaseInfo>,
    pvcs: HashMap<String, Vec<String>>,
    apply_calls: u32,
    transient_apply_failures: u32,
    fail_apply: Option<u16>,
    never_ready: bool,
    sticky_pvcs: bool,
}

pub(crate) struct MockReleaseClient {
    state: Mutex<MockState>,
    events: EventLog,
}

pub(crate) fn api_error(code: u16) -> ReleaseError {
    ReleaseError::Kube(kube::Error::Api(Box::new(kube::core::Status {
        status: Some(kube::core::response::StatusSummary::Failure),
        metadata: None,
        details: None,
        message: format!("mock API error {code}"),
        reason: if code >= 500 {
            "ServiceUnavailable".to_string()
        } else {
            "Invalid".to_string()
        },
        code,
    })))
}

impl MockReleaseClient {
    pub(crate) fn new() -> Self {
        Self::with_events(EventLog::default())
    }

    pub(crate) fn with_events(events: EventLog) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            events,
        }
    }

    pub(crate) fn fail_apply_with(self, code: u16) -> Self {
        self.state.lock().unwrap().fail_apply = Some(code);
        self
    }

    pub(crate) fn transient_apply_failures(self, count: u32) -> Self {
        self.state.lock().unwrap().transient_apply_failures = count;
        self
    }

    pub(crate) fn never_ready(self) -> Self {
        self.state.lock().unwrap().never_ready = true;
        self
    }

    pub(crate) fn sticky_pvcs(self) -> Self {
        self.state.lock().unwrap().sticky_pvcs = true;
        self
    }

    pub(crate) fn set_sticky_pvcs(&self, sticky: bool) {
        self.state.lock().unwrap().sticky_pvcs = sticky;
    }

    pub(crate) fn release(&self, name: &str) -> Option<ReleaseInfo> {
        self.state.lock().unwrap().releases.get(name).cloned()
    }

    pub(crate) fn insert_release(&self, values: ChartValues, status: RecordStatus) {
        let mut state = self.state.lock().unwrap();
        let name = values.release.clone();
        state
            .pvcs
            .insert(name.clone(), vec![format!("dbt-workspace-{name}-0")]);
        state.releases.insert(
            name.clone(),
            ReleaseInfo {
                name,
                namespace: values.namespace.clone(),
                revision: 1,
                status,
                description: "inserted by test".to_string(),
                updated_at: Utc::now(),
                values,
            },
        );
    }

    pub(crate) fn apply_calls(&self) -> u32 {
        self.state.lock().unwrap().apply_calls
    }

    pub(crate) fn pvcs(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .pvcs
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    fn log(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl ReleaseClient for MockReleaseClient {
    async fn get_release(&self, name: &str) -> Result<Option<ReleaseInfo>, ReleaseError> {
        Ok(self.release(name))
    }

    async fn apply_release(
        &self,
        values: &ChartValues,
        revision: u32,
        status: RecordStatus,
    ) -> Result<(), ReleaseError> {
        let name = values.release.clone();
        self.log(format!("release:apply:{name}"));

        let mut state = self.state.lock().unwrap();
        state.apply_calls += 1;
        if state.transient_apply_failures > 0 {
            state.transient_apply_failures -= 1;
            return Err(api_error(503));
        }
        if let Some(code) = state.fail_apply {
            return Err(api_error(code));
        }

        state
            .pvcs
            .insert(name.clone(), vec![format!("dbt-workspace-{name}-0")]);
        state.releases.insert(
            name.clone(),
            ReleaseInfo {
                name,
                namespace: values.namespace.clone(),
                revision,
                status,
                description: "applied".to_string(),
                updated_at: Utc::now(),
                values: values.clone(),
            },
        );
        Ok(())
    }

    async fn set_status(
        &self,
        name: &str,
        status: RecordStatus,
        description: &str,
    ) -> Result<(), ReleaseError> {
        if let Some(info) = self.state.lock().unwrap().releases.get_mut(name) {
            info.status = status;
            info.description = description.to_string();
        }
        Ok(())
    }

    async fn workload_ready(&self, _name: &str) -> Result<bool, ReleaseError> {
        Ok(!self.state.lock().unwrap().never_ready)
    }

    async fn uninstall(&self, name: &str) -> Result<(), ReleaseError> {
        self.log(format!("release:uninstall:{name}"));
        Ok(())
    }

    async fn delete_pvcs(&self, name: &str) -> Result<(), ReleaseError> {
        let mut state = self.state.lock().unwrap();
        if !state.sticky_pvcs {
            state.pvcs.remove(name);
        }
        Ok(())
    }

    async fn remaining_pvcs(&self, name: &str) -> Result<Vec<String>, ReleaseError> {
        Ok(self.pvcs(name))
    }

    async fn delete_record(&self, name: &str) -> Result<(), ReleaseError> {
        self.state.lock().unwrap().releases.remove(name);
        Ok(())
    }

    async fn list_releases(&self) -> Result<Vec<ReleaseInfo>, ReleaseError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .releases
            .values()
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), ReleaseError> {
        Ok(())
    }
}
