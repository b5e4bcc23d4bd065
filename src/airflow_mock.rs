// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory [`ConnectionManager`] for unit tests.

use super::ConnectionManager;
use crate::errors::{ProvisionError, Result};
use crate::helm::mock::EventLog;
use crate::types::Credentials;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Default)]
struct MockState {
    /// connection id -> target URL
    connections: HashMap<String, String>,
    fail_create: bool,
    fail_delete: bool,
}

pub(crate) struct MockConnectionManager {
    state: Mutex<MockState>,
    events: EventLog,
    gate: Option<Arc<Notify>>,
}

impl MockConnectionManager {
    pub(crate) fn new() -> Self {
        Self::with_events(EventLog::default())
    }

    pub(crate) fn with_events(events: EventLog) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            events,
            gate: None,
        }
    }

    pub(crate) fn fail_create(self) -> Self {
        self.state.lock().unwrap().fail_create = true;
        self
    }

    pub(crate) fn set_fail_create(&self, fail: bool) {
        self.state.lock().unwrap().fail_create = fail;
    }

    pub(crate) fn fail_delete(self) -> Self {
        self.state.lock().unwrap().fail_delete = true;
        self
    }

    /// Hold every `create_connection` call until `gate` is notified.
    pub(crate) fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn target(&self, connection_id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .connections
            .get(connection_id)
            .cloned()
    }

    fn log(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl ConnectionManager for MockConnectionManager {
    async fn create_connection(
        &self,
        connection_id: &str,
        target_url: &str,
        _credentials: &Credentials,
    ) -> Result<()> {
        self.log(format!("connection:create:{connection_id}"));
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(ProvisionError::ConnectionError {
                connection_id: connection_id.to_string(),
                reason: "AirflowBadRequest: mock rejection".to_string(),
            });
        }
        state
            .connections
            .insert(connection_id.to_string(), target_url.to_string());
        Ok(())
    }

    async fn delete_connection(&self, connection_id: &str) -> Result<()> {
        self.log(format!("connection:delete:{connection_id}"));
        let mut state = self.state.lock().unwrap();
        if state.fail_delete {
            return Err(ProvisionError::ConnectionError {
                connection_id: connection_id.to_string(),
                reason: "GatewayError: mock outage".to_string(),
            });
        }
        state.connections.remove(connection_id);
        Ok(())
    }
}
