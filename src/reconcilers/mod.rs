// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Deployment reconciliation.
//!
//! The [`Reconciler`] turns accepted API requests into cluster and Airflow state:
//!
//! 1. **Admit** - validate, derive names, claim the name in the [`registry`]
//! 2. **Deploy** - install or upgrade the release and wait for readiness
//! 3. **Register** - create the Airflow connection, rolling the release back on failure
//! 4. **Observe** - the readiness monitor keeps `release_state` current
//!
//! Deletion runs the other way: the connection goes first, then the release and its
//! persistent volume claims. Teardowns that time out are retried by the cleanup sweep.
//!
//! # Example
//!
//! ```rust,no_run
//! use dbt_provisioner::airflow::AirflowClient;
//! use dbt_provisioner::helm::{kube_client::KubeReleaseClient, HelmOrchestrator};
//! use dbt_provisioner::reconcilers::Reconciler;
//! use dbt_provisioner::types::DeploymentRequest;
//! use std::sync::Arc;
//!
//! # async fn example(client: kube::Client, airflow: AirflowClient) -> anyhow::Result<()> {
//! let helm = HelmOrchestrator::new(Arc::new(KubeReleaseClient::new(client, "dbt-server")));
//! let reconciler = Arc::new(Reconciler::new(helm, Arc::new(airflow), "dbt-server"));
//!
//! let record = reconciler
//!     .submit(DeploymentRequest::new("demo", Some("main")))
//!     .await?;
//! assert_eq!(record.name, "dbt-server-demo-main");
//! # Ok(())
//! # }
//! ```

pub mod deployment;
pub mod monitor;
pub mod registry;
pub mod retry;

pub use deployment::Reconciler;
pub use registry::{DeleteAction, Registry};
