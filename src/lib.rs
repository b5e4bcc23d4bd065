// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # dbt-provisioner - dbt API servers on demand
//!
//! Provisions pre-warmed dbt API servers in a Kubernetes namespace and registers
//! each one as an HTTP connection in Airflow, so DAGs can reach a per-branch server
//! by connection id.
//!
//! ## Overview
//!
//! A deployment request names a project, an optional git branch and an optional
//! environment. From it the provisioner:
//!
//! - derives a DNS-safe release name and an Airflow connection id
//! - installs (or upgrades) a chart release with generated basic-auth credentials
//! - registers the in-cluster service URL with Airflow
//! - watches the release and tears everything down on delete, PVCs included
//!
//! ## Modules
//!
//! - [`naming`] - Release name and connection id derivation
//! - [`helm`] - Release install, upgrade, status and uninstall
//! - [`airflow`] - Airflow connection registry client
//! - [`reconcilers`] - Deployment lifecycle pipelines and background loops
//! - [`api`] - Authenticated HTTP API, probes and metrics
//! - [`config`] - Command line and environment configuration
//!
//! ## Example
//!
//! ```rust
//! use dbt_provisioner::naming::derive_names;
//!
//! let names = derive_names("Test-Project!", Some("Feature/123")).unwrap();
//! assert_eq!(names.k8s_name, "dbt-server-test-project-feature-123");
//! assert_eq!(names.connection_id, "test_project_feature_123");
//! ```

pub mod airflow;
pub mod api;
pub mod config;
pub mod constants;
pub mod errors;
pub mod helm;
pub mod http_errors;
pub mod labels;
pub mod metrics;
pub mod naming;
pub mod reconcilers;
pub mod types;
