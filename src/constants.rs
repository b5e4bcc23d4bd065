// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the dbt provisioner.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// Service Identity
// ============================================================================

/// Service name reported by the status endpoint and used as the SSA field manager
pub const SERVICE_NAME: &str = "dbt-provisioner";

/// Field manager name for server-side apply
pub const FIELD_MANAGER: &str = "dbt-provisioner";

/// Default namespace dbt servers are deployed into
pub const DEFAULT_NAMESPACE: &str = "dbt-server";

/// Default listen address for the HTTP API
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:6798";

/// Browser origins allowed by default (any)
pub const DEFAULT_CORS_ORIGINS: &str = "*";

/// How long browsers may cache a CORS preflight answer (1 hour)
pub const CORS_MAX_AGE_SECS: u64 = 3600;

/// Default number of Tokio worker threads
pub const DEFAULT_WORKER_THREADS: usize = 4;

// ============================================================================
// Naming Constants
// ============================================================================

/// Prefix of every Kubernetes release name
pub const K8S_NAME_PREFIX: &str = "dbt-server";

/// Maximum length of a release name.
///
/// StatefulSet names end up in the `controller-revision-hash` label (63 chars max)
/// together with an 11 character hash suffix.
pub const MAX_K8S_NAME_LEN: usize = 52;

/// Maximum length of an Airflow connection id
pub const MAX_CONNECTION_ID_LEN: usize = 250;

/// Number of hex characters of the SHA-256 digest appended to truncated names
pub const NAME_HASH_LEN: usize = 8;

/// Suffix of the `ConfigMap` that stores the release record
pub const RELEASE_RECORD_SUFFIX: &str = "release";

// ============================================================================
// dbt Server Workload Constants
// ============================================================================

/// Container name of the dbt API server
pub const CONTAINER_NAME_DBT_SERVER: &str = "dbt-server";

/// Port the dbt API server listens on inside the pod
pub const DBT_SERVER_CONTAINER_PORT: u16 = 8580;

/// Port exposed by the Service in front of the dbt API server
pub const DBT_SERVER_SERVICE_PORT: u16 = 80;

/// Path the Airflow connection points at
pub const DBT_INVOCATIONS_PATH: &str = "/invocations";

/// Mount path of the persistent dbt workspace volume
pub const DBT_WORKSPACE_PATH: &str = "/data";

/// Prefix of the persistent workspace volume claim template
pub const VOLUME_PREFIX_WORKSPACE: &str = "dbt-workspace";

/// Prefix of the basic-auth credentials secret
pub const SECRET_PREFIX_CREDENTIALS: &str = "dbt-server-credentials";

/// Readiness probe initial delay
pub const READINESS_INITIAL_DELAY_SECS: i32 = 15;

/// Readiness probe period
pub const READINESS_PERIOD_SECS: i32 = 10;

/// Liveness probe initial delay
pub const LIVENESS_INITIAL_DELAY_SECS: i32 = 60;

/// Liveness probe period
pub const LIVENESS_PERIOD_SECS: i32 = 30;

/// Default container image repository
pub const DEFAULT_IMAGE_REPOSITORY: &str =
    "europe-central2-docker.pkg.dev/fast-bi-common/bi-platform/";

/// Default container image name
pub const DEFAULT_IMAGE_NAME: &str = "tsb-dbt-core-api-server";

/// Default container image tag
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// Default CPU request
pub const DEFAULT_CPU_REQUEST: &str = "1500m";

/// Default memory request
pub const DEFAULT_MEMORY_REQUEST: &str = "2Gi";

/// Default CPU limit
pub const DEFAULT_CPU_LIMIT: &str = "3500m";

/// Default memory limit
pub const DEFAULT_MEMORY_LIMIT: &str = "6Gi";

/// Default workspace volume size
pub const DEFAULT_STORAGE_SIZE: &str = "1Gi";

/// Default number of dbt server worker processes
pub const DEFAULT_WORKER_NUM: u32 = 10;

/// Default maximum concurrent requests per worker
pub const DEFAULT_MAX_REQUESTS: u32 = 35;

// ============================================================================
// Timing Constants
// ============================================================================

/// How long `deploy` waits for the release to become ready (10 minutes)
pub const DEFAULT_DEPLOY_TIMEOUT_SECS: u64 = 600;

/// How long `destroy` waits for PVCs to be reclaimed (2 minutes)
pub const DEFAULT_CLEANUP_TIMEOUT_SECS: u64 = 120;

/// Interval between release status polls while waiting
pub const RELEASE_POLL_INTERVAL_SECS: u64 = 5;

/// Interval of the background readiness monitor
pub const DEFAULT_READINESS_INTERVAL_SECS: u64 = 30;

/// Interval of the background cleanup sweep (5 minutes)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Maximum attempts for a retried call (initial attempt included)
pub const MAX_RETRY_ATTEMPTS: u32 = 5;

/// Timeout for a single Airflow API request
pub const AIRFLOW_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Delay between attempts to adopt existing releases at start-up
pub const ADOPTION_RETRY_INTERVAL_SECS: u64 = 10;

/// Release status queries in flight at once during a readiness check
pub const READINESS_CHECK_CONCURRENCY: usize = 8;
