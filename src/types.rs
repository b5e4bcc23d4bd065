// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Request, update and record types exchanged over the HTTP API.
//!
//! A [`DeploymentRequest`] is what CI/CD submits. After validation it is turned into
//! [`ChartValues`](crate::helm::ChartValues) for the release and a
//! [`DeploymentRecord`] that tracks the pipeline. Records are the only thing the API
//! ever returns, so credentials and repository secrets never leave the service.

use crate::constants::{
    DEFAULT_CPU_LIMIT, DEFAULT_CPU_REQUEST, DEFAULT_IMAGE_NAME, DEFAULT_IMAGE_REPOSITORY,
    DEFAULT_IMAGE_TAG, DEFAULT_MAX_REQUESTS, DEFAULT_MEMORY_LIMIT, DEFAULT_MEMORY_REQUEST,
    DEFAULT_STORAGE_SIZE, DEFAULT_WORKER_NUM,
};
use crate::errors::{ProvisionError, Result};
use crate::helm::ReleaseState;
use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Prefix of generated basic-auth user names
const GENERATED_USER_PREFIX: &str = "dbt_server_agent_";

/// Random suffix length of generated user names
const GENERATED_USER_SUFFIX_LEN: usize = 5;

/// Length of generated basic-auth passwords
const GENERATED_PASSWORD_LEN: usize = 32;

const LOWER_ALNUM: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

// ============================================================================
// Enumerations
// ============================================================================

/// Target environment of a dbt server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// End-to-end testing
    E2e,
    /// Production
    #[default]
    Prod,
}

impl Environment {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E2e => "e2e",
            Self::Prod => "prod",
        }
    }
}

/// Data warehouse the dbt project targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DatawarehouseType {
    #[default]
    #[serde(rename = "")]
    Unspecified,
    Bigquery,
    Snowflake,
    Redshift,
    Fabric,
}

impl DatawarehouseType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "",
            Self::Bigquery => "bigquery",
            Self::Snowflake => "snowflake",
            Self::Redshift => "redshift",
            Self::Fabric => "fabric",
        }
    }
}

/// Log level of the dbt server's Celery workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum CeleryLogLevel {
    Debug,
    Info,
    Warning,
    #[default]
    Error,
    Critical,
}

impl CeleryLogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

/// Lifecycle phase of a deployment record.
///
/// ```text
/// Requested -> Naming -> HelmDeploying -> ConnectionCreating -> Ready
///      any step -> Failed          Ready | Failed -> Deleting -> Deleted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Phase {
    Requested,
    Naming,
    HelmDeploying,
    ConnectionCreating,
    Ready,
    Failed,
    Deleting,
    Deleted,
}

impl Phase {
    /// Every phase, in pipeline order.
    pub const ALL: [Phase; 8] = [
        Phase::Requested,
        Phase::Naming,
        Phase::HelmDeploying,
        Phase::ConnectionCreating,
        Phase::Ready,
        Phase::Failed,
        Phase::Deleting,
        Phase::Deleted,
    ];

    /// Whether a record in this phase still owns its name.
    ///
    /// Only `Failed` and `Deleted` records may be replaced by a new create.
    #[must_use]
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Failed | Self::Deleted)
    }

    /// Whether a pipeline is currently running for a record in this phase.
    #[must_use]
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            Self::Requested
                | Self::Naming
                | Self::HelmDeploying
                | Self::ConnectionCreating
                | Self::Deleting
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "Requested",
            Self::Naming => "Naming",
            Self::HelmDeploying => "HelmDeploying",
            Self::ConnectionCreating => "ConnectionCreating",
            Self::Ready => "Ready",
            Self::Failed => "Failed",
            Self::Deleting => "Deleting",
            Self::Deleted => "Deleted",
        }
    }
}

/// State of the Airflow connection of a deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum ConnectionState {
    #[default]
    Absent,
    Created,
    Failed,
}

// ============================================================================
// Request Types
// ============================================================================

/// Container image of the dbt API server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ImageSpec {
    #[schema(example = "europe-central2-docker.pkg.dev/fast-bi-common/bi-platform/")]
    pub repository: String,
    #[schema(example = "tsb-dbt-core-api-server")]
    pub name: String,
    #[schema(example = "v0.0.7.1")]
    pub tag: String,
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self {
            repository: DEFAULT_IMAGE_REPOSITORY.to_string(),
            name: DEFAULT_IMAGE_NAME.to_string(),
            tag: DEFAULT_IMAGE_TAG.to_string(),
        }
    }
}

impl ImageSpec {
    /// Full image reference, `<repository>/<name>:<tag>`.
    #[must_use]
    pub fn reference(&self) -> String {
        let repository = self.repository.trim_end_matches('/');
        format!("{repository}/{}:{}", self.name, self.tag)
    }
}

/// Compute and storage sizing of the dbt API server pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ResourceSpec {
    #[schema(example = "1500m")]
    pub cpu_request: String,
    #[schema(example = "2Gi")]
    pub memory_request: String,
    #[schema(example = "3500m")]
    pub cpu_limit: String,
    #[schema(example = "6Gi")]
    pub memory_limit: String,
    /// Size of the persistent workspace volume
    #[schema(example = "1Gi")]
    pub storage_size: String,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            cpu_request: DEFAULT_CPU_REQUEST.to_string(),
            memory_request: DEFAULT_MEMORY_REQUEST.to_string(),
            cpu_limit: DEFAULT_CPU_LIMIT.to_string(),
            memory_limit: DEFAULT_MEMORY_LIMIT.to_string(),
            storage_size: DEFAULT_STORAGE_SIZE.to_string(),
        }
    }
}

/// Request to provision a dbt API server for a project branch.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeploymentRequest {
    /// Name of the dbt project
    #[schema(example = "fastbi-demo-project")]
    pub project_name: String,
    /// Git branch the server is built for; omitted or blank means the default branch
    #[serde(default)]
    #[schema(example = "DD_250507_6MBRB")]
    pub git_branch: Option<String>,
    #[serde(default)]
    #[schema(example = "fastbi")]
    pub customer: Option<String>,
    #[serde(default)]
    #[schema(example = "fast.bi")]
    pub domain: Option<String>,
    #[serde(default)]
    pub environment: Environment,
    /// Expose the server through the customer's ingress domain
    #[serde(default)]
    pub https_enabled: bool,
    #[serde(default)]
    pub dbt_repo_name: String,
    /// Git repository URL with credentials
    #[serde(default)]
    pub gitlink_secret: String,
    #[serde(default)]
    pub datawarehouse_type: DatawarehouseType,
    #[serde(default)]
    pub image: ImageSpec,
    #[serde(default)]
    pub resources: ResourceSpec,
    #[serde(default = "default_worker_num")]
    #[schema(minimum = 1, maximum = 20)]
    pub worker_num: u32,
    #[serde(default = "default_max_requests")]
    #[schema(minimum = 1, maximum = 100)]
    pub max_requests: u32,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub celery_log_level: CeleryLogLevel,
    /// Generated as `dbt_server_agent_<random>` when omitted
    #[serde(default)]
    pub basic_auth_user: Option<String>,
    /// Generated when omitted
    #[serde(default)]
    pub basic_auth_password: Option<String>,
}

fn default_worker_num() -> u32 {
    DEFAULT_WORKER_NUM
}

fn default_max_requests() -> u32 {
    DEFAULT_MAX_REQUESTS
}

impl DeploymentRequest {
    /// Minimal request for a project branch, every other field at its default.
    #[must_use]
    pub fn new(project_name: impl Into<String>, git_branch: Option<&str>) -> Self {
        Self {
            project_name: project_name.into(),
            git_branch: git_branch.map(str::to_string),
            customer: None,
            domain: None,
            environment: Environment::default(),
            https_enabled: false,
            dbt_repo_name: String::new(),
            gitlink_secret: String::new(),
            datawarehouse_type: DatawarehouseType::default(),
            image: ImageSpec::default(),
            resources: ResourceSpec::default(),
            worker_num: DEFAULT_WORKER_NUM,
            max_requests: DEFAULT_MAX_REQUESTS,
            debug: false,
            celery_log_level: CeleryLogLevel::default(),
            basic_auth_user: None,
            basic_auth_password: None,
        }
    }

    /// Check field-level constraints.
    ///
    /// The project name itself is checked by the naming engine.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidInput`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if let Some(customer) = &self.customer {
            check_len("customer", customer, 1, 63)?;
        }
        if let Some(domain) = &self.domain {
            check_len("domain", domain, 1, 63)?;
        }
        if self.https_enabled && (self.customer.is_none() || self.domain.is_none()) {
            return Err(ProvisionError::invalid(
                "https_enabled requires both customer and domain",
            ));
        }
        check_len("dbt_repo_name", &self.dbt_repo_name, 0, 255)?;
        check_len("gitlink_secret", &self.gitlink_secret, 0, 2048)?;

        check_len("image.repository", &self.image.repository, 1, 255)?;
        check_len("image.name", &self.image.name, 1, 255)?;
        check_len("image.tag", &self.image.tag, 1, 255)?;

        check_cpu("resources.cpu_request", &self.resources.cpu_request)?;
        check_cpu("resources.cpu_limit", &self.resources.cpu_limit)?;
        check_memory("resources.memory_request", &self.resources.memory_request)?;
        check_memory("resources.memory_limit", &self.resources.memory_limit)?;
        check_memory("resources.storage_size", &self.resources.storage_size)?;

        check_range("worker_num", self.worker_num, 1, 20)?;
        check_range("max_requests", self.max_requests, 1, 100)?;

        if let Some(user) = &self.basic_auth_user {
            check_len("basic_auth_user", user, 1, 63)?;
        }
        if let Some(password) = &self.basic_auth_password {
            check_len("basic_auth_password", password, 8, 63)?;
        }
        Ok(())
    }

    /// Credentials from the request, generating whichever half is missing.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials {
            user: self
                .basic_auth_user
                .clone()
                .filter(|u| !u.is_empty())
                .unwrap_or_else(generate_user),
            password: self
                .basic_auth_password
                .clone()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(generate_password),
        }
    }
}

/// Partial update applied as an upgrade of an existing release.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct DeploymentUpdate {
    /// New image tag
    #[serde(default)]
    #[schema(example = "v0.0.8")]
    pub tag: Option<String>,
    #[serde(default)]
    #[schema(minimum = 1, maximum = 20)]
    pub worker_num: Option<u32>,
    #[serde(default)]
    #[schema(minimum = 1, maximum = 100)]
    pub max_requests: Option<u32>,
    #[serde(default)]
    pub debug: Option<bool>,
    #[serde(default)]
    pub celery_log_level: Option<CeleryLogLevel>,
}

impl DeploymentUpdate {
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidInput`] when the update is empty or a field is
    /// out of range.
    pub fn validate(&self) -> Result<()> {
        if self.tag.is_none()
            && self.worker_num.is_none()
            && self.max_requests.is_none()
            && self.debug.is_none()
            && self.celery_log_level.is_none()
        {
            return Err(ProvisionError::invalid("update contains no fields"));
        }
        if let Some(tag) = &self.tag {
            check_len("tag", tag, 1, 255)?;
        }
        if let Some(worker_num) = self.worker_num {
            check_range("worker_num", worker_num, 1, 20)?;
        }
        if let Some(max_requests) = self.max_requests {
            check_range("max_requests", max_requests, 1, 100)?;
        }
        Ok(())
    }
}

/// Basic-auth credentials of a dbt API server.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// Record Types
// ============================================================================

/// Observable state of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DeploymentRecord {
    /// Kubernetes release name, the record's key
    #[schema(example = "dbt-server-test-project-feature-123")]
    pub name: String,
    #[schema(example = "test_project_feature_123")]
    pub connection_id: String,
    pub project_name: String,
    pub git_branch: Option<String>,
    pub namespace: String,
    pub phase: Phase,
    pub release_state: ReleaseState,
    pub connection_state: ConnectionState,
    /// Image tag of the last applied release
    pub image_tag: String,
    /// Human-readable progress or failure detail
    pub message: Option<String>,
    /// Error kind of the last failure
    pub error_kind: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last time the readiness monitor queried the release
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Set when a delete arrived while a pipeline was running
    pub delete_requested: bool,
}

// ============================================================================
// Helpers
// ============================================================================

fn check_len(field: &str, value: &str, min: usize, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(ProvisionError::invalid(format!(
            "{field} must be between {min} and {max} characters, got {len}"
        )));
    }
    Ok(())
}

fn check_range(field: &str, value: u32, min: u32, max: u32) -> Result<()> {
    if !(min..=max).contains(&value) {
        return Err(ProvisionError::invalid(format!(
            "{field} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(())
}

/// `^\d+m?$`, e.g. `1500m` or `2`
fn check_cpu(field: &str, value: &str) -> Result<()> {
    let digits = value.strip_suffix('m').unwrap_or(value);
    if is_digits(digits) {
        Ok(())
    } else {
        Err(ProvisionError::invalid(format!(
            "{field} must be a CPU quantity like '1500m' or '2', got '{value}'"
        )))
    }
}

/// `^\d+[MG]i$`, e.g. `512Mi` or `2Gi`
fn check_memory(field: &str, value: &str) -> Result<()> {
    let digits = value
        .strip_suffix("Mi")
        .or_else(|| value.strip_suffix("Gi"));
    if digits.is_some_and(is_digits) {
        Ok(())
    } else {
        Err(ProvisionError::invalid(format!(
            "{field} must be a quantity like '512Mi' or '2Gi', got '{value}'"
        )))
    }
}

fn is_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

fn generate_user() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..GENERATED_USER_SUFFIX_LEN)
        .map(|_| char::from(LOWER_ALNUM[rng.random_range(0..LOWER_ALNUM.len())]))
        .collect();
    format!("{GENERATED_USER_PREFIX}{suffix}")
}

fn generate_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;
