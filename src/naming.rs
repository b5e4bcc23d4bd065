// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Resource naming engine.
//!
//! Maps a `(project_name, git_branch)` pair onto the two identifiers every deployment
//! is known by:
//!
//! - the Kubernetes release name, `dbt-server-<project>-<branch>` (DNS-1123 safe)
//! - the Airflow connection id, `<project>_<branch>`
//!
//! Both renderings are pure functions of the input: no I/O, no randomness, so the same
//! pair always lands on the same release and the same connection.
//!
//! # Example
//!
//! ```rust
//! use dbt_provisioner::naming::derive_names;
//!
//! let names = derive_names("Test-Project!", Some("Feature/123")).unwrap();
//! assert_eq!(names.k8s_name, "dbt-server-test-project-feature-123");
//! assert_eq!(names.connection_id, "test_project_feature_123");
//! ```

use crate::constants::{
    K8S_NAME_PREFIX, MAX_CONNECTION_ID_LEN, MAX_K8S_NAME_LEN, NAME_HASH_LEN,
};
use crate::errors::{ProvisionError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const K8S_SEPARATOR: char = '-';
const CONNECTION_SEPARATOR: char = '_';

/// Identifiers derived from a deployment request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceNames {
    /// Release name used for every Kubernetes object of the deployment
    pub k8s_name: String,
    /// Airflow connection id
    pub connection_id: String,
    /// Trimmed, lowercased project name before substitution
    pub project_key: String,
    /// Trimmed, lowercased branch before substitution (`None` when omitted or blank)
    pub branch_key: Option<String>,
}

impl ResourceNames {
    /// Whether both name sets were derived from the same normalized input.
    ///
    /// Two distinct inputs can substitute to the same rendering (`a-b` and `a_b`);
    /// the registry uses this to report such collisions instead of sharing a release.
    #[must_use]
    pub fn same_origin(&self, other: &Self) -> bool {
        self.project_key == other.project_key && self.branch_key == other.branch_key
    }
}

/// Derive the Kubernetes release name and Airflow connection id.
///
/// # Errors
///
/// Returns [`ProvisionError::InvalidInput`] when the project name contains no
/// alphanumeric character after normalization.
pub fn derive_names(project_name: &str, git_branch: Option<&str>) -> Result<ResourceNames> {
    let project_key = normalize(project_name);
    let branch_key = git_branch.map(normalize).filter(|b| !b.is_empty());

    let project_k8s = substitute(&project_key, K8S_SEPARATOR);
    if project_k8s.is_empty() {
        return Err(ProvisionError::invalid(format!(
            "project_name '{project_name}' is empty after normalization"
        )));
    }
    let project_conn = substitute(&project_key, CONNECTION_SEPARATOR);

    // A branch made only of punctuation contributes nothing and is dropped
    let branch_k8s = branch_key
        .as_deref()
        .map(|b| substitute(b, K8S_SEPARATOR))
        .filter(|b| !b.is_empty());
    let branch_conn = branch_key
        .as_deref()
        .map(|b| substitute(b, CONNECTION_SEPARATOR))
        .filter(|b| !b.is_empty());

    let digest = short_digest(&project_key, branch_key.as_deref());

    let mut k8s_name = format!("{K8S_NAME_PREFIX}{K8S_SEPARATOR}{project_k8s}");
    if let Some(branch) = branch_k8s {
        k8s_name.push(K8S_SEPARATOR);
        k8s_name.push_str(&branch);
    }

    let mut connection_id = project_conn;
    if let Some(branch) = branch_conn {
        connection_id.push(CONNECTION_SEPARATOR);
        connection_id.push_str(&branch);
    }

    Ok(ResourceNames {
        k8s_name: bound_length(k8s_name, MAX_K8S_NAME_LEN, K8S_SEPARATOR, &digest),
        connection_id: bound_length(
            connection_id,
            MAX_CONNECTION_ID_LEN,
            CONNECTION_SEPARATOR,
            &digest,
        ),
        project_key,
        branch_key,
    })
}

/// In-cluster host name of a release's Service.
#[must_use]
pub fn service_host(k8s_name: &str, namespace: &str) -> String {
    format!("{k8s_name}.{namespace}.svc.cluster.local")
}

/// Public host name of a release exposed through the customer's ingress domain.
#[must_use]
pub fn public_host(k8s_name: &str, customer: &str, domain: &str) -> String {
    format!("{k8s_name}.{customer}.{domain}")
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Replace every character outside `[a-z0-9]` with `separator`, collapse runs of
/// separators and strip them from both ends.
fn substitute(value: &str, separator: char) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_separator = false;

    for c in value.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_separator && !out.is_empty() {
                out.push(separator);
            }
            pending_separator = false;
            out.push(c);
        } else {
            pending_separator = true;
        }
    }

    out
}

fn short_digest(project_key: &str, branch_key: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project_key.as_bytes());
    hasher.update([0u8]);
    if let Some(branch) = branch_key {
        hasher.update(branch.as_bytes());
    }
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(NAME_HASH_LEN);
    hex
}

/// Truncate `name` to `max` characters, replacing the tail with `<sep><digest>`.
///
/// Names are pure ASCII at this point, so byte slicing is safe.
fn bound_length(name: String, max: usize, separator: char, digest: &str) -> String {
    if name.len() <= max {
        return name;
    }

    let keep = max - digest.len() - 1;
    let head = name[..keep].trim_end_matches(separator);
    format!("{head}{separator}{digest}")
}

#[cfg(test)]
#[path = "naming_tests.rs"]
mod naming_tests;
