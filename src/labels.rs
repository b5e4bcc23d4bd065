// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label and annotation constants used across all release resources.
//!
//! Every object belonging to a release carries the same instance label so the release
//! can be listed, diffed and torn down with a single label selector.

use std::collections::BTreeMap;

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the component name within the architecture
pub const K8S_COMPONENT: &str = "app.kubernetes.io/component";

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the name of the application
pub const K8S_NAME: &str = "app.kubernetes.io/name";

/// Standard label for a unique name identifying the instance of an application
pub const K8S_INSTANCE: &str = "app.kubernetes.io/instance";

/// Standard label for the name of a higher-level application this one is part of
pub const K8S_PART_OF: &str = "app.kubernetes.io/part-of";

// ============================================================================
// Label Values
// ============================================================================

/// Application name for dbt API servers
pub const APP_NAME_DBT_SERVER: &str = "dbt-server";

/// Component value for the dbt API server workload
pub const COMPONENT_API_SERVER: &str = "api-server";

/// Component value for the release record
pub const COMPONENT_RELEASE_RECORD: &str = "release-record";

/// Value for `app.kubernetes.io/managed-by`
pub const MANAGED_BY_PROVISIONER: &str = "dbt-provisioner";

/// Value for `app.kubernetes.io/part-of`
pub const PART_OF_CICD: &str = "fastbi-cicd";

// ============================================================================
// Provisioner-Specific Labels and Annotations
// ============================================================================

/// Label marking release record `ConfigMap`s (mirrors Helm's `owner=helm`)
pub const RELEASE_OWNER_LABEL: &str = "owner";

/// Value of [`RELEASE_OWNER_LABEL`]
pub const RELEASE_OWNER_VALUE: &str = "dbt-provisioner";

/// Annotation carrying the normalized project name
pub const PROJECT_ANNOTATION: &str = "dbt.fast.bi/project";

/// Annotation carrying the normalized git branch
pub const BRANCH_ANNOTATION: &str = "dbt.fast.bi/git-branch";

/// Label selector matching every object of a release
#[must_use]
pub fn release_selector(release: &str) -> String {
    format!("{K8S_INSTANCE}={release}")
}

/// Label selector matching every release record managed by this service
#[must_use]
pub fn release_record_selector() -> String {
    format!("{RELEASE_OWNER_LABEL}={RELEASE_OWNER_VALUE}")
}

/// Builds the standard labels for objects of a release.
#[must_use]
pub fn build_release_labels(release: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(K8S_NAME.into(), APP_NAME_DBT_SERVER.into());
    labels.insert(K8S_INSTANCE.into(), release.into());
    labels.insert(K8S_COMPONENT.into(), component.into());
    labels.insert(K8S_MANAGED_BY.into(), MANAGED_BY_PROVISIONER.into());
    labels.insert(K8S_PART_OF.into(), PART_OF_CICD.into());
    labels
}

/// Builds the pod selector labels of a release.
///
/// Kept to the two immutable keys so an upgrade never changes a StatefulSet selector.
#[must_use]
pub fn build_selector_labels(release: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(K8S_NAME.into(), APP_NAME_DBT_SERVER.into());
    labels.insert(K8S_INSTANCE.into(), release.into());
    labels
}
