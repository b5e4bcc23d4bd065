// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Release manifest builders
//!
//! Renders [`ChartValues`] into the Kubernetes objects of a release (`Secret`,
//! `Service`, `StatefulSet`) and converts release records to and from their
//! `ConfigMap` form. All functions are pure and easily testable.

use super::{ChartValues, ReleaseError, ReleaseInfo, ReleaseSecrets};
use crate::constants::{
    CONTAINER_NAME_DBT_SERVER, DBT_SERVER_CONTAINER_PORT, DBT_SERVER_SERVICE_PORT,
    DBT_WORKSPACE_PATH, LIVENESS_INITIAL_DELAY_SECS, LIVENESS_PERIOD_SECS,
    READINESS_INITIAL_DELAY_SECS, READINESS_PERIOD_SECS, RELEASE_RECORD_SUFFIX,
    SECRET_PREFIX_CREDENTIALS, VOLUME_PREFIX_WORKSPACE,
};
use crate::labels::{
    build_release_labels, build_selector_labels, BRANCH_ANNOTATION, COMPONENT_API_SERVER,
    COMPONENT_RELEASE_RECORD, PROJECT_ANNOTATION, RELEASE_OWNER_LABEL, RELEASE_OWNER_VALUE,
};
use crate::types::Credentials;
use k8s_openapi::api::{
    apps::v1::{StatefulSet, StatefulSetSpec},
    core::v1::{
        ConfigMap, Container, ContainerPort, EnvVar, EnvVarSource, PersistentVolumeClaim,
        PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, Probe, ResourceRequirements,
        Secret, SecretKeySelector, Service, ServicePort, ServiceSpec, TCPSocketAction,
        VolumeMount, VolumeResourceRequirements,
    },
};
use k8s_openapi::apimachinery::pkg::{
    api::resource::Quantity,
    apis::meta::v1::{LabelSelector, ObjectMeta},
    util::intstr::IntOrString,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Key of the serialized [`ReleaseInfo`] inside the release record
pub const RELEASE_RECORD_KEY: &str = "release.yaml";

/// Secret key holding the basic-auth user
pub const SECRET_KEY_BASIC_AUTH_USER: &str = "basic-auth-user";

/// Secret key holding the basic-auth password
pub const SECRET_KEY_BASIC_AUTH_PASSWORD: &str = "basic-auth-password";

/// Secret key holding the git URL with credentials
pub const SECRET_KEY_GITLINK: &str = "gitlink-secret";

const PORT_NAME_HTTP: &str = "http";

/// Name of the release record `ConfigMap`
#[must_use]
pub fn release_record_name(release: &str) -> String {
    format!("{release}-{RELEASE_RECORD_SUFFIX}")
}

/// Name of the credentials `Secret`, `dbt-server-credentials-<release>`.
///
/// Secret names are DNS subdomains, so the release name is never cut.
#[must_use]
pub fn credentials_secret_name(release: &str) -> String {
    format!("{SECRET_PREFIX_CREDENTIALS}-{release}")
}

fn release_metadata(values: &ChartValues, name: String, component: &str) -> ObjectMeta {
    let mut annotations = BTreeMap::new();
    annotations.insert(PROJECT_ANNOTATION.to_string(), values.project_key.clone());
    if let Some(branch) = &values.branch_key {
        annotations.insert(BRANCH_ANNOTATION.to_string(), branch.clone());
    }

    ObjectMeta {
        name: Some(name),
        namespace: Some(values.namespace.clone()),
        labels: Some(build_release_labels(&values.release, component)),
        annotations: Some(annotations),
        ..Default::default()
    }
}

/// Builds the `Secret` holding the server's basic-auth credentials and git URL.
#[must_use]
pub fn build_credentials_secret(values: &ChartValues) -> Secret {
    let mut data = BTreeMap::new();
    data.insert(
        SECRET_KEY_BASIC_AUTH_USER.to_string(),
        values.secrets.credentials.user.clone(),
    );
    data.insert(
        SECRET_KEY_BASIC_AUTH_PASSWORD.to_string(),
        values.secrets.credentials.password.clone(),
    );
    data.insert(
        SECRET_KEY_GITLINK.to_string(),
        values.secrets.gitlink_secret.clone(),
    );

    Secret {
        metadata: release_metadata(
            values,
            credentials_secret_name(&values.release),
            COMPONENT_API_SERVER,
        ),
        string_data: Some(data),
        type_: Some("Opaque".into()),
        ..Default::default()
    }
}

/// Recover release secrets from a credentials `Secret` read back from the cluster.
#[must_use]
pub fn secrets_from_secret(secret: &Secret) -> ReleaseSecrets {
    let read = |key: &str| -> String {
        secret
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .map(|value| String::from_utf8_lossy(&value.0).into_owned())
            .unwrap_or_default()
    };

    ReleaseSecrets {
        credentials: Credentials {
            user: read(SECRET_KEY_BASIC_AUTH_USER),
            password: read(SECRET_KEY_BASIC_AUTH_PASSWORD),
        },
        gitlink_secret: read(SECRET_KEY_GITLINK),
    }
}

/// Builds the `ClusterIP` `Service` in front of the dbt API server.
#[must_use]
pub fn build_service(values: &ChartValues) -> Service {
    Service {
        metadata: release_metadata(values, values.release.clone(), COMPONENT_API_SERVER),
        spec: Some(ServiceSpec {
            selector: Some(build_selector_labels(&values.release)),
            ports: Some(vec![ServicePort {
                name: Some(PORT_NAME_HTTP.into()),
                port: i32::from(DBT_SERVER_SERVICE_PORT),
                target_port: Some(IntOrString::Int(i32::from(DBT_SERVER_CONTAINER_PORT))),
                protocol: Some("TCP".into()),
                ..Default::default()
            }]),
            type_: Some("ClusterIP".into()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Builds the `StatefulSet` running the dbt API server.
///
/// The workspace volume comes from a volume claim template, so its claim outlives the
/// pod and has to be removed explicitly on uninstall.
#[must_use]
pub fn build_statefulset(values: &ChartValues) -> StatefulSet {
    debug!(
        release = %values.release,
        namespace = %values.namespace,
        image = %values.image.reference(),
        "Building StatefulSet for release"
    );

    let labels = build_release_labels(&values.release, COMPONENT_API_SERVER);

    StatefulSet {
        metadata: release_metadata(values, values.release.clone(), COMPONENT_API_SERVER),
        spec: Some(StatefulSetSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(build_selector_labels(&values.release)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![build_dbt_server_container(values)],
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![build_workspace_claim(values, labels)]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_dbt_server_container(values: &ChartValues) -> Container {
    let secret_name = credentials_secret_name(&values.release);

    let probe = |initial_delay: i32, period: i32| Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(i32::from(DBT_SERVER_CONTAINER_PORT)),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        ..Default::default()
    };

    Container {
        name: CONTAINER_NAME_DBT_SERVER.into(),
        image: Some(values.image.reference()),
        image_pull_policy: Some("IfNotPresent".into()),
        ports: Some(vec![ContainerPort {
            name: Some(PORT_NAME_HTTP.into()),
            container_port: i32::from(DBT_SERVER_CONTAINER_PORT),
            protocol: Some("TCP".into()),
            ..Default::default()
        }]),
        env: Some(build_env(values, &secret_name)),
        resources: Some(build_resources(values)),
        volume_mounts: Some(vec![VolumeMount {
            name: VOLUME_PREFIX_WORKSPACE.into(),
            mount_path: DBT_WORKSPACE_PATH.into(),
            ..Default::default()
        }]),
        liveness_probe: Some(probe(LIVENESS_INITIAL_DELAY_SECS, LIVENESS_PERIOD_SECS)),
        readiness_probe: Some(probe(READINESS_INITIAL_DELAY_SECS, READINESS_PERIOD_SECS)),
        ..Default::default()
    }
}

fn build_env(values: &ChartValues, secret_name: &str) -> Vec<EnvVar> {
    let plain = |name: &str, value: String| EnvVar {
        name: name.into(),
        value: Some(value),
        ..Default::default()
    };
    let from_secret = |name: &str, key: &str| EnvVar {
        name: name.into(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret_name.to_string(),
                key: key.to_string(),
                optional: Some(false),
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    let environment = values.environment.as_str();
    vec![
        plain("PROJECT_NAME", values.project_name.clone()),
        plain("GIT_BRANCH", values.git_branch.clone().unwrap_or_default()),
        plain("ENVIRONMENT", environment.to_string()),
        plain(
            &format!("CICD_ENV_{}", environment.to_uppercase()),
            environment.to_string(),
        ),
        plain("DBT_REPO_NAME", values.dbt_repo_name.clone()),
        plain(
            "DATA_WAREHOUSE_PLATFORM",
            values.datawarehouse_type.as_str().to_string(),
        ),
        plain("WORKER_NUM", values.worker_num.to_string()),
        plain("MAX_REQUESTS", values.max_requests.to_string()),
        plain("DEBUG", values.debug.to_string()),
        plain("CELERY_LOG_LEVEL", values.celery_log_level.as_str().to_string()),
        plain("DBT_WORKSPACE", DBT_WORKSPACE_PATH.to_string()),
        from_secret("BASIC_AUTH_USER", SECRET_KEY_BASIC_AUTH_USER),
        from_secret("BASIC_AUTH_PASSWORD", SECRET_KEY_BASIC_AUTH_PASSWORD),
        from_secret("GITLINK_SECRET", SECRET_KEY_GITLINK),
    ]
}

fn build_resources(values: &ChartValues) -> ResourceRequirements {
    let mut requests = BTreeMap::new();
    requests.insert("cpu".to_string(), Quantity(values.resources.cpu_request.clone()));
    requests.insert(
        "memory".to_string(),
        Quantity(values.resources.memory_request.clone()),
    );

    let mut limits = BTreeMap::new();
    limits.insert("cpu".to_string(), Quantity(values.resources.cpu_limit.clone()));
    limits.insert(
        "memory".to_string(),
        Quantity(values.resources.memory_limit.clone()),
    );

    ResourceRequirements {
        requests: Some(requests),
        limits: Some(limits),
        ..Default::default()
    }
}

fn build_workspace_claim(
    values: &ChartValues,
    labels: BTreeMap<String, String>,
) -> PersistentVolumeClaim {
    let mut requests = BTreeMap::new();
    requests.insert(
        "storage".to_string(),
        Quantity(values.resources.storage_size.clone()),
    );

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(VOLUME_PREFIX_WORKSPACE.into()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".into()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Whether a `StatefulSet` has rolled out its current spec and every replica is ready.
#[must_use]
pub fn statefulset_ready(statefulset: &StatefulSet) -> bool {
    let desired = statefulset
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let Some(status) = statefulset.status.as_ref() else {
        return false;
    };

    let observed_current = match (statefulset.metadata.generation, status.observed_generation) {
        (Some(generation), Some(observed)) => observed >= generation,
        (None, _) => true,
        (Some(_), None) => false,
    };

    observed_current
        && status.ready_replicas.unwrap_or(0) >= desired
        && status.updated_replicas.unwrap_or(desired) >= desired
}

/// Builds the release record `ConfigMap`.
///
/// # Errors
///
/// Returns [`ReleaseError::Record`] if the record cannot be serialized.
pub fn build_release_record(info: &ReleaseInfo) -> Result<ConfigMap, ReleaseError> {
    let encoded = serde_yaml::to_string(info).map_err(|e| ReleaseError::Record {
        name: info.name.clone(),
        reason: e.to_string(),
    })?;

    let mut metadata = release_metadata(
        &info.values,
        release_record_name(&info.name),
        COMPONENT_RELEASE_RECORD,
    );
    if let Some(labels) = metadata.labels.as_mut() {
        labels.insert(RELEASE_OWNER_LABEL.into(), RELEASE_OWNER_VALUE.into());
    }

    let mut data = BTreeMap::new();
    data.insert(RELEASE_RECORD_KEY.to_string(), encoded);

    Ok(ConfigMap {
        metadata,
        data: Some(data),
        ..Default::default()
    })
}

/// Decodes a release record `ConfigMap`.
///
/// # Errors
///
/// Returns [`ReleaseError::Record`] when the record key is missing or malformed.
pub fn parse_release_record(configmap: &ConfigMap) -> Result<ReleaseInfo, ReleaseError> {
    let name = configmap.metadata.name.clone().unwrap_or_default();
    let encoded = configmap
        .data
        .as_ref()
        .and_then(|data| data.get(RELEASE_RECORD_KEY))
        .ok_or_else(|| ReleaseError::Record {
            name: name.clone(),
            reason: format!("missing key {RELEASE_RECORD_KEY}"),
        })?;

    serde_yaml::from_str(encoded).map_err(|e| ReleaseError::Record {
        name,
        reason: e.to_string(),
    })
}

#[cfg(test)]
#[path = "values_tests.rs"]
mod values_tests;
