// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `values.rs`

#[cfg(test)]
mod tests {
    use crate::helm::values::{
        build_credentials_secret, build_release_record, build_service, build_statefulset,
        credentials_secret_name, parse_release_record, release_record_name,
        secrets_from_secret, statefulset_ready, SECRET_KEY_BASIC_AUTH_PASSWORD,
        SECRET_KEY_BASIC_AUTH_USER,
    };
    use crate::helm::{ChartValues, RecordStatus, ReleaseInfo};
    use crate::labels::{K8S_INSTANCE, RELEASE_OWNER_LABEL};
    use crate::naming::derive_names;
    use crate::types::DeploymentRequest;
    use chrono::Utc;
    use k8s_openapi::api::apps::v1::StatefulSetStatus;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn values() -> ChartValues {
        let mut request = DeploymentRequest::new("Test-Project!", Some("Feature/123"));
        request.image.tag = "v0.0.7.1".into();
        request.resources.storage_size = "5Gi".into();
        request.basic_auth_user = Some("ci-agent".into());
        request.basic_auth_password = Some("correct-horse".into());
        let names = derive_names(&request.project_name, request.git_branch.as_deref()).unwrap();
        ChartValues::from_request(&request, &names, "dbt-server")
    }

    #[test]
    fn test_every_object_carries_instance_label() {
        let values = values();
        let release = "dbt-server-test-project-feature-123";

        let secret = build_credentials_secret(&values);
        let service = build_service(&values);
        let statefulset = build_statefulset(&values);

        for labels in [
            secret.metadata.labels.as_ref(),
            service.metadata.labels.as_ref(),
            statefulset.metadata.labels.as_ref(),
        ] {
            assert_eq!(
                labels.and_then(|l| l.get(K8S_INSTANCE)).map(String::as_str),
                Some(release)
            );
        }
    }

    #[test]
    fn test_statefulset_spec() {
        let values = values();
        let statefulset = build_statefulset(&values);
        let spec = statefulset.spec.unwrap();

        assert_eq!(spec.replicas, Some(1));

        let container = &spec.template.spec.unwrap().containers[0];
        assert_eq!(
            container.image.as_deref(),
            Some(
                "europe-central2-docker.pkg.dev/fast-bi-common/bi-platform/tsb-dbt-core-api-server:v0.0.7.1"
            )
        );

        let resources = container.resources.as_ref().unwrap();
        let limits = resources.limits.as_ref().unwrap();
        assert_eq!(limits.get("cpu").unwrap().0, "3500m");
        assert_eq!(limits.get("memory").unwrap().0, "6Gi");

        let env = container.env.as_ref().unwrap();
        let password = env
            .iter()
            .find(|e| e.name == "BASIC_AUTH_PASSWORD")
            .unwrap();
        assert!(password.value.is_none(), "password must come from the Secret");
        assert!(env.iter().any(|e| e.name == "CICD_ENV_PROD"));

        let claims = spec.volume_claim_templates.unwrap();
        assert_eq!(claims.len(), 1);
        let storage = claims[0]
            .spec
            .as_ref()
            .and_then(|s| s.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .and_then(|r| r.get("storage"))
            .unwrap();
        assert_eq!(storage.0, "5Gi");
    }

    #[test]
    fn test_selector_matches_pod_labels() {
        let statefulset = build_statefulset(&values());
        let spec = statefulset.spec.unwrap();
        let selector = spec.selector.match_labels.unwrap();
        let pod_labels = spec.template.metadata.unwrap().labels.unwrap();

        for (key, value) in &selector {
            assert_eq!(pod_labels.get(key), Some(value));
        }
    }

    #[test]
    fn test_service_targets_container_port() {
        let service = build_service(&values());
        let port = &service.spec.unwrap().ports.unwrap()[0];
        assert_eq!(port.port, 80);
        assert_eq!(
            port.target_port,
            Some(k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(8580))
        );
    }

    #[test]
    fn test_credentials_secret() {
        let values = values();
        let secret = build_credentials_secret(&values);
        assert_eq!(
            secret.metadata.name.as_deref(),
            Some("dbt-server-credentials-dbt-server-test-project-feature-123")
        );
        let data = secret.string_data.unwrap();
        assert_eq!(data.get(SECRET_KEY_BASIC_AUTH_USER).unwrap(), "ci-agent");
        assert_eq!(
            data.get(SECRET_KEY_BASIC_AUTH_PASSWORD).unwrap(),
            "correct-horse"
        );
    }

    #[test]
    fn test_secrets_read_back_from_cluster_form() {
        let mut data = BTreeMap::new();
        data.insert(
            SECRET_KEY_BASIC_AUTH_USER.to_string(),
            ByteString(b"ci-agent".to_vec()),
        );
        data.insert(
            SECRET_KEY_BASIC_AUTH_PASSWORD.to_string(),
            ByteString(b"correct-horse".to_vec()),
        );
        let secret = Secret {
            data: Some(data),
            ..Default::default()
        };

        let secrets = secrets_from_secret(&secret);
        assert_eq!(secrets.credentials.user, "ci-agent");
        assert_eq!(secrets.credentials.password, "correct-horse");
        assert!(secrets.gitlink_secret.is_empty());
    }

    #[test]
    fn test_object_names() {
        assert_eq!(
            credentials_secret_name("dbt-server-demo"),
            "dbt-server-credentials-dbt-server-demo"
        );
        assert_eq!(release_record_name("dbt-server-demo"), "dbt-server-demo-release");
    }

    #[test]
    fn test_long_releases_get_distinct_secrets() {
        let first = credentials_secret_name("dbt-server-analytics-warehouse-core-feature-aaa");
        let second = credentials_secret_name("dbt-server-analytics-warehouse-core-feature-bbb");
        assert_ne!(first, second);
        assert!(first.ends_with("-feature-aaa"));

        // Release names are bounded to 52 characters; Secret names may reach 253
        let longest = credentials_secret_name(&"x".repeat(52));
        assert!(longest.len() <= 253);
    }

    #[test]
    fn test_release_record_round_trip_drops_secrets() {
        let values = values();
        let info = ReleaseInfo {
            name: values.release.clone(),
            namespace: values.namespace.clone(),
            revision: 3,
            status: RecordStatus::Deployed,
            description: "release is ready".into(),
            updated_at: Utc::now(),
            values: values.clone(),
        };

        let configmap = build_release_record(&info).unwrap();
        assert_eq!(
            configmap
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(RELEASE_OWNER_LABEL))
                .map(String::as_str),
            Some("dbt-provisioner")
        );
        let encoded = configmap.data.as_ref().unwrap().values().next().unwrap();
        assert!(!encoded.contains("correct-horse"));

        let decoded = parse_release_record(&configmap).unwrap();
        assert_eq!(decoded.revision, 3);
        assert_eq!(decoded.status, RecordStatus::Deployed);
        assert_eq!(decoded.values.connection_id, "test_project_feature_123");
    }

    #[test]
    fn test_malformed_record_is_rejected() {
        let configmap = k8s_openapi::api::core::v1::ConfigMap::default();
        assert!(parse_release_record(&configmap).is_err());
    }

    #[test]
    fn test_statefulset_readiness() {
        let mut statefulset = build_statefulset(&values());
        assert!(!statefulset_ready(&statefulset), "no status yet");

        statefulset.metadata.generation = Some(2);
        statefulset.status = Some(StatefulSetStatus {
            observed_generation: Some(1),
            ready_replicas: Some(1),
            updated_replicas: Some(1),
            replicas: 1,
            ..Default::default()
        });
        assert!(!statefulset_ready(&statefulset), "spec not observed yet");

        if let Some(status) = statefulset.status.as_mut() {
            status.observed_generation = Some(2);
        }
        assert!(statefulset_ready(&statefulset));

        if let Some(status) = statefulset.status.as_mut() {
            status.ready_replicas = Some(0);
        }
        assert!(!statefulset_ready(&statefulset));
    }
}
