// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `types.rs`

#[cfg(test)]
mod tests {
    use crate::errors::ProvisionError;
    use crate::types::{
        CeleryLogLevel, DatawarehouseType, DeploymentRequest, DeploymentUpdate, Environment,
        ImageSpec, Phase,
    };
    use serde_json::json;

    #[test]
    fn test_minimal_request_gets_defaults() {
        let request: DeploymentRequest =
            serde_json::from_value(json!({ "project_name": "demo" })).unwrap();

        assert_eq!(request.git_branch, None);
        assert_eq!(request.environment, Environment::Prod);
        assert_eq!(request.datawarehouse_type, DatawarehouseType::Unspecified);
        assert_eq!(request.image.name, "tsb-dbt-core-api-server");
        assert_eq!(request.image.tag, "latest");
        assert_eq!(request.resources.cpu_request, "1500m");
        assert_eq!(request.resources.memory_limit, "6Gi");
        assert_eq!(request.resources.storage_size, "1Gi");
        assert_eq!(request.worker_num, 10);
        assert_eq!(request.max_requests, 35);
        assert_eq!(request.celery_log_level, CeleryLogLevel::Error);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_partial_nested_objects_keep_defaults() {
        let request: DeploymentRequest = serde_json::from_value(json!({
            "project_name": "demo",
            "image": { "tag": "v0.0.7.1" },
            "resources": { "storage_size": "5Gi" },
            "datawarehouse_type": "bigquery",
            "environment": "e2e",
            "celery_log_level": "DEBUG"
        }))
        .unwrap();

        assert_eq!(request.image.tag, "v0.0.7.1");
        assert_eq!(request.image.name, "tsb-dbt-core-api-server");
        assert_eq!(request.resources.storage_size, "5Gi");
        assert_eq!(request.resources.cpu_limit, "3500m");
        assert_eq!(request.datawarehouse_type, DatawarehouseType::Bigquery);
        assert_eq!(request.environment, Environment::E2e);
        assert_eq!(request.celery_log_level, CeleryLogLevel::Debug);
    }

    #[test]
    fn test_unknown_enum_value_is_rejected() {
        let result: Result<DeploymentRequest, _> = serde_json::from_value(json!({
            "project_name": "demo",
            "datawarehouse_type": "oracle"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_resource_quantities_are_validated() {
        let mut request = DeploymentRequest::new("demo", None);
        request.resources.cpu_request = "2".into();
        request.resources.memory_request = "512Mi".into();
        assert!(request.validate().is_ok());

        request.resources.cpu_limit = "1.5".into();
        assert!(matches!(
            request.validate(),
            Err(ProvisionError::InvalidInput { .. })
        ));

        request.resources.cpu_limit = "3500m".into();
        request.resources.memory_limit = "6GB".into();
        let err = request.validate().unwrap_err();
        assert!(err.to_string().contains("resources.memory_limit"));
    }

    #[test]
    fn test_ranges_are_validated() {
        let mut request = DeploymentRequest::new("demo", None);
        request.worker_num = 0;
        assert!(request.validate().is_err());

        request.worker_num = 20;
        request.max_requests = 101;
        let err = request.validate().unwrap_err();
        assert!(err.to_string().contains("max_requests"));
    }

    #[test]
    fn test_https_requires_customer_and_domain() {
        let mut request = DeploymentRequest::new("demo", None);
        request.https_enabled = true;
        assert!(request.validate().is_err());

        request.customer = Some("fastbi".into());
        request.domain = Some("fast.bi".into());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_short_password_is_rejected() {
        let mut request = DeploymentRequest::new("demo", None);
        request.basic_auth_password = Some("short".into());
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_generated_credentials() {
        let request = DeploymentRequest::new("demo", None);
        let credentials = request.credentials();

        let suffix = credentials
            .user
            .strip_prefix("dbt_server_agent_")
            .expect("generated user has the agent prefix");
        assert_eq!(suffix.len(), 5);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));

        assert_eq!(credentials.password.len(), 32);
        assert!(credentials.password.chars().all(|c| c.is_ascii_alphanumeric()));

        assert!(!format!("{credentials:?}").contains(&credentials.password));
    }

    #[test]
    fn test_supplied_credentials_are_kept() {
        let mut request = DeploymentRequest::new("demo", None);
        request.basic_auth_user = Some("ci-agent".into());
        request.basic_auth_password = Some("correct-horse".into());

        let credentials = request.credentials();
        assert_eq!(credentials.user, "ci-agent");
        assert_eq!(credentials.password, "correct-horse");
    }

    #[test]
    fn test_image_reference() {
        let image = ImageSpec::default();
        assert_eq!(
            image.reference(),
            "europe-central2-docker.pkg.dev/fast-bi-common/bi-platform/tsb-dbt-core-api-server:latest"
        );

        let image = ImageSpec {
            repository: "ghcr.io/fast-bi".into(),
            name: "dbt-server".into(),
            tag: "v1".into(),
        };
        assert_eq!(image.reference(), "ghcr.io/fast-bi/dbt-server:v1");
    }

    #[test]
    fn test_empty_update_is_rejected() {
        assert!(DeploymentUpdate::default().validate().is_err());

        let update = DeploymentUpdate {
            tag: Some("v2".into()),
            ..DeploymentUpdate::default()
        };
        assert!(update.validate().is_ok());

        let update = DeploymentUpdate {
            worker_num: Some(21),
            ..DeploymentUpdate::default()
        };
        assert!(update.validate().is_err());
    }

    #[test]
    fn test_phase_liveness() {
        assert!(Phase::Ready.is_live());
        assert!(Phase::HelmDeploying.is_live());
        assert!(!Phase::Failed.is_live());
        assert!(!Phase::Deleted.is_live());

        assert!(Phase::Deleting.is_in_progress());
        assert!(!Phase::Ready.is_in_progress());

        let phase: Phase = serde_json::from_value(json!("ConnectionCreating")).unwrap();
        assert_eq!(phase, Phase::ConnectionCreating);
    }
}
