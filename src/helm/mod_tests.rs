// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the release orchestrator

#[cfg(test)]
mod tests {
    use crate::errors::ProvisionError;
    use crate::helm::mock::MockReleaseClient;
    use crate::helm::{ChartValues, HelmOrchestrator, RecordStatus, ReleaseState};
    use crate::naming::derive_names;
    use crate::types::{DeploymentRequest, DeploymentUpdate};
    use std::sync::Arc;
    use std::time::Duration;

    fn values(project: &str, branch: Option<&str>) -> ChartValues {
        let request = DeploymentRequest::new(project, branch);
        let names = derive_names(project, branch).unwrap();
        ChartValues::from_request(&request, &names, "dbt-server")
    }

    fn orchestrator(client: &Arc<MockReleaseClient>) -> HelmOrchestrator {
        HelmOrchestrator::new(client.clone())
            .with_timeouts(Duration::from_millis(100), Duration::from_millis(50))
            .with_poll_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_deploy_installs_then_upgrades() {
        let client = Arc::new(MockReleaseClient::new());
        let helm = orchestrator(&client);
        let values = values("demo", None);

        let state = helm.deploy(&values).await.unwrap();
        assert_eq!(state, ReleaseState::Deployed);

        let info = client.release("dbt-server-demo").unwrap();
        assert_eq!(info.revision, 1);
        assert_eq!(info.status, RecordStatus::Deployed);

        // A second deploy is an upgrade, never an "already exists" error
        let state = helm.deploy(&values).await.unwrap();
        assert_eq!(state, ReleaseState::Deployed);
        assert_eq!(client.release("dbt-server-demo").unwrap().revision, 2);
    }

    #[tokio::test]
    async fn test_invalid_values_fail_without_retry() {
        let client = Arc::new(MockReleaseClient::new().fail_apply_with(422));
        let helm = orchestrator(&client);

        let err = helm.deploy(&values("demo", None)).await.unwrap_err();
        assert!(matches!(err, ProvisionError::DeploymentFailed { .. }));
        assert_eq!(client.apply_calls(), 1);
        assert_eq!(
            helm.status("dbt-server-demo").await.unwrap(),
            ReleaseState::NotFound
        );
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let client = Arc::new(MockReleaseClient::new().transient_apply_failures(2));
        let helm = orchestrator(&client);

        let state = helm.deploy(&values("demo", None)).await.unwrap();
        assert_eq!(state, ReleaseState::Deployed);
        assert_eq!(client.apply_calls(), 3);
    }

    #[tokio::test]
    async fn test_deploy_times_out_and_marks_release_failed() {
        let client = Arc::new(MockReleaseClient::new().never_ready());
        let helm = orchestrator(&client);

        let err = helm.deploy(&values("demo", None)).await.unwrap_err();
        match err {
            ProvisionError::DeploymentFailed { release, reason } => {
                assert_eq!(release, "dbt-server-demo");
                assert!(reason.contains("not ready"));
            }
            other => panic!("expected DeploymentFailed, got {other:?}"),
        }
        assert_eq!(
            helm.status("dbt-server-demo").await.unwrap(),
            ReleaseState::Failed
        );
    }

    #[tokio::test]
    async fn test_status_of_pending_release() {
        let client = Arc::new(MockReleaseClient::new().never_ready());
        client.insert_release(values("demo", None), RecordStatus::PendingInstall);
        let helm = orchestrator(&client);

        assert_eq!(
            helm.status("dbt-server-demo").await.unwrap(),
            ReleaseState::Pending
        );
        assert_eq!(
            helm.status("dbt-server-unknown").await.unwrap(),
            ReleaseState::NotFound
        );
    }

    #[tokio::test]
    async fn test_destroy_removes_release_and_pvcs() {
        let client = Arc::new(MockReleaseClient::new());
        let helm = orchestrator(&client);
        helm.deploy(&values("demo", Some("main"))).await.unwrap();
        assert_eq!(client.pvcs("dbt-server-demo-main").len(), 1);

        helm.destroy("dbt-server-demo-main").await.unwrap();

        assert!(client.pvcs("dbt-server-demo-main").is_empty());
        assert_eq!(
            helm.status("dbt-server-demo-main").await.unwrap(),
            ReleaseState::NotFound
        );

        // Idempotent
        helm.destroy("dbt-server-demo-main").await.unwrap();
    }

    #[tokio::test]
    async fn test_destroy_reports_cleanup_timeout() {
        let client = Arc::new(MockReleaseClient::new().sticky_pvcs());
        let helm = orchestrator(&client);
        helm.deploy(&values("demo", None)).await.unwrap();

        let err = helm.destroy("dbt-server-demo").await.unwrap_err();
        assert_eq!(
            err,
            ProvisionError::CleanupTimeout {
                release: "dbt-server-demo".into(),
                timeout_secs: 0,
                remaining: 1,
            }
        );
        // The record stays behind so the teardown can be resumed
        assert_eq!(
            helm.status("dbt-server-demo").await.unwrap(),
            ReleaseState::Uninstalling
        );
    }

    #[tokio::test]
    async fn test_deploy_refuses_release_being_uninstalled() {
        let client = Arc::new(MockReleaseClient::new());
        client.insert_release(values("demo", None), RecordStatus::Uninstalling);
        let helm = orchestrator(&client);

        let err = helm.deploy(&values("demo", None)).await.unwrap_err();
        assert!(matches!(err, ProvisionError::DeploymentFailed { .. }));
        assert_eq!(client.apply_calls(), 0);
    }

    #[test]
    fn test_connection_target() {
        let mut values = values("demo", None);
        assert_eq!(
            values.connection_target(),
            "http://dbt-server-demo.dbt-server.svc.cluster.local/invocations"
        );

        values.https_enabled = true;
        values.customer = Some("fastbi".into());
        values.domain = Some("fast.bi".into());
        assert_eq!(
            values.connection_target(),
            "https://dbt-server-demo.fastbi.fast.bi/invocations"
        );
    }

    #[test]
    fn test_apply_update() {
        let mut values = values("demo", None);
        values.apply_update(&DeploymentUpdate {
            tag: Some("v0.0.8".into()),
            worker_num: Some(4),
            ..DeploymentUpdate::default()
        });

        assert_eq!(values.image.tag, "v0.0.8");
        assert_eq!(values.worker_num, 4);
        assert_eq!(values.max_requests, 35);
    }

    #[test]
    fn test_secrets_are_not_persisted() {
        let values = values("demo", None);
        let yaml = serde_yaml::to_string(&values).unwrap();
        assert!(!yaml.contains(&values.secrets.credentials.password));

        let decoded: ChartValues = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(decoded.release, values.release);
        assert!(decoded.secrets.credentials.password.is_empty());
    }
}
