// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `airflow.rs` against a mock Airflow webserver

#[cfg(test)]
mod tests {
    use crate::airflow::{AirflowClient, CallError, ConnectionManager};
    use crate::errors::ProvisionError;
    use crate::types::Credentials;
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{basic_auth, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CONNECTION: &str = "/api/v1/connections/test_project_feature_123";
    const TARGET: &str =
        "http://dbt-server-test-project-feature-123.dbt-server.svc.cluster.local/invocations";

    fn client(server: &MockServer) -> AirflowClient {
        let url = Url::parse(&format!("{}/", server.uri())).unwrap();
        AirflowClient::new(&url, "airflow", "airflow-password").unwrap()
    }

    fn credentials() -> Credentials {
        Credentials {
            user: "ci-agent".into(),
            password: "correct-horse".into(),
        }
    }

    #[tokio::test]
    async fn test_create_posts_new_connection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CONNECTION))
            .and(basic_auth("airflow", "airflow-password"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/connections"))
            .and(body_partial_json(json!({
                "conn_type": "http",
                "connection_id": "test_project_feature_123",
                "host": TARGET,
                "login": "ci-agent",
                "password": "correct-horse",
                "port": null,
                "schema": "",
                "extra": "",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .create_connection("test_project_feature_123", TARGET, &credentials())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_patches_existing_connection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CONNECTION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "connection_id": "test_project_feature_123",
            })))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(CONNECTION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        client(&server)
            .create_connection("test_project_feature_123", TARGET, &credentials())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_missing_connection_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(CONNECTION))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .delete_connection("test_project_feature_123")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_existing_connection() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(CONNECTION))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .delete_connection("test_project_feature_123")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_client_error_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CONNECTION))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad payload"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .create_connection("test_project_feature_123", TARGET, &credentials())
            .await
            .unwrap_err();

        match err {
            ProvisionError::ConnectionError {
                connection_id,
                reason,
            } => {
                assert_eq!(connection_id, "test_project_feature_123");
                assert!(reason.starts_with("AirflowBadRequest"), "{reason}");
                assert!(reason.contains("HTTP 400 Bad Request: bad payload"), "{reason}");
            }
            other => panic!("expected ConnectionError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_call_errors_chain_their_source() {
        use std::error::Error as _;

        let status = CallError::Status {
            status: reqwest::StatusCode::TOO_MANY_REQUESTS,
            message: "slow down".into(),
        };
        assert_eq!(status.to_string(), "HTTP 429 Too Many Requests: slow down");
        assert!(status.source().is_none());
        assert!(status.is_retryable());

        let invalid = reqwest::Client::new()
            .get("not a url")
            .send()
            .await
            .unwrap_err();
        let transport = CallError::from(invalid);
        assert!(transport.to_string().starts_with("request failed: "));
        assert!(transport.source().is_some());
        assert!(!transport.is_retryable());
    }

    #[tokio::test]
    async fn test_auth_failure_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .delete_connection("test_project_feature_123")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ConnectionError");
    }

    #[tokio::test]
    async fn test_unavailable_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(CONNECTION))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(CONNECTION))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .delete_connection("test_project_feature_123")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(502))
            .expect(5)
            .mount(&server)
            .await;

        let err = client(&server)
            .delete_connection("test_project_feature_123")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::ConnectionError { .. }));
    }
}
