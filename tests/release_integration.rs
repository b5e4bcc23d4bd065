// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Release lifecycle against a live cluster.
//!
//! Run with: cargo test --test release_integration -- --ignored

mod common;

use common::{cleanup_test_namespace, create_test_namespace, get_kube_client_or_skip};
use dbt_provisioner::helm::kube_client::KubeReleaseClient;
use dbt_provisioner::helm::{ChartValues, HelmOrchestrator, ReleaseState};
use dbt_provisioner::labels::release_selector;
use dbt_provisioner::naming::derive_names;
use dbt_provisioner::types::DeploymentRequest;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::{Api, ListParams};
use std::sync::Arc;
use std::time::Duration;

const TEST_NAMESPACE: &str = "dbt-provisioner-it";

#[tokio::test]
#[ignore = "requires a Kubernetes cluster"]
async fn test_release_install_and_teardown() {
    let Some(client) = get_kube_client_or_skip().await else {
        return;
    };
    create_test_namespace(&client, TEST_NAMESPACE)
        .await
        .expect("namespace");

    let helm = HelmOrchestrator::new(Arc::new(KubeReleaseClient::new(
        client.clone(),
        TEST_NAMESPACE,
    )))
    .with_timeouts(Duration::from_secs(180), Duration::from_secs(120));

    let request = DeploymentRequest::new("integration-demo", Some("main"));
    let names = derive_names(&request.project_name, request.git_branch.as_deref()).unwrap();
    let values = ChartValues::from_request(&request, &names, TEST_NAMESPACE);

    // The image may not become ready in every cluster; the record must exist either way
    match helm.deploy(&values).await {
        Ok(state) => println!("Deploy finished in state {state:?}"),
        Err(e) => println!("Deploy did not reach ready: {e}"),
    }
    let state = helm.status(&names.k8s_name).await.expect("status");
    assert_ne!(state, ReleaseState::NotFound);
    assert!(helm
        .list()
        .await
        .expect("list")
        .iter()
        .any(|r| r.name == names.k8s_name));

    helm.destroy(&names.k8s_name).await.expect("destroy");
    assert_eq!(
        helm.status(&names.k8s_name).await.expect("status"),
        ReleaseState::NotFound
    );

    let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let remaining = pvcs
        .list(&ListParams::default().labels(&release_selector(&names.k8s_name)))
        .await
        .expect("list PVCs");
    assert!(remaining.items.is_empty());

    // Teardown of an absent release is a no-op
    helm.destroy(&names.k8s_name).await.expect("second destroy");

    cleanup_test_namespace(&client, TEST_NAMESPACE)
        .await
        .expect("cleanup");
}
