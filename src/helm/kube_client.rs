// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! [`ReleaseClient`] backed by the Kubernetes API.
//!
//! Manifests are applied with server-side apply under a single field manager, so
//! re-applying identical values is a no-op and upgrades only touch changed fields.

use super::values::{
    build_credentials_secret, build_release_record, build_service, build_statefulset,
    credentials_secret_name, parse_release_record, release_record_name, secrets_from_secret,
    statefulset_ready,
};
use super::{ChartValues, RecordStatus, ReleaseClient, ReleaseError, ReleaseInfo};
use crate::constants::FIELD_MANAGER;
use crate::labels::{release_record_selector, release_selector};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use tracing::{debug, info, warn};

/// Release client operating on one namespace.
#[derive(Clone)]
pub struct KubeReleaseClient {
    client: Client,
    namespace: String,
}

impl KubeReleaseClient {
    #[must_use]
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn api<T>(&self) -> Api<T>
    where
        T: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Create or update a resource with server-side apply.
    async fn apply<T>(&self, resource: &T) -> Result<(), ReleaseError>
    where
        T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
            + ResourceExt
            + Clone
            + std::fmt::Debug
            + serde::Serialize
            + for<'de> serde::Deserialize<'de>,
    {
        let name = resource
            .meta()
            .name
            .clone()
            .ok_or_else(|| ReleaseError::Manifest {
                name: String::new(),
                reason: format!("{} has no name", T::kind(&())),
            })?;

        debug!(
            namespace = %self.namespace,
            name = %name,
            kind = %T::kind(&()),
            "Applying resource"
        );

        self.api::<T>()
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(resource),
            )
            .await?;
        Ok(())
    }

    /// Delete a resource, treating "not found" as success.
    async fn delete_if_present<T>(&self, name: &str) -> Result<(), ReleaseError>
    where
        T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
            + Clone
            + std::fmt::Debug
            + for<'de> serde::Deserialize<'de>,
    {
        match self.api::<T>().delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!("Deleted {} {}/{}", T::kind(&()), self.namespace, name);
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!("{} {}/{} already deleted", T::kind(&()), self.namespace, name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fill in the secrets of a decoded record from the release's `Secret`.
    async fn with_secrets(&self, mut info: ReleaseInfo) -> Result<ReleaseInfo, ReleaseError> {
        let secret_name = credentials_secret_name(&info.name);
        if let Some(secret) = self.api::<Secret>().get_opt(&secret_name).await? {
            info.values.secrets = secrets_from_secret(&secret);
        } else {
            warn!(
                release = %info.name,
                secret = %secret_name,
                "Credentials secret missing, release values have no credentials"
            );
        }
        Ok(info)
    }

    async fn read_record(&self, name: &str) -> Result<Option<ReleaseInfo>, ReleaseError> {
        self.api::<ConfigMap>()
            .get_opt(&release_record_name(name))
            .await?
            .map(|cm| parse_release_record(&cm))
            .transpose()
    }
}

#[async_trait]
impl ReleaseClient for KubeReleaseClient {
    async fn get_release(&self, name: &str) -> Result<Option<ReleaseInfo>, ReleaseError> {
        match self.read_record(name).await? {
            Some(info) => Ok(Some(self.with_secrets(info).await?)),
            None => Ok(None),
        }
    }

    async fn apply_release(
        &self,
        values: &ChartValues,
        revision: u32,
        status: RecordStatus,
    ) -> Result<(), ReleaseError> {
        let info = ReleaseInfo {
            name: values.release.clone(),
            namespace: values.namespace.clone(),
            revision,
            status,
            description: if revision == 1 {
                "install in progress".to_string()
            } else {
                "upgrade in progress".to_string()
            },
            updated_at: Utc::now(),
            values: values.clone(),
        };

        // Record first: an interrupted apply still leaves a release to adopt or destroy
        self.apply(&build_release_record(&info)?).await?;
        self.apply(&build_credentials_secret(values)).await?;
        self.apply(&build_service(values)).await?;
        self.apply(&build_statefulset(values)).await?;

        info!(
            release = %values.release,
            namespace = %self.namespace,
            revision,
            "Applied release manifests"
        );
        Ok(())
    }

    async fn set_status(
        &self,
        name: &str,
        status: RecordStatus,
        description: &str,
    ) -> Result<(), ReleaseError> {
        let Some(mut info) = self.read_record(name).await? else {
            return Ok(());
        };
        info.status = status;
        info.description = description.to_string();
        info.updated_at = Utc::now();
        self.apply(&build_release_record(&info)?).await
    }

    async fn workload_ready(&self, name: &str) -> Result<bool, ReleaseError> {
        Ok(self
            .api::<StatefulSet>()
            .get_opt(name)
            .await?
            .is_some_and(|sts| statefulset_ready(&sts)))
    }

    async fn uninstall(&self, name: &str) -> Result<(), ReleaseError> {
        self.delete_if_present::<StatefulSet>(name).await?;
        self.delete_if_present::<Service>(name).await?;
        self.delete_if_present::<Secret>(&credentials_secret_name(name))
            .await?;
        Ok(())
    }

    async fn delete_pvcs(&self, name: &str) -> Result<(), ReleaseError> {
        for pvc in self.remaining_pvcs(name).await? {
            self.delete_if_present::<PersistentVolumeClaim>(&pvc).await?;
        }
        Ok(())
    }

    async fn remaining_pvcs(&self, name: &str) -> Result<Vec<String>, ReleaseError> {
        let params = ListParams::default().labels(&release_selector(name));
        let pvcs = self.api::<PersistentVolumeClaim>().list(&params).await?;
        Ok(pvcs.items.iter().map(ResourceExt::name_any).collect())
    }

    async fn delete_record(&self, name: &str) -> Result<(), ReleaseError> {
        self.delete_if_present::<ConfigMap>(&release_record_name(name))
            .await
    }

    async fn list_releases(&self) -> Result<Vec<ReleaseInfo>, ReleaseError> {
        let params = ListParams::default().labels(&release_record_selector());
        let records = self.api::<ConfigMap>().list(&params).await?;

        let mut releases = Vec::with_capacity(records.items.len());
        for configmap in &records.items {
            match parse_release_record(configmap) {
                Ok(info) => releases.push(self.with_secrets(info).await?),
                Err(e) => warn!(
                    record = %configmap.name_any(),
                    error = %e,
                    "Skipping unreadable release record"
                ),
            }
        }
        Ok(releases)
    }

    async fn ping(&self) -> Result<(), ReleaseError> {
        self.client.apiserver_version().await?;
        Ok(())
    }
}
