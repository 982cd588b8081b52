//! Kubernetes API store
//!
//! Implements the store contract against the API server. Optimistic
//! concurrency comes for free: a replace carrying a stale
//! `metadata.resourceVersion` is rejected with 409.

use crate::crd::{ServiceMonitor, TelemetryCollector};
use crate::domain::ports::{ChildKind, ChildObject, DeleteOutcome, LabelSelector, ResourceStore};
use crate::error::StoreError;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::debug;

/// Store backed by a Kubernetes client
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Render a selector in `k=v,k=v` form
pub fn selector_string(selector: &LabelSelector) -> String {
    selector
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

fn status_code(error: &kube::Error) -> Option<u16> {
    match error {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    }
}

// =============================================================================
// Typed Helpers
// =============================================================================

async fn get_typed<K>(api: Api<K>, name: &str) -> Result<Option<K>, StoreError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    Ok(api.get_opt(name).await?)
}

async fn list_typed<K>(api: Api<K>, selector: &LabelSelector) -> Result<Vec<K>, StoreError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let params = ListParams::default().labels(&selector_string(selector));
    Ok(api.list(&params).await?.items)
}

async fn create_typed<K>(api: Api<K>, object: &K) -> Result<K, StoreError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    api.create(&PostParams::default(), object)
        .await
        .map_err(|e| match status_code(&e) {
            Some(409) => StoreError::AlreadyExists,
            _ => StoreError::Kube(e),
        })
}

async fn replace_typed<K>(api: Api<K>, mut object: K, expected_version: &str) -> Result<K, StoreError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    object.meta_mut().resource_version = Some(expected_version.to_string());
    let name = object.meta().name.clone().unwrap_or_default();

    api.replace(&name, &PostParams::default(), &object)
        .await
        .map_err(|e| match status_code(&e) {
            Some(404) => StoreError::NotFound,
            Some(409) => StoreError::VersionConflict {
                expected: expected_version.to_string(),
            },
            _ => StoreError::Kube(e),
        })
}

async fn delete_typed<K>(api: Api<K>, name: &str) -> Result<DeleteOutcome, StoreError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(DeleteOutcome::Deleted),
        Err(e) if status_code(&e) == Some(404) => Ok(DeleteOutcome::NotFound),
        Err(e) => Err(StoreError::Kube(e)),
    }
}

// =============================================================================
// ResourceStore Implementation
// =============================================================================

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_collector(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<TelemetryCollector>, StoreError> {
        get_typed(self.api::<TelemetryCollector>(namespace), name).await
    }

    async fn get(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ChildObject>, StoreError> {
        debug!("GET {} {}/{}", kind, namespace, name);
        let object = match kind {
            ChildKind::ConfigBlob => get_typed(self.api::<ConfigMap>(namespace), name)
                .await?
                .map(ChildObject::ConfigBlob),
            ChildKind::NetworkEndpoint => get_typed(self.api::<Service>(namespace), name)
                .await?
                .map(ChildObject::NetworkEndpoint),
            ChildKind::Workload => get_typed(self.api::<Deployment>(namespace), name)
                .await?
                .map(ChildObject::Workload),
            ChildKind::DaemonTopology => get_typed(self.api::<DaemonSet>(namespace), name)
                .await?
                .map(ChildObject::DaemonTopology),
            ChildKind::MonitoringHook => get_typed(self.api::<ServiceMonitor>(namespace), name)
                .await?
                .map(ChildObject::MonitoringHook),
        };
        Ok(object)
    }

    async fn list(
        &self,
        kind: ChildKind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ChildObject>, StoreError> {
        debug!("LIST {} in {} matching {}", kind, namespace, selector_string(selector));
        let objects = match kind {
            ChildKind::ConfigBlob => list_typed(self.api::<ConfigMap>(namespace), selector)
                .await?
                .into_iter()
                .map(ChildObject::ConfigBlob)
                .collect(),
            ChildKind::NetworkEndpoint => list_typed(self.api::<Service>(namespace), selector)
                .await?
                .into_iter()
                .map(ChildObject::NetworkEndpoint)
                .collect(),
            ChildKind::Workload => list_typed(self.api::<Deployment>(namespace), selector)
                .await?
                .into_iter()
                .map(ChildObject::Workload)
                .collect(),
            ChildKind::DaemonTopology => list_typed(self.api::<DaemonSet>(namespace), selector)
                .await?
                .into_iter()
                .map(ChildObject::DaemonTopology)
                .collect(),
            ChildKind::MonitoringHook => list_typed(self.api::<ServiceMonitor>(namespace), selector)
                .await?
                .into_iter()
                .map(ChildObject::MonitoringHook)
                .collect(),
        };
        Ok(objects)
    }

    async fn create(&self, object: ChildObject) -> Result<ChildObject, StoreError> {
        let namespace = object.namespace().to_string();
        let created = match object {
            ChildObject::ConfigBlob(o) => {
                ChildObject::ConfigBlob(create_typed(self.api(&namespace), &o).await?)
            }
            ChildObject::NetworkEndpoint(o) => {
                ChildObject::NetworkEndpoint(create_typed(self.api(&namespace), &o).await?)
            }
            ChildObject::Workload(o) => {
                ChildObject::Workload(create_typed(self.api(&namespace), &o).await?)
            }
            ChildObject::DaemonTopology(o) => {
                ChildObject::DaemonTopology(create_typed(self.api(&namespace), &o).await?)
            }
            ChildObject::MonitoringHook(o) => {
                ChildObject::MonitoringHook(create_typed(self.api(&namespace), &o).await?)
            }
        };
        Ok(created)
    }

    async fn update(
        &self,
        object: ChildObject,
        expected_version: &str,
    ) -> Result<ChildObject, StoreError> {
        let namespace = object.namespace().to_string();
        let updated = match object {
            ChildObject::ConfigBlob(o) => {
                ChildObject::ConfigBlob(replace_typed(self.api(&namespace), o, expected_version).await?)
            }
            ChildObject::NetworkEndpoint(o) => ChildObject::NetworkEndpoint(
                replace_typed(self.api(&namespace), o, expected_version).await?,
            ),
            ChildObject::Workload(o) => {
                ChildObject::Workload(replace_typed(self.api(&namespace), o, expected_version).await?)
            }
            ChildObject::DaemonTopology(o) => ChildObject::DaemonTopology(
                replace_typed(self.api(&namespace), o, expected_version).await?,
            ),
            ChildObject::MonitoringHook(o) => ChildObject::MonitoringHook(
                replace_typed(self.api(&namespace), o, expected_version).await?,
            ),
        };
        Ok(updated)
    }

    async fn delete(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
    ) -> Result<DeleteOutcome, StoreError> {
        match kind {
            ChildKind::ConfigBlob => delete_typed(self.api::<ConfigMap>(namespace), name).await,
            ChildKind::NetworkEndpoint => delete_typed(self.api::<Service>(namespace), name).await,
            ChildKind::Workload => delete_typed(self.api::<Deployment>(namespace), name).await,
            ChildKind::DaemonTopology => delete_typed(self.api::<DaemonSet>(namespace), name).await,
            ChildKind::MonitoringHook => {
                delete_typed(self.api::<ServiceMonitor>(namespace), name).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_selector_string() {
        let selector = BTreeMap::from([
            ("app.kubernetes.io/managed-by".to_string(), "collector-operator".to_string()),
            ("app.kubernetes.io/instance".to_string(), "observability.my-col".to_string()),
        ]);
        assert_eq!(
            selector_string(&selector),
            "app.kubernetes.io/instance=observability.my-col,app.kubernetes.io/managed-by=collector-operator"
        );
    }
}
