//! Domain Ports - The managed resource store contract
//!
//! The reconciliation engine only talks to the outside world through
//! [`ResourceStore`]. Adapters (the Kubernetes API, an in-memory store)
//! implement it.

use crate::crd::{ServiceMonitor, TelemetryCollector};
use crate::error::StoreError;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Child Kinds
// =============================================================================

/// Kinds of child objects managed for a collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChildKind {
    /// Configuration payload mounted into the collector pods
    ConfigBlob,
    /// Network endpoints in front of the collector pods
    NetworkEndpoint,
    /// Replica-controlled workload (Deployment mode)
    Workload,
    /// Daemon-topology workload (DaemonSet mode)
    DaemonTopology,
    /// Monitoring integration hook
    MonitoringHook,
}

impl ChildKind {
    /// All kinds, in the order a pass reconciles them
    pub const ALL: [ChildKind; 5] = [
        ChildKind::ConfigBlob,
        ChildKind::NetworkEndpoint,
        ChildKind::Workload,
        ChildKind::DaemonTopology,
        ChildKind::MonitoringHook,
    ];

    /// Kubernetes kind name backing this child kind
    pub fn k8s_kind(&self) -> &'static str {
        match self {
            ChildKind::ConfigBlob => "ConfigMap",
            ChildKind::NetworkEndpoint => "Service",
            ChildKind::Workload => "Deployment",
            ChildKind::DaemonTopology => "DaemonSet",
            ChildKind::MonitoringHook => "ServiceMonitor",
        }
    }
}

impl std::fmt::Display for ChildKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.k8s_kind())
    }
}

/// Store operations, used to give errors context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    List,
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Get => write!(f, "get"),
            Operation::List => write!(f, "list"),
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

// =============================================================================
// Child Objects
// =============================================================================

/// A typed child object, either desired (built this pass) or observed
#[derive(Debug, Clone, PartialEq)]
pub enum ChildObject {
    ConfigBlob(ConfigMap),
    NetworkEndpoint(Service),
    Workload(Deployment),
    DaemonTopology(DaemonSet),
    MonitoringHook(ServiceMonitor),
}

impl ChildObject {
    pub fn kind(&self) -> ChildKind {
        match self {
            ChildObject::ConfigBlob(_) => ChildKind::ConfigBlob,
            ChildObject::NetworkEndpoint(_) => ChildKind::NetworkEndpoint,
            ChildObject::Workload(_) => ChildKind::Workload,
            ChildObject::DaemonTopology(_) => ChildKind::DaemonTopology,
            ChildObject::MonitoringHook(_) => ChildKind::MonitoringHook,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            ChildObject::ConfigBlob(o) => o.meta(),
            ChildObject::NetworkEndpoint(o) => o.meta(),
            ChildObject::Workload(o) => o.meta(),
            ChildObject::DaemonTopology(o) => o.meta(),
            ChildObject::MonitoringHook(o) => o.meta(),
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ChildObject::ConfigBlob(o) => o.meta_mut(),
            ChildObject::NetworkEndpoint(o) => o.meta_mut(),
            ChildObject::Workload(o) => o.meta_mut(),
            ChildObject::DaemonTopology(o) => o.meta_mut(),
            ChildObject::MonitoringHook(o) => o.meta_mut(),
        }
    }

    /// Object name, empty if unset
    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    /// Object namespace, empty if unset
    pub fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    /// Last observed resource version, if the object came from a store
    pub fn resource_version(&self) -> Option<&str> {
        self.meta().resource_version.as_deref()
    }

    /// Labels, empty map if unset
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.meta().labels.clone().unwrap_or_default()
    }
}

// =============================================================================
// Resource Store Port
// =============================================================================

/// Label selector: every key must be present with the given value
pub type LabelSelector = BTreeMap<String, String>;

/// Result of a delete call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Port for the managed resource store
///
/// Every call is a single bounded request. `create`, `update` and `delete`
/// are individually atomic; nothing spans calls.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch the collector resource a pass reconciles against
    async fn get_collector(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<TelemetryCollector>, StoreError>;

    /// Fetch a child object, `None` if absent
    async fn get(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ChildObject>, StoreError>;

    /// List child objects of a kind in a namespace matching all selector labels
    async fn list(
        &self,
        kind: ChildKind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ChildObject>, StoreError>;

    /// Create an object; fails with `AlreadyExists` if the name is taken
    async fn create(&self, object: ChildObject) -> Result<ChildObject, StoreError>;

    /// Replace an object if its current version equals `expected_version`
    async fn update(
        &self,
        object: ChildObject,
        expected_version: &str,
    ) -> Result<ChildObject, StoreError>;

    /// Delete an object by name
    async fn delete(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
    ) -> Result<DeleteOutcome, StoreError>;
}

pub type ResourceStoreRef = Arc<dyn ResourceStore>;
