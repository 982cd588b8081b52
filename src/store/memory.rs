//! In-memory store
//!
//! A `DashMap`-backed implementation of the store contract with the same
//! observable semantics as the API server: monotonically increasing resource
//! versions, uid assignment, label-selector listing, compare-and-swap
//! updates and owner-driven cascade deletion. Faults can be injected per
//! (kind, operation) to exercise failure and race paths.

use crate::crd::TelemetryCollector;
use crate::desired::labels::matches_selector;
use crate::domain::ports::{
    ChildKind, ChildObject, DeleteOutcome, LabelSelector, Operation, ResourceStore,
};
use crate::error::StoreError;
use crate::reconciler::ownership::controller_of;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

// =============================================================================
// Keys and Faults
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct ObjectKey {
    kind: ChildKind,
    namespace: String,
    name: String,
}

impl ObjectKey {
    fn of(object: &ChildObject) -> Self {
        Self {
            kind: object.kind(),
            namespace: object.namespace().to_string(),
            name: object.name().to_string(),
        }
    }
}

/// A one-shot fault triggered by the next matching store call
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail the call with a backend error
    Fail(String),
    /// Another actor writes this object just before the call runs
    Preempt(ChildObject),
}

// =============================================================================
// Memory Store
// =============================================================================

/// In-process resource store
#[derive(Default)]
pub struct MemoryStore {
    objects: DashMap<ObjectKey, ChildObject>,
    collectors: DashMap<(String, String), TelemetryCollector>,
    faults: DashMap<(ChildKind, Operation), Fault>,
    version: AtomicU64,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Assign a fresh resource version, and a uid if the object has none
    fn stamp(&self, object: &mut ChildObject, uid: Option<String>) {
        let version = self.next_version();
        let meta = object.meta_mut();
        meta.resource_version = Some(version.to_string());
        meta.uid = uid.or_else(|| meta.uid.take()).or_else(|| Some(format!("uid-{}", version)));
    }

    fn trigger(&self, kind: ChildKind, operation: Operation) -> Result<(), StoreError> {
        match self.faults.remove(&(kind, operation)) {
            Some((_, Fault::Fail(reason))) => {
                debug!("Injected failure on {} {}", operation, kind);
                Err(StoreError::Backend(reason))
            }
            Some((_, Fault::Preempt(object))) => {
                debug!("Injected concurrent write before {} {}", operation, kind);
                self.put(object);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Arm a fault for the next `operation` on `kind`
    pub fn inject(&self, kind: ChildKind, operation: Operation, fault: Fault) {
        self.faults.insert((kind, operation), fault);
    }

    /// Store an object unconditionally, as another actor would
    pub fn put(&self, mut object: ChildObject) -> ChildObject {
        let key = ObjectKey::of(&object);
        let uid = self
            .objects
            .get(&key)
            .and_then(|current| current.meta().uid.clone());
        self.stamp(&mut object, uid);
        self.objects.insert(key, object.clone());
        object
    }

    /// Register a collector, assigning a uid if it has none
    pub fn insert_collector(&self, mut instance: TelemetryCollector) -> TelemetryCollector {
        let version = self.next_version();
        instance.metadata.resource_version = Some(version.to_string());
        if instance.metadata.uid.is_none() {
            instance.metadata.uid = Some(format!("uid-{}", version));
        }
        let key = (instance.namespace().to_string(), instance.name().to_string());
        self.collectors.insert(key, instance.clone());
        instance
    }

    /// Remove a collector and cascade-delete everything it controls
    ///
    /// Returns the number of children deleted.
    pub fn remove_collector(&self, namespace: &str, name: &str) -> usize {
        let removed = self
            .collectors
            .remove(&(namespace.to_string(), name.to_string()));
        let uid = match removed.and_then(|(_, instance)| instance.metadata.uid) {
            Some(uid) => uid,
            None => return 0,
        };

        let before = self.objects.len();
        self.objects.retain(|_, object| {
            controller_of(object.meta()).map_or(true, |owner| owner.uid != uid)
        });
        before - self.objects.len()
    }

    /// Stored objects of one kind, ordered by namespace and name
    pub fn objects(&self, kind: ChildKind) -> Vec<ChildObject> {
        let mut entries: Vec<(ObjectKey, ChildObject)> = self
            .objects
            .iter()
            .filter(|entry| entry.key().kind == kind)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, object)| object).collect()
    }

    /// Look up an object without going through the store contract
    pub fn find(&self, kind: ChildKind, namespace: &str, name: &str) -> Option<ChildObject> {
        let key = ObjectKey {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.objects.get(&key).map(|object| object.value().clone())
    }

    /// Total number of stored child objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Number of successful create/update/delete calls so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_collector(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<TelemetryCollector>, StoreError> {
        Ok(self
            .collectors
            .get(&(namespace.to_string(), name.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn get(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ChildObject>, StoreError> {
        self.trigger(kind, Operation::Get)?;
        Ok(self.find(kind, namespace, name))
    }

    async fn list(
        &self,
        kind: ChildKind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ChildObject>, StoreError> {
        self.trigger(kind, Operation::List)?;
        Ok(self
            .objects(kind)
            .into_iter()
            .filter(|object| object.namespace() == namespace)
            .filter(|object| matches_selector(&object.labels(), selector))
            .collect())
    }

    async fn create(&self, mut object: ChildObject) -> Result<ChildObject, StoreError> {
        self.trigger(object.kind(), Operation::Create)?;

        match self.objects.entry(ObjectKey::of(&object)) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists),
            Entry::Vacant(slot) => {
                self.stamp(&mut object, None);
                slot.insert(object.clone());
                self.writes.fetch_add(1, Ordering::Relaxed);
                Ok(object)
            }
        }
    }

    async fn update(
        &self,
        mut object: ChildObject,
        expected_version: &str,
    ) -> Result<ChildObject, StoreError> {
        self.trigger(object.kind(), Operation::Update)?;

        let mut current = self
            .objects
            .get_mut(&ObjectKey::of(&object))
            .ok_or(StoreError::NotFound)?;
        if current.resource_version() != Some(expected_version) {
            return Err(StoreError::VersionConflict {
                expected: expected_version.to_string(),
            });
        }

        let uid = current.meta().uid.clone();
        self.stamp(&mut object, uid);
        *current = object.clone();
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(object)
    }

    async fn delete(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
    ) -> Result<DeleteOutcome, StoreError> {
        self.trigger(kind, Operation::Delete)?;

        let key = ObjectKey {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        match self.objects.remove(&key) {
            Some(_) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                Ok(DeleteOutcome::Deleted)
            }
            None => Ok(DeleteOutcome::NotFound),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
