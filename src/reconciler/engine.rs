//! Reconciliation Engine
//!
//! One pass drives every child kind of a collector toward its desired set:
//!
//! 1. validate the collector and build the desired objects of every kind,
//!    tagging each with the controller owner reference (no store call has
//!    happened yet, so a malformed collector mutates nothing)
//! 2. per kind, independently: create missing objects, update drifted ones,
//!    delete owned objects that are no longer desired
//!
//! A failure aborts only the kind it happened in. The pass is safe to
//! re-run from any partial state; nothing is carried over between passes.

use crate::config::OperatorConfig;
use crate::crd::TelemetryCollector;
use crate::desired::{build_kind, labels, BuildContext};
use crate::domain::ports::{
    ChildKind, ChildObject, DeleteOutcome, LabelSelector, Operation, ResourceStoreRef,
};
use crate::error::{Error, Result, StoreError};
use crate::reconciler::merge::merge;
use crate::reconciler::ownership;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

// =============================================================================
// Pass Reports
// =============================================================================

/// What one kind's pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

impl KindSummary {
    /// Whether the pass changed anything in the store
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.deleted == 0
    }

    fn absorb(&mut self, other: &KindSummary) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.deleted += other.deleted;
    }
}

/// Outcome of one kind within a pass
#[derive(Debug)]
pub struct KindReport {
    pub kind: ChildKind,
    pub result: Result<KindSummary>,
}

/// Outcome of a whole pass, one entry per kind in reconcile order
#[derive(Debug, Default)]
pub struct PassReport {
    pub kinds: Vec<KindReport>,
}

impl PassReport {
    pub fn is_success(&self) -> bool {
        self.kinds.iter().all(|report| report.result.is_ok())
    }

    pub fn get(&self, kind: ChildKind) -> Option<&KindReport> {
        self.kinds.iter().find(|report| report.kind == kind)
    }

    pub fn failed_kinds(&self) -> Vec<ChildKind> {
        self.kinds
            .iter()
            .filter(|report| report.result.is_err())
            .map(|report| report.kind)
            .collect()
    }

    /// Totals over the kinds that succeeded
    pub fn summary(&self) -> KindSummary {
        let mut total = KindSummary::default();
        for summary in self.kinds.iter().filter_map(|r| r.result.as_ref().ok()) {
            total.absorb(summary);
        }
        total
    }

    /// Collapse to the totals, or the first error in kind order
    pub fn into_result(self) -> Result<KindSummary> {
        let mut total = KindSummary::default();
        for report in self.kinds {
            total.absorb(&report.result?);
        }
        Ok(total)
    }
}

/// What happened to a single desired object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Created,
    Updated,
    Unchanged,
}

// =============================================================================
// Reconciler
// =============================================================================

/// Drives collectors' children toward their desired state in a store
#[derive(Clone)]
pub struct Reconciler {
    store: ResourceStoreRef,
    config: Arc<OperatorConfig>,
}

impl Reconciler {
    pub fn new(store: ResourceStoreRef, config: Arc<OperatorConfig>) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Whether a kind is reconciled at all in this process
    ///
    /// A disabled kind has an empty desired set, so leftovers are collected.
    pub fn kind_enabled(&self, kind: ChildKind) -> bool {
        match kind {
            ChildKind::MonitoringHook => self.config.monitoring_capability_available,
            _ => true,
        }
    }

    /// Reconcile the collector stored under `namespace/name`
    ///
    /// Returns `None` when the collector no longer exists: its children are
    /// left to the store's cascade deletion.
    pub async fn reconcile_ref(&self, namespace: &str, name: &str) -> Result<Option<KindSummary>> {
        let instance = self
            .store
            .get_collector(namespace, name)
            .await
            .map_err(|source| Error::Lookup {
                namespace: namespace.to_string(),
                name: name.to_string(),
                source,
            })?;

        match instance {
            Some(instance) => self.reconcile(&instance).await.map(Some),
            None => {
                debug!("Collector {}/{} is gone, nothing to reconcile", namespace, name);
                Ok(None)
            }
        }
    }

    /// Run a pass and collapse it to its first error
    pub async fn reconcile(&self, instance: &TelemetryCollector) -> Result<KindSummary> {
        self.run_pass(instance).await?.into_result()
    }

    /// Run a pass, reporting every kind's outcome
    ///
    /// Only validation failures are returned as `Err`; they happen before any
    /// store call.
    #[instrument(skip_all, fields(namespace = %instance.namespace(), name = %instance.name()))]
    pub async fn run_pass(&self, instance: &TelemetryCollector) -> Result<PassReport> {
        let ctx = BuildContext::new(instance, &self.config)?;
        let owner = ownership::owner_reference(instance)?;

        let mut plan = Vec::with_capacity(ChildKind::ALL.len());
        for kind in ChildKind::ALL {
            let desired = if self.kind_enabled(kind) {
                build_kind(&ctx, kind)
            } else {
                debug!("{} support is unavailable, desired set is empty", kind);
                Vec::new()
            };
            let tagged = desired
                .into_iter()
                .map(|object| ownership::tag(object, &owner))
                .collect::<Result<Vec<_>>>()?;
            plan.push((kind, tagged));
        }

        let namespace = instance.namespace();
        let selector = labels::ownership_selector(instance);
        let owner_uid = owner.uid.as_str();
        let selector = &selector;

        let passes = plan.into_iter().map(move |(kind, desired)| async move {
            let result = self
                .reconcile_kind(kind, namespace, owner_uid, selector, desired)
                .await;
            match &result {
                Ok(summary) if summary.is_noop() => debug!("{} converged", kind),
                Ok(summary) => info!(
                    "{} reconciled: {} created, {} updated, {} deleted",
                    kind, summary.created, summary.updated, summary.deleted
                ),
                Err(e) => warn!("{} reconciliation failed: {}", kind, e),
            }
            KindReport { kind, result }
        });

        Ok(PassReport {
            kinds: join_all(passes).await,
        })
    }

    async fn reconcile_kind(
        &self,
        kind: ChildKind,
        namespace: &str,
        owner_uid: &str,
        selector: &LabelSelector,
        desired: Vec<ChildObject>,
    ) -> Result<KindSummary> {
        let mut summary = KindSummary::default();

        // create/update
        for object in &desired {
            match self.apply(owner_uid, object).await? {
                Applied::Created => summary.created += 1,
                Applied::Updated => summary.updated += 1,
                Applied::Unchanged => summary.unchanged += 1,
            }
        }

        // delete whatever we own that is no longer desired
        let keep: BTreeSet<&str> = desired.iter().map(ChildObject::name).collect();
        let existing = self
            .store
            .list(kind, namespace, selector)
            .await
            .map_err(|e| Error::store(kind, Operation::List, e))?;

        for object in existing {
            if keep.contains(object.name()) {
                continue;
            }
            if !ownership::is_controlled_by(&object, owner_uid) {
                debug!(
                    "Leaving {} {}/{} alone, it is not controlled by this collector",
                    kind,
                    namespace,
                    object.name()
                );
                continue;
            }

            match self
                .store
                .delete(kind, namespace, object.name())
                .await
                .map_err(|e| Error::store(kind, Operation::Delete, e))?
            {
                DeleteOutcome::Deleted => {
                    info!("Deleted {} {}/{}", kind, namespace, object.name());
                    summary.deleted += 1;
                }
                DeleteOutcome::NotFound => {
                    debug!("{} {}/{} was already gone", kind, namespace, object.name());
                }
            }
        }

        Ok(summary)
    }

    /// Create or update one desired object
    async fn apply(&self, owner_uid: &str, desired: &ChildObject) -> Result<Applied> {
        let kind = desired.kind();
        let namespace = desired.namespace();
        let name = desired.name();

        let existing = match self.get(kind, namespace, name).await? {
            Some(existing) => existing,
            None => match self.store.create(desired.clone()).await {
                Ok(_) => {
                    info!("Created {} {}/{}", kind, namespace, name);
                    return Ok(Applied::Created);
                }
                Err(StoreError::AlreadyExists) => {
                    debug!("{} {}/{} appeared concurrently, updating instead", kind, namespace, name);
                    self.get(kind, namespace, name).await?.ok_or_else(|| {
                        Error::store(
                            kind,
                            Operation::Create,
                            StoreError::Backend(format!("{} vanished after a create conflict", name)),
                        )
                    })?
                }
                Err(e) => return Err(Error::store(kind, Operation::Create, e)),
            },
        };

        if !ownership::is_controlled_by(&existing, owner_uid) {
            return Err(Error::OwnershipConflict {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }

        let updated = merge(&existing, desired)?;
        if updated == existing {
            return Ok(Applied::Unchanged);
        }

        let version = existing.resource_version().unwrap_or_default().to_string();
        match self.store.update(updated, &version).await {
            Ok(_) => {
                info!("Updated {} {}/{}", kind, namespace, name);
                Ok(Applied::Updated)
            }
            Err(StoreError::NotFound) => {
                // deleted under us; the next pass recreates it
                debug!("{} {}/{} disappeared before update", kind, namespace, name);
                Ok(Applied::Unchanged)
            }
            Err(e) => Err(Error::store(kind, Operation::Update, e)),
        }
    }

    async fn get(&self, kind: ChildKind, namespace: &str, name: &str) -> Result<Option<ChildObject>> {
        self.store
            .get(kind, namespace, name)
            .await
            .map_err(|e| Error::store(kind, Operation::Get, e))
    }
}
