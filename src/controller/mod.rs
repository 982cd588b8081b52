//! Controller runtime
//!
//! Wires the [`Reconciler`] into a `kube` controller: collectors are watched
//! cluster-wide, changes to owned children re-trigger their owner, and
//! converged collectors are resynced periodically.

pub mod metrics;

pub use metrics::Metrics;

use crate::config::ControllerConfig;
use crate::crd::{ServiceMonitor, TelemetryCollector};
use crate::error::{Error, ErrorAction, Result};
use crate::reconciler::Reconciler;
use dashmap::DashMap;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::runtime::controller::Action;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::{watcher, Controller};
use kube::{Api, Client};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Longest delay between retries of a failing collector
const MAX_ERROR_REQUEUE: Duration = Duration::from_secs(300);

// =============================================================================
// Context
// =============================================================================

/// Shared state handed to every reconcile call
pub struct Context {
    pub reconciler: Reconciler,
    pub metrics: Metrics,
    pub config: ControllerConfig,
    /// Consecutive failures per collector, for backoff
    failures: DashMap<String, u32>,
}

impl Context {
    pub fn new(reconciler: Reconciler, metrics: Metrics, config: ControllerConfig) -> Self {
        Self {
            reconciler,
            metrics,
            config,
            failures: DashMap::new(),
        }
    }

    /// Delay before the next retry of a failing collector
    fn backoff(&self, key: &str) -> Duration {
        let mut attempts = self.failures.entry(key.to_string()).or_insert(0);
        let delay = self
            .config
            .error_requeue
            .saturating_mul(1u32 << (*attempts).min(16));
        *attempts = attempts.saturating_add(1);
        delay.min(MAX_ERROR_REQUEUE)
    }

    fn clear_backoff(&self, key: &str) {
        self.failures.remove(key);
    }

    /// Drop backoff state of collectors for which `exists` is false
    fn forget_missing(&self, exists: impl Fn(&str) -> bool) {
        self.failures.retain(|key, _| exists(key));
    }
}

fn object_key(instance: &TelemetryCollector) -> String {
    format!("{}/{}", instance.namespace(), instance.name())
}

fn is_cached(cache: &Store<TelemetryCollector>, key: &str) -> bool {
    match key.split_once('/') {
        Some((namespace, name)) => cache
            .get(&ObjectRef::new(name).within(namespace))
            .is_some(),
        None => false,
    }
}

// =============================================================================
// Reconcile / Error Policy
// =============================================================================

/// Reconcile one collector
pub async fn reconcile(instance: Arc<TelemetryCollector>, ctx: Arc<Context>) -> Result<Action> {
    if instance.metadata.deletion_timestamp.is_some() {
        let key = object_key(&instance);
        debug!("Collector {} is being deleted, children are garbage collected", key);
        ctx.clear_backoff(&key);
        return Ok(Action::await_change());
    }

    let started = Instant::now();
    let report = match ctx.reconciler.run_pass(&instance).await {
        Ok(report) => report,
        Err(e) => {
            ctx.metrics.record_rejected();
            return Err(e);
        }
    };
    ctx.metrics.record_pass(&report, started.elapsed());

    let summary = report.into_result()?;
    ctx.clear_backoff(&object_key(&instance));
    if !summary.is_noop() {
        info!(
            "Collector {} reconciled: {} created, {} updated, {} deleted",
            object_key(&instance),
            summary.created,
            summary.updated,
            summary.deleted
        );
    }
    Ok(Action::requeue(ctx.config.resync_interval))
}

/// Map a failed reconcile to the next requeue
pub fn error_policy(instance: Arc<TelemetryCollector>, err: &Error, ctx: Arc<Context>) -> Action {
    let key = object_key(&instance);
    match err.action() {
        ErrorAction::RequeueWithBackoff => {
            let delay = ctx.backoff(&key);
            warn!("Reconciling {} failed, retrying in {:?}: {}", key, delay, err);
            Action::requeue(delay)
        }
        ErrorAction::RequeueAfter(delay) => {
            warn!("Reconciling {} blocked, retrying in {:?}: {}", key, delay, err);
            Action::requeue(delay)
        }
        ErrorAction::NoRequeue => {
            error!("Collector {} cannot be reconciled until it changes: {}", key, err);
            Action::await_change()
        }
    }
}

// =============================================================================
// Run
// =============================================================================

/// Run the controller until a shutdown signal arrives
pub async fn run(client: Client, ctx: Arc<Context>) {
    let collectors: Api<TelemetryCollector> = Api::all(client.clone());

    let mut controller = Controller::new(collectors, watcher::Config::default())
        .owns(Api::<ConfigMap>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Service>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Deployment>::all(client.clone()), watcher::Config::default())
        .owns(Api::<DaemonSet>::all(client.clone()), watcher::Config::default());

    if ctx.reconciler.config().monitoring_capability_available {
        controller = controller.owns(
            Api::<ServiceMonitor>::all(client.clone()),
            watcher::Config::default(),
        );
    } else {
        info!("ServiceMonitor CRD not available, monitoring hooks are disabled");
    }

    // collectors removed without a deletion pass leave backoff entries behind
    let cache = controller.store();
    let sweep = ctx.clone();

    info!("Starting collector controller");
    controller
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| {
            sweep.forget_missing(|key| is_cached(&cache, key));
            async move {
                match res {
                    Ok((object, _)) => debug!("Reconciled {}", object),
                    Err(e) => warn!("Reconcile loop error: {}", e),
                }
            }
        })
        .await;
    info!("Collector controller stopped");
}
