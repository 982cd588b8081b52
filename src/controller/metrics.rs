//! Controller metrics
//!
//! Registered on an explicit [`Registry`] so tests can build as many
//! instances as they like without colliding in the global default registry.

use crate::domain::ports::ChildKind;
use crate::error::Result;
use crate::reconciler::PassReport;
use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};
use std::time::Duration;

/// Reconciliation metrics
#[derive(Clone)]
pub struct Metrics {
    reconciliations: IntCounterVec,
    kind_failures: IntCounterVec,
    duration: Histogram,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let reconciliations = IntCounterVec::new(
            Opts::new(
                "collector_operator_reconciliations_total",
                "Reconciliation passes by result",
            ),
            &["result"],
        )?;
        let kind_failures = IntCounterVec::new(
            Opts::new(
                "collector_operator_kind_failures_total",
                "Failed child kind reconciliations",
            ),
            &["kind"],
        )?;
        let duration = Histogram::with_opts(
            HistogramOpts::new(
                "collector_operator_reconcile_duration_seconds",
                "Duration of reconciliation passes",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(kind_failures.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            reconciliations,
            kind_failures,
            duration,
        })
    }

    /// Record a completed pass
    pub fn record_pass(&self, report: &PassReport, elapsed: Duration) {
        self.duration.observe(elapsed.as_secs_f64());
        let result = if report.is_success() { "success" } else { "error" };
        self.reconciliations.with_label_values(&[result]).inc();
        for kind in report.failed_kinds() {
            self.record_kind_failure(kind);
        }
    }

    /// Record a pass rejected before any store call
    pub fn record_rejected(&self) {
        self.reconciliations.with_label_values(&["invalid"]).inc();
    }

    fn record_kind_failure(&self, kind: ChildKind) {
        self.kind_failures
            .with_label_values(&[kind.k8s_kind()])
            .inc();
    }
}
