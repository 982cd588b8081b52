//! Collector Operator
//!
//! A Kubernetes operator that runs OpenTelemetry collectors described by
//! `TelemetryCollector` custom resources.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Controller Runtime                        │
//! │        (watch collectors + owned children, resync)            │
//! ├──────────────────────────────────────────────────────────────┤
//! │                     Reconciliation Engine                     │
//! │   validate → build desired → tag owner → apply → collect      │
//! ├───────────────────────────────┬──────────────────────────────┤
//! │     Desired-State Builder     │       Ownership / Merge      │
//! │ ConfigMap Service Deployment  │  controller refs, label and  │
//! │ DaemonSet ServiceMonitor      │  annotation union            │
//! ├───────────────────────────────┴──────────────────────────────┤
//! │                     Resource Store (port)                     │
//! │        KubeStore (API server)    MemoryStore (in-process)     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controller`]: kube controller wiring and metrics
//! - [`reconciler`]: the per-collector reconciliation pass
//! - [`desired`]: desired child objects derived from a collector
//! - [`store`]: resource store implementations
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: child kinds and the store contract
//! - [`config`]: operator-wide configuration
//! - [`error`]: Error types and handling

pub mod config;
pub mod controller;
pub mod crd;
pub mod desired;
pub mod domain;
pub mod error;
pub mod reconciler;
pub mod store;

// Re-export commonly used types
pub use config::{ControllerConfig, OperatorConfig};

pub use crd::{CollectorMode, ServiceMonitor, TelemetryCollector, TelemetryCollectorSpec};

pub use desired::{build, DesiredState};

pub use domain::ports::{
    ChildKind, ChildObject, DeleteOutcome, LabelSelector, Operation, ResourceStore,
    ResourceStoreRef,
};

pub use error::{Error, ErrorAction, Result, StoreError};

pub use reconciler::{KindReport, KindSummary, PassReport, Reconciler};

pub use store::{KubeStore, MemoryStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
