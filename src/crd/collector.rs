//! TelemetryCollector CRD
//!
//! The user-authored desired state: how a telemetry collector should be
//! deployed. Custom labels and annotations live on the resource's own
//! metadata and are propagated to every child object.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// TelemetryCollector CRD
// =============================================================================

/// TelemetryCollector describes one collector deployment.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "telemetry.collector-operator.io",
    version = "v1alpha1",
    kind = "TelemetryCollector",
    plural = "telemetrycollectors",
    shortname = "otelcol",
    derive = "PartialEq",
    printcolumn = r#"{"name": "Mode", "type": "string", "jsonPath": ".spec.mode"}"#,
    printcolumn = r#"{"name": "Image", "type": "string", "jsonPath": ".spec.image"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryCollectorSpec {
    /// How the collector pods are topologically deployed
    #[serde(default)]
    pub mode: CollectorMode,

    /// Container image; falls back to the operator-wide default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Replica count, only meaningful in deployment mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Command-line arguments, rendered as `--key=value`
    #[serde(default)]
    pub args: BTreeMap<String, String>,

    /// Raw collector configuration (YAML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

/// Deployment mode of the collector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CollectorMode {
    /// Replica-controlled workload
    #[default]
    Deployment,
    /// One collector pod per node
    DaemonSet,
}

impl std::fmt::Display for CollectorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectorMode::Deployment => write!(f, "deployment"),
            CollectorMode::DaemonSet => write!(f, "daemonset"),
        }
    }
}

// =============================================================================
// Implementations
// =============================================================================

impl TelemetryCollector {
    /// Get the name of this collector
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Get the namespace of this collector
    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// Custom labels to carry onto child objects
    pub fn custom_labels(&self) -> BTreeMap<String, String> {
        self.metadata.labels.clone().unwrap_or_default()
    }

    /// Annotations to carry onto child objects
    pub fn custom_annotations(&self) -> BTreeMap<String, String> {
        self.metadata.annotations.clone().unwrap_or_default()
    }

    pub fn is_daemonset(&self) -> bool {
        self.spec.mode == CollectorMode::DaemonSet
    }
}
