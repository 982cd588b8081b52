//! ServiceMonitor
//!
//! Minimal client-side definition of the Prometheus Operator's
//! `monitoring.coreos.com/v1` ServiceMonitor. Only the fields the operator
//! writes are modelled; the CRD itself is owned by the Prometheus Operator.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the CRD whose presence gates ServiceMonitor reconciliation
pub const SERVICE_MONITOR_CRD: &str = "servicemonitors.monitoring.coreos.com";

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "ServiceMonitor",
    plural = "servicemonitors",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorSpec {
    /// Selects the Services to scrape
    pub selector: ServiceMonitorSelector,

    /// Endpoints to scrape on the selected Services
    #[serde(default)]
    pub endpoints: Vec<ServiceMonitorEndpoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorEndpoint {
    /// Named Service port
    pub port: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}
