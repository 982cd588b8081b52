//! Operator-wide configuration
//!
//! [`OperatorConfig`] carries the process-wide overrides the desired-state
//! builder consults. It is loaded once at startup and shared read-only.

use crate::crd::SERVICE_MONITOR_CRD;
use crate::error::{Error, Result};
use backoff::ExponentialBackoff;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{Api, Client};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Collector version baked into the default image
pub const DEFAULT_COLLECTOR_VERSION: &str = match option_env!("COLLECTOR_VERSION") {
    Some(version) => version,
    None => "0.2.0",
};

/// Image repository of the default collector image
pub const DEFAULT_COLLECTOR_REPOSITORY: &str = "quay.io/opentelemetry/opentelemetry-collector";

/// Compiled-in default collector image reference
pub fn default_image() -> String {
    format!("{}:{}", DEFAULT_COLLECTOR_REPOSITORY, DEFAULT_COLLECTOR_VERSION)
}

// =============================================================================
// Operator Configuration
// =============================================================================

/// Process-wide override configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Image used when a collector does not name one
    pub default_image_override: Option<String>,
    /// Whether the ServiceMonitor CRD is registered with the cluster
    pub monitoring_capability_available: bool,
}

impl OperatorConfig {
    pub fn new(default_image_override: Option<String>, monitoring_capability_available: bool) -> Self {
        Self {
            default_image_override: default_image_override.filter(|image| !image.is_empty()),
            monitoring_capability_available,
        }
    }
}

/// Settings for the controller loop
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Periodic resync of converged collectors
    pub resync_interval: Duration,
    /// Base requeue delay after a transient failure
    pub error_requeue: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(300),
            error_requeue: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Feature Probe
// =============================================================================

/// Check once whether the ServiceMonitor CRD is registered
///
/// Transient API failures are retried with exponential backoff for up to
/// `max_elapsed`; if the API stays unreachable the error is returned.
pub async fn probe_monitoring_capability(client: Client, max_elapsed: Duration) -> Result<bool> {
    let crds: Api<CustomResourceDefinition> = Api::all(client);
    let policy = ExponentialBackoff {
        max_elapsed_time: Some(max_elapsed),
        ..Default::default()
    };

    let found = backoff::future::retry(policy, || async {
        crds.get_opt(SERVICE_MONITOR_CRD).await.map_err(|e| {
            debug!("Probing {} failed, retrying: {}", SERVICE_MONITOR_CRD, e);
            backoff::Error::transient(e)
        })
    })
    .await
    .map_err(|e| Error::Configuration(format!("probing {}: {}", SERVICE_MONITOR_CRD, e)))?
    .is_some();

    if found {
        info!("{} is registered, ServiceMonitors will be managed", SERVICE_MONITOR_CRD);
    } else {
        warn!("{} is not registered, ServiceMonitors will not be managed", SERVICE_MONITOR_CRD);
    }

    Ok(found)
}
