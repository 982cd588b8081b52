//! Desired-State Builder
//!
//! Pure functions mapping a [`TelemetryCollector`] plus the operator-wide
//! [`OperatorConfig`] to the child objects that should exist for it. Nothing
//! here performs I/O; every pass rebuilds the full desired set from the
//! collector's current fields.
//!
//! | kind            | object                         | name                            |
//! |-----------------|--------------------------------|---------------------------------|
//! | ConfigBlob      | ConfigMap                      | `<name>-collector`              |
//! | NetworkEndpoint | Service (receiver ports)       | `<name>-collector`              |
//! | NetworkEndpoint | Service (monitoring port)      | `<name>-collector-monitoring`   |
//! | Workload        | Deployment (deployment mode)   | `<name>-collector`              |
//! | DaemonTopology  | DaemonSet (daemonset mode)     | `<name>-collector`              |
//! | MonitoringHook  | ServiceMonitor                 | `<name>-collector`              |

pub mod config_blob;
pub mod endpoint;
pub mod labels;
pub mod monitoring;
pub mod ports;
pub mod workload;

use crate::config::OperatorConfig;
use crate::crd::TelemetryCollector;
use crate::domain::ports::{ChildKind, ChildObject};
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::ServicePort;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_yaml::Value;

/// Key of the collector configuration inside the ConfigMap
pub const CONFIG_MAP_ENTRY: &str = "collector.yaml";
/// Directory the ConfigMap is mounted at
pub const CONFIG_MOUNT_DIR: &str = "/conf";
/// Port the collector serves its own metrics on
pub const MONITORING_PORT: i32 = 8888;
pub const MONITORING_PORT_NAME: &str = "monitoring";

/// Longest name a Service may carry (DNS-1035 label)
const MAX_SERVICE_NAME_LEN: usize = 63;
/// Longest value a label may carry
const MAX_LABEL_VALUE_LEN: usize = 63;

/// Canonical config path passed to the collector unless overridden
pub fn config_path() -> String {
    format!("{}/{}", CONFIG_MOUNT_DIR, CONFIG_MAP_ENTRY)
}

/// Name shared by the primary children of a collector
pub fn collector_name(instance_name: &str) -> String {
    format!("{}-collector", instance_name)
}

/// Name of the monitoring Service, derived from the primary child's name
pub fn monitoring_service_name(collector_name: &str) -> String {
    format!("{}-monitoring", collector_name)
}

// =============================================================================
// Build Context
// =============================================================================

/// Everything a builder needs, validated and resolved once per pass
#[derive(Debug, Clone)]
pub struct BuildContext<'a> {
    pub instance: &'a TelemetryCollector,
    pub config: &'a OperatorConfig,
    /// `<name>-collector`
    pub collector_name: String,
    /// Ports discovered from the receivers section of the config payload
    pub receiver_ports: Vec<ServicePort>,
}

impl<'a> BuildContext<'a> {
    /// Validate the collector and resolve derived values
    pub fn new(instance: &'a TelemetryCollector, config: &'a OperatorConfig) -> Result<Self> {
        let parsed = validate(instance)?;
        let receiver_ports = parsed.as_ref().map(ports::receiver_ports).unwrap_or_default();

        Ok(Self {
            instance,
            config,
            collector_name: collector_name(instance.name()),
            receiver_ports,
        })
    }

    pub fn namespace(&self) -> &str {
        self.instance.namespace()
    }

    /// Metadata of a child object named `name`
    pub fn child_meta(&self, name: &str) -> ObjectMeta {
        let annotations = self.instance.custom_annotations();
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace().to_string()),
            labels: Some(labels::child_labels(self.instance, name)),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..Default::default()
        }
    }
}

/// Lowercase alphanumerics and `-`, starting with a letter and ending with
/// an alphanumeric
pub fn is_dns1035_label(value: &str) -> bool {
    let bytes = value.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            value.len() <= MAX_SERVICE_NAME_LEN
                && first.is_ascii_lowercase()
                && (last.is_ascii_lowercase() || last.is_ascii_digit())
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        }
        _ => false,
    }
}

fn invalid(instance: &TelemetryCollector, reason: impl Into<String>) -> Error {
    Error::Validation {
        namespace: instance.namespace().to_string(),
        name: instance.name().to_string(),
        reason: reason.into(),
    }
}

/// Check a collector before anything is built from it
///
/// Returns the parsed configuration payload, if one is set.
pub fn validate(instance: &TelemetryCollector) -> Result<Option<Value>> {
    if instance.name().is_empty() {
        return Err(invalid(instance, "metadata.name is empty"));
    }
    if instance.namespace().is_empty() {
        return Err(invalid(instance, "metadata.namespace is empty"));
    }
    if instance.metadata.uid.as_deref().unwrap_or_default().is_empty() {
        return Err(invalid(instance, "metadata.uid is empty"));
    }

    let longest = monitoring_service_name(&collector_name(instance.name()));
    if longest.len() > MAX_SERVICE_NAME_LEN {
        return Err(invalid(
            instance,
            format!("name is too long, derived name {} exceeds {} characters", longest, MAX_SERVICE_NAME_LEN),
        ));
    }
    if !is_dns1035_label(&longest) {
        return Err(invalid(
            instance,
            format!("derived Service name {} is not a valid DNS-1035 label", longest),
        ));
    }

    let instance_label = labels::instance_value(instance.namespace(), instance.name());
    if instance_label.len() > MAX_LABEL_VALUE_LEN {
        return Err(invalid(
            instance,
            format!(
                "namespace and name are too long, label value {} exceeds {} characters",
                instance_label, MAX_LABEL_VALUE_LEN
            ),
        ));
    }

    if let Some(replicas) = instance.spec.replicas {
        if replicas < 0 {
            return Err(invalid(instance, format!("replicas must not be negative, got {}", replicas)));
        }
    }

    if let Some(key) = instance
        .spec
        .args
        .keys()
        .find(|key| key.is_empty() || key.contains(char::is_whitespace))
    {
        return Err(invalid(instance, format!("invalid argument name {:?}", key)));
    }

    match instance.spec.config.as_deref() {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => serde_yaml::from_str::<Value>(raw)
            .map(Some)
            .map_err(|e| invalid(instance, format!("config is not valid YAML: {}", e))),
    }
}

// =============================================================================
// Desired State
// =============================================================================

/// The ordered desired child set of one pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredState {
    objects: Vec<ChildObject>,
}

impl DesiredState {
    pub fn objects(&self) -> &[ChildObject] {
        &self.objects
    }

    /// Desired objects of one kind, in build order
    pub fn of_kind(&self, kind: ChildKind) -> Vec<ChildObject> {
        self.objects
            .iter()
            .filter(|object| object.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Build the desired objects of a single kind
pub fn build_kind(ctx: &BuildContext<'_>, kind: ChildKind) -> Vec<ChildObject> {
    match kind {
        ChildKind::ConfigBlob => vec![ChildObject::ConfigBlob(config_blob::config_map(ctx))],
        ChildKind::NetworkEndpoint => endpoint::services(ctx)
            .into_iter()
            .map(ChildObject::NetworkEndpoint)
            .collect(),
        ChildKind::Workload => workload::deployments(ctx)
            .into_iter()
            .map(ChildObject::Workload)
            .collect(),
        ChildKind::DaemonTopology => workload::daemonsets(ctx)
            .into_iter()
            .map(ChildObject::DaemonTopology)
            .collect(),
        ChildKind::MonitoringHook => vec![ChildObject::MonitoringHook(monitoring::service_monitor(ctx))],
    }
}

/// Build every desired child object for a collector
///
/// Fails only on a malformed collector, before anything is produced.
pub fn build(instance: &TelemetryCollector, config: &OperatorConfig) -> Result<DesiredState> {
    let ctx = BuildContext::new(instance, config)?;
    let objects = ChildKind::ALL
        .iter()
        .flat_map(|kind| build_kind(&ctx, *kind))
        .collect();
    Ok(DesiredState { objects })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crd::{CollectorMode, TelemetryCollectorSpec};
    use assert_matches::assert_matches;
    use std::collections::BTreeMap;

    /// A collector with custom labels and annotations, as users create them
    pub fn collector(name: &str, spec: TelemetryCollectorSpec) -> TelemetryCollector {
        let mut instance = TelemetryCollector::new(name, spec);
        instance.metadata.namespace = Some("observability".into());
        instance.metadata.uid = Some(format!("uid-{}", name));
        instance.metadata.labels = Some(BTreeMap::from([(
            "custom-label".to_string(),
            "custom-value".to_string(),
        )]));
        instance.metadata.annotations = Some(BTreeMap::from([(
            "custom-annotation".to_string(),
            "custom-annotation-value".to_string(),
        )]));
        instance
    }

    fn names(state: &DesiredState, kind: ChildKind) -> Vec<String> {
        state
            .of_kind(kind)
            .iter()
            .map(|o| o.name().to_string())
            .collect()
    }

    #[test]
    fn test_deployment_mode_desired_set() {
        let instance = collector("my-col", TelemetryCollectorSpec::default());
        let state = build(&instance, &OperatorConfig::default()).unwrap();

        assert_eq!(names(&state, ChildKind::ConfigBlob), vec!["my-col-collector"]);
        assert_eq!(names(&state, ChildKind::Workload), vec!["my-col-collector"]);
        assert!(names(&state, ChildKind::DaemonTopology).is_empty());
        // no receivers configured: only the monitoring service
        assert_eq!(
            names(&state, ChildKind::NetworkEndpoint),
            vec!["my-col-collector-monitoring"]
        );
        assert_eq!(names(&state, ChildKind::MonitoringHook), vec!["my-col-collector"]);
    }

    #[test]
    fn test_daemonset_mode_replaces_workload() {
        let spec = TelemetryCollectorSpec {
            mode: CollectorMode::DaemonSet,
            ..Default::default()
        };
        let instance = collector("my-col", spec);
        let state = build(&instance, &OperatorConfig::default()).unwrap();

        assert!(names(&state, ChildKind::Workload).is_empty());
        assert_eq!(names(&state, ChildKind::DaemonTopology), vec!["my-col-collector"]);
        assert_eq!(state.of_kind(ChildKind::ConfigBlob).len(), 1);
        assert_eq!(state.of_kind(ChildKind::MonitoringHook).len(), 1);
    }

    #[test]
    fn test_build_is_deterministic() {
        let spec = TelemetryCollectorSpec {
            config: Some("receivers:\n  zipkin:\n    endpoint: 0.0.0.0:9411\n".into()),
            ..Default::default()
        };
        let instance = collector("my-col", spec);
        let config = OperatorConfig::default();

        assert_eq!(build(&instance, &config).unwrap(), build(&instance, &config).unwrap());
    }

    #[test]
    fn test_validation_errors() {
        let mut missing_uid = collector("my-col", TelemetryCollectorSpec::default());
        missing_uid.metadata.uid = None;
        assert_matches!(
            build(&missing_uid, &OperatorConfig::default()),
            Err(Error::Validation { .. })
        );

        let negative = collector(
            "my-col",
            TelemetryCollectorSpec {
                replicas: Some(-1),
                ..Default::default()
            },
        );
        assert_matches!(
            build(&negative, &OperatorConfig::default()),
            Err(Error::Validation { reason, .. }) if reason.contains("replicas")
        );

        let bad_config = collector(
            "my-col",
            TelemetryCollectorSpec {
                config: Some("receivers: [unclosed".into()),
                ..Default::default()
            },
        );
        assert_matches!(
            build(&bad_config, &OperatorConfig::default()),
            Err(Error::Validation { reason, .. }) if reason.contains("YAML")
        );

        let bad_arg = collector(
            "my-col",
            TelemetryCollectorSpec {
                args: BTreeMap::from([("log level".to_string(), "debug".to_string())]),
                ..Default::default()
            },
        );
        assert_matches!(
            build(&bad_arg, &OperatorConfig::default()),
            Err(Error::Validation { .. })
        );

        let long_name = collector(&"x".repeat(50), TelemetryCollectorSpec::default());
        assert_matches!(
            build(&long_name, &OperatorConfig::default()),
            Err(Error::Validation { reason, .. }) if reason.contains("too long")
        );
    }

    #[test]
    fn test_names_must_form_valid_service_names() {
        for name in ["my.col", "1col", "My-Col"] {
            let instance = collector(name, TelemetryCollectorSpec::default());
            assert_matches!(
                build(&instance, &OperatorConfig::default()),
                Err(Error::Validation { reason, .. }) if reason.contains("DNS-1035"),
                "{}", name
            );
        }

        assert!(is_dns1035_label("my-col-collector-monitoring"));
        assert!(!is_dns1035_label(""));
        assert!(!is_dns1035_label("col-"));
        assert!(!is_dns1035_label(&"x".repeat(64)));
    }

    #[test]
    fn test_instance_label_must_fit() {
        let mut instance = collector(&"c".repeat(30), TelemetryCollectorSpec::default());
        instance.metadata.namespace = Some("n".repeat(40));
        assert_matches!(
            build(&instance, &OperatorConfig::default()),
            Err(Error::Validation { reason, .. }) if reason.contains("label value")
        );

        let mut fits = collector(&"c".repeat(30), TelemetryCollectorSpec::default());
        fits.metadata.namespace = Some("n".repeat(32));
        assert!(build(&fits, &OperatorConfig::default()).is_ok());
    }

    #[test]
    fn test_monitoring_service_name_derives_from_collector_name() {
        assert_eq!(monitoring_service_name(&collector_name("my-col")), "my-col-collector-monitoring");
        assert_eq!(config_path(), "/conf/collector.yaml");
    }
}
