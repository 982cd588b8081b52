//! Collector workloads
//!
//! Both topologies share one pod template; the mode decides whether it is
//! wrapped in a Deployment or a DaemonSet. Fields the API server defaults
//! are set to those defaults so a converged workload compares equal.

use super::{config_path, labels, BuildContext, CONFIG_MAP_ENTRY, CONFIG_MOUNT_DIR, MONITORING_PORT, MONITORING_PORT_NAME};
use crate::config::{default_image, OperatorConfig};
use crate::crd::TelemetryCollector;
use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetSpec, DaemonSetUpdateStrategy, Deployment, DeploymentSpec, DeploymentStrategy,
    RollingUpdateDaemonSet, RollingUpdateDeployment,
};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, KeyToPath, PodSecurityContext, PodSpec,
    PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

pub const CONTAINER_NAME: &str = "opentelemetry-collector";
const CONFIG_VOLUME: &str = "otc-internal";
const CONFIG_ARG: &str = "config";

// =============================================================================
// API Server Defaults
// =============================================================================

const REVISION_HISTORY_LIMIT: i32 = 10;
const PROGRESS_DEADLINE_SECONDS: i32 = 600;
const TERMINATION_GRACE_PERIOD_SECONDS: i64 = 30;
/// 0644
const CONFIG_FILE_MODE: i32 = 420;

/// Pull policy the API server assigns when none is given
///
/// `Always` for untagged and `:latest` images, `IfNotPresent` otherwise.
pub fn default_pull_policy(image: &str) -> &'static str {
    if image.contains('@') {
        return "IfNotPresent";
    }
    let last = image.rsplit('/').next().unwrap_or(image);
    match last.split_once(':') {
        Some((_, tag)) if tag != "latest" => "IfNotPresent",
        _ => "Always",
    }
}

/// Resolve the collector image
///
/// Collector spec, then the operator-wide override, then the compiled-in
/// default.
pub fn resolve_image(instance: &TelemetryCollector, config: &OperatorConfig) -> String {
    instance
        .spec
        .image
        .as_ref()
        .filter(|image| !image.is_empty())
        .or(config.default_image_override.as_ref())
        .cloned()
        .unwrap_or_else(default_image)
}

/// Render the container arguments
///
/// Every entry becomes `--key=value` in key order (`--key` for an empty
/// value). The canonical config path is injected unless the collector sets
/// `config` itself.
pub fn render_args(args: &BTreeMap<String, String>) -> Vec<String> {
    let mut args = args.clone();
    args.entry(CONFIG_ARG.to_string()).or_insert_with(config_path);

    args.iter()
        .map(|(key, value)| {
            if value.is_empty() {
                format!("--{}", key)
            } else {
                format!("--{}={}", key, value)
            }
        })
        .collect()
}

fn pod_template(ctx: &BuildContext<'_>) -> PodTemplateSpec {
    let mut annotations = ctx.instance.custom_annotations();
    annotations.insert("prometheus.io/scrape".to_string(), "true".to_string());
    annotations.insert("prometheus.io/port".to_string(), MONITORING_PORT.to_string());
    annotations.insert("prometheus.io/path".to_string(), "/metrics".to_string());

    let image = resolve_image(ctx.instance, ctx.config);
    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image_pull_policy: Some(default_pull_policy(&image).to_string()),
        image: Some(image),
        args: Some(render_args(&ctx.instance.spec.args)),
        ports: Some(vec![ContainerPort {
            name: Some(MONITORING_PORT_NAME.to_string()),
            container_port: MONITORING_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: CONFIG_VOLUME.to_string(),
            mount_path: CONFIG_MOUNT_DIR.to_string(),
            ..Default::default()
        }]),
        termination_message_path: Some("/dev/termination-log".to_string()),
        termination_message_policy: Some("File".to_string()),
        ..Default::default()
    };

    let volume = Volume {
        name: CONFIG_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: Some(ctx.collector_name.clone()),
            items: Some(vec![KeyToPath {
                key: CONFIG_MAP_ENTRY.to_string(),
                path: CONFIG_MAP_ENTRY.to_string(),
                ..Default::default()
            }]),
            default_mode: Some(CONFIG_FILE_MODE),
            ..Default::default()
        }),
        ..Default::default()
    };

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels::child_labels(ctx.instance, &ctx.collector_name)),
            annotations: Some(annotations),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container],
            volumes: Some(vec![volume]),
            restart_policy: Some("Always".to_string()),
            dns_policy: Some("ClusterFirst".to_string()),
            scheduler_name: Some("default-scheduler".to_string()),
            termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD_SECONDS),
            security_context: Some(PodSecurityContext::default()),
            ..Default::default()
        }),
    }
}

fn pod_selector(ctx: &BuildContext<'_>) -> LabelSelector {
    LabelSelector {
        match_labels: Some(labels::selector_labels(ctx.instance, &ctx.collector_name)),
        ..Default::default()
    }
}

/// The replica-controlled collector workload
pub fn deployment(ctx: &BuildContext<'_>) -> Deployment {
    Deployment {
        metadata: ctx.child_meta(&ctx.collector_name),
        spec: Some(DeploymentSpec {
            replicas: Some(ctx.instance.spec.replicas.unwrap_or(1)),
            selector: pod_selector(ctx),
            template: pod_template(ctx),
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDeployment {
                    max_surge: Some(IntOrString::String("25%".to_string())),
                    max_unavailable: Some(IntOrString::String("25%".to_string())),
                }),
            }),
            revision_history_limit: Some(REVISION_HISTORY_LIMIT),
            progress_deadline_seconds: Some(PROGRESS_DEADLINE_SECONDS),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Deployments for the collector: none in daemonset mode
pub fn deployments(ctx: &BuildContext<'_>) -> Vec<Deployment> {
    if ctx.instance.is_daemonset() {
        return Vec::new();
    }
    vec![deployment(ctx)]
}

/// The per-node collector workload
pub fn daemonset(ctx: &BuildContext<'_>) -> DaemonSet {
    DaemonSet {
        metadata: ctx.child_meta(&ctx.collector_name),
        spec: Some(DaemonSetSpec {
            selector: pod_selector(ctx),
            template: pod_template(ctx),
            update_strategy: Some(DaemonSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDaemonSet {
                    max_surge: Some(IntOrString::Int(0)),
                    max_unavailable: Some(IntOrString::Int(1)),
                }),
            }),
            revision_history_limit: Some(REVISION_HISTORY_LIMIT),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// DaemonSets for the collector: only in daemonset mode
pub fn daemonsets(ctx: &BuildContext<'_>) -> Vec<DaemonSet> {
    if !ctx.instance.is_daemonset() {
        return Vec::new();
    }
    vec![daemonset(ctx)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{CollectorMode, TelemetryCollectorSpec};
    use crate::desired::labels::NAME_LABEL;
    use crate::desired::tests::collector;

    fn container(deployment: &Deployment) -> &Container {
        let containers = &deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers;
        assert_eq!(containers.len(), 1);
        &containers[0]
    }

    #[test]
    fn test_proper_deployment() {
        let instance = collector("my-col", TelemetryCollectorSpec::default());
        let config = OperatorConfig::default();
        let ctx = BuildContext::new(&instance, &config).unwrap();

        let d = deployment(&ctx);
        let labels = d.metadata.labels.as_ref().unwrap();
        let annotations = d.metadata.annotations.as_ref().unwrap();

        assert_eq!(d.metadata.name.as_deref(), Some("my-col-collector"));
        assert_eq!(d.metadata.namespace.as_deref(), Some("observability"));
        assert_eq!(annotations["custom-annotation"], "custom-annotation-value");
        assert_eq!(labels["custom-label"], "custom-value");
        assert_eq!(labels[NAME_LABEL], "my-col-collector");
        assert_eq!(d.spec.as_ref().unwrap().replicas, Some(1));
    }

    #[test]
    fn test_canonical_config_path_is_injected() {
        let instance = collector("my-col", TelemetryCollectorSpec::default());
        let config = OperatorConfig::default();
        let ctx = BuildContext::new(&instance, &config).unwrap();

        let d = deployment(&ctx);
        let args = container(&d).args.as_ref().unwrap();

        assert_eq!(args, &vec!["--config=/conf/collector.yaml".to_string()]);
    }

    #[test]
    fn test_deployment_overrides_config() {
        let spec = TelemetryCollectorSpec {
            args: BTreeMap::from([("config".to_string(), "custom-path".to_string())]),
            ..Default::default()
        };
        let instance = collector("my-col", spec);
        let config = OperatorConfig::default();
        let ctx = BuildContext::new(&instance, &config).unwrap();

        let d = deployment(&ctx);
        let args = container(&d).args.as_ref().unwrap();

        assert_eq!(args.len(), 1);
        assert!(args[0].contains("custom-path"));
        assert!(!args[0].contains("/conf/collector.yaml"));
    }

    #[test]
    fn test_args_render_sorted() {
        let args = BTreeMap::from([
            ("metrics-level".to_string(), "detailed".to_string()),
            ("log-level".to_string(), "debug".to_string()),
            ("mem-ballast-size-mib".to_string(), String::new()),
        ]);

        assert_eq!(
            render_args(&args),
            vec![
                "--config=/conf/collector.yaml",
                "--log-level=debug",
                "--mem-ballast-size-mib",
                "--metrics-level=detailed",
            ]
        );
    }

    #[test]
    fn test_image_precedence() {
        let config = OperatorConfig::new(Some("myrepo/custom-image-cli:version".into()), false);

        let plain = collector("my-col", TelemetryCollectorSpec::default());
        assert_eq!(resolve_image(&plain, &config), "myrepo/custom-image-cli:version");

        let pinned = collector(
            "my-col",
            TelemetryCollectorSpec {
                image: Some("myrepo/custom-image:version".into()),
                ..Default::default()
            },
        );
        assert_eq!(resolve_image(&pinned, &config), "myrepo/custom-image:version");

        assert_eq!(resolve_image(&plain, &OperatorConfig::default()), default_image());
    }

    #[test]
    fn test_selector_ignores_custom_labels() {
        let instance = collector("my-col", TelemetryCollectorSpec::default());
        let config = OperatorConfig::default();
        let ctx = BuildContext::new(&instance, &config).unwrap();

        let d = deployment(&ctx);
        let selector = d.spec.as_ref().unwrap().selector.match_labels.clone().unwrap();
        let pod_labels = d.spec.as_ref().unwrap().template.metadata.as_ref().unwrap().labels.clone().unwrap();

        assert!(!selector.contains_key("custom-label"));
        assert!(labels::matches_selector(&pod_labels, &selector));
    }

    #[test]
    fn test_default_pull_policy() {
        assert_eq!(default_pull_policy("otel/collector"), "Always");
        assert_eq!(default_pull_policy("otel/collector:latest"), "Always");
        assert_eq!(default_pull_policy("otel/collector:0.9.0"), "IfNotPresent");
        assert_eq!(default_pull_policy("registry:5000/otel/collector"), "Always");
        assert_eq!(default_pull_policy("otel/collector@sha256:abc"), "IfNotPresent");
    }

    #[test]
    fn test_workloads_carry_server_defaults() {
        let instance = collector("my-col", TelemetryCollectorSpec::default());
        let config = OperatorConfig::default();
        let ctx = BuildContext::new(&instance, &config).unwrap();

        let d = deployment(&ctx);
        let spec = d.spec.as_ref().unwrap();
        assert_eq!(spec.revision_history_limit, Some(10));
        assert_eq!(spec.progress_deadline_seconds, Some(600));
        assert_eq!(spec.strategy.as_ref().unwrap().type_.as_deref(), Some("RollingUpdate"));

        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Always"));
        assert_eq!(pod.dns_policy.as_deref(), Some("ClusterFirst"));
        assert_eq!(pod.termination_grace_period_seconds, Some(30));
        assert_eq!(pod.volumes.as_ref().unwrap()[0].config_map.as_ref().unwrap().default_mode, Some(420));

        let c = container(&d);
        assert!(c.image_pull_policy.is_some());
        assert_eq!(c.termination_message_policy.as_deref(), Some("File"));
        assert_eq!(c.ports.as_ref().unwrap()[0].protocol.as_deref(), Some("TCP"));

        let ds = daemonset(&ctx);
        let strategy = ds.spec.unwrap().update_strategy.unwrap();
        assert_eq!(strategy.rolling_update.unwrap().max_unavailable, Some(IntOrString::Int(1)));
    }

    #[test]
    fn test_no_deployments_when_mode_daemonset() {
        let spec = TelemetryCollectorSpec {
            mode: CollectorMode::DaemonSet,
            ..Default::default()
        };
        let instance = collector("my-col", spec);
        let config = OperatorConfig::default();
        let ctx = BuildContext::new(&instance, &config).unwrap();

        assert!(deployments(&ctx).is_empty());
        let ds = daemonsets(&ctx);
        assert_eq!(ds.len(), 1);
        assert_eq!(ds[0].metadata.name.as_deref(), Some("my-col-collector"));
    }
}
