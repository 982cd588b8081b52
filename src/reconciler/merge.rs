//! Update merge
//!
//! Folds a desired object into the observed one: identity metadata
//! (uid, resourceVersion, timestamps, finalizers) stays as observed, the
//! spec payload is replaced wholesale, labels and annotations are a union in
//! which desired values win and foreign keys survive.

use crate::desired::labels::merge_into;
use crate::domain::ports::ChildObject;
use crate::error::{Error, Result};
use crate::reconciler::ownership::controller_of;
use k8s_openapi::api::core::v1::ServiceSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::BTreeMap;

/// Merge `desired` into a copy of `existing`
pub fn merge(existing: &ChildObject, desired: &ChildObject) -> Result<ChildObject> {
    let mut updated = existing.clone();

    match (&mut updated, desired) {
        (ChildObject::ConfigBlob(current), ChildObject::ConfigBlob(wanted)) => {
            current.data = wanted.data.clone();
            current.binary_data = wanted.binary_data.clone();
            current.immutable = wanted.immutable;
        }
        (ChildObject::NetworkEndpoint(current), ChildObject::NetworkEndpoint(wanted)) => {
            let mut spec = wanted.spec.clone();
            if let (Some(spec), Some(observed)) = (spec.as_mut(), current.spec.as_ref()) {
                keep_allocated_addresses(spec, observed);
            }
            current.spec = spec;
        }
        (ChildObject::Workload(current), ChildObject::Workload(wanted)) => {
            current.spec = wanted.spec.clone();
        }
        (ChildObject::DaemonTopology(current), ChildObject::DaemonTopology(wanted)) => {
            current.spec = wanted.spec.clone();
        }
        (ChildObject::MonitoringHook(current), ChildObject::MonitoringHook(wanted)) => {
            current.spec = wanted.spec.clone();
        }
        (current, wanted) => {
            return Err(Error::Internal(format!(
                "cannot merge {} into {}",
                wanted.kind(),
                current.kind()
            )));
        }
    }

    merge_meta(updated.meta_mut(), desired.meta());
    Ok(updated)
}

/// Cluster IPs are assigned by the API server and immutable afterwards
fn keep_allocated_addresses(spec: &mut ServiceSpec, observed: &ServiceSpec) {
    if spec.cluster_ip.is_none() {
        spec.cluster_ip = observed.cluster_ip.clone();
    }
    if spec.cluster_ips.is_none() {
        spec.cluster_ips = observed.cluster_ips.clone();
    }
    if spec.ip_families.is_none() {
        spec.ip_families = observed.ip_families.clone();
    }
    if spec.ip_family_policy.is_none() {
        spec.ip_family_policy = observed.ip_family_policy.clone();
    }
}

fn merge_meta(current: &mut ObjectMeta, desired: &ObjectMeta) {
    current.labels = union(current.labels.take(), desired.labels.as_ref());
    current.annotations = union(current.annotations.take(), desired.annotations.as_ref());
    current.owner_references = merge_owner_references(current.owner_references.take(), desired);
}

/// Label/annotation union; `None` only when neither side has entries
fn union(
    current: Option<BTreeMap<String, String>>,
    desired: Option<&BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    match (current, desired) {
        (current, None) => current,
        (None, Some(desired)) if desired.is_empty() => None,
        (current, Some(desired)) => {
            let mut merged = current.unwrap_or_default();
            merge_into(&mut merged, desired);
            Some(merged)
        }
    }
}

/// Swap in the desired controller reference, keeping every other reference
fn merge_owner_references(
    current: Option<Vec<OwnerReference>>,
    desired: &ObjectMeta,
) -> Option<Vec<OwnerReference>> {
    let controller = match controller_of(desired) {
        Some(controller) => controller.clone(),
        None => return current,
    };

    let mut references: Vec<OwnerReference> = current
        .unwrap_or_default()
        .into_iter()
        .map(|reference| {
            if reference.uid == controller.uid {
                controller.clone()
            } else {
                reference
            }
        })
        .collect();
    if !references.iter().any(|reference| reference.uid == controller.uid) {
        references.push(controller);
    }
    Some(references)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
    use k8s_openapi::api::core::v1::{ConfigMap, Service};

    fn labels(pairs: &[(&str, &str)]) -> Option<BTreeMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn owner(uid: &str, controller: bool) -> OwnerReference {
        OwnerReference {
            api_version: "telemetry.collector-operator.io/v1alpha1".into(),
            kind: "TelemetryCollector".into(),
            name: "my-col".into(),
            uid: uid.into(),
            controller: Some(controller),
            block_owner_deletion: Some(controller),
        }
    }

    fn deployment(meta: ObjectMeta, replicas: i32) -> ChildObject {
        ChildObject::Workload(Deployment {
            metadata: meta,
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    #[test]
    fn test_merge_replaces_spec_and_unions_labels() {
        let existing = deployment(
            ObjectMeta {
                name: Some("my-col-collector".into()),
                resource_version: Some("42".into()),
                uid: Some("child-uid".into()),
                labels: labels(&[("added-by-user", "yes"), ("shared", "old")]),
                owner_references: Some(vec![owner("uid-1", true)]),
                ..Default::default()
            },
            1,
        );
        let desired = deployment(
            ObjectMeta {
                name: Some("my-col-collector".into()),
                labels: labels(&[("shared", "new"), ("custom-label", "custom-value")]),
                annotations: labels(&[("custom-annotation", "v")]),
                owner_references: Some(vec![owner("uid-1", true)]),
                ..Default::default()
            },
            3,
        );

        let merged = merge(&existing, &desired).unwrap();
        let meta = merged.meta();

        assert_eq!(meta.resource_version.as_deref(), Some("42"));
        assert_eq!(meta.uid.as_deref(), Some("child-uid"));
        assert_eq!(meta.labels, labels(&[("added-by-user", "yes"), ("custom-label", "custom-value"), ("shared", "new")]));
        assert_eq!(meta.annotations, labels(&[("custom-annotation", "v")]));
        assert_eq!(meta.owner_references.as_ref().unwrap().len(), 1);

        match merged {
            ChildObject::Workload(d) => assert_eq!(d.spec.unwrap().replicas, Some(3)),
            other => panic!("unexpected kind {}", other.kind()),
        }
    }

    #[test]
    fn test_merge_of_identical_objects_is_identity() {
        let meta = ObjectMeta {
            name: Some("my-col-collector".into()),
            resource_version: Some("7".into()),
            labels: labels(&[("a", "1")]),
            owner_references: Some(vec![owner("uid-1", true)]),
            ..Default::default()
        };
        let existing = deployment(meta.clone(), 2);
        let mut desired_meta = meta;
        desired_meta.resource_version = None;
        let desired = deployment(desired_meta, 2);

        assert_eq!(merge(&existing, &desired).unwrap(), existing);
    }

    #[test]
    fn test_merge_keeps_foreign_owner_references() {
        let foreign = OwnerReference {
            api_version: "v1".into(),
            kind: "Namespace".into(),
            name: "observability".into(),
            uid: "ns-uid".into(),
            ..Default::default()
        };
        let existing = deployment(
            ObjectMeta {
                owner_references: Some(vec![foreign.clone(), owner("uid-1", true)]),
                ..Default::default()
            },
            1,
        );
        let desired = deployment(
            ObjectMeta {
                owner_references: Some(vec![owner("uid-1", true)]),
                ..Default::default()
            },
            1,
        );

        let merged = merge(&existing, &desired).unwrap();
        assert_eq!(
            merged.meta().owner_references.clone().unwrap(),
            vec![foreign, owner("uid-1", true)]
        );
    }

    #[test]
    fn test_merge_keeps_cluster_ip() {
        let existing = ChildObject::NetworkEndpoint(Service {
            spec: Some(ServiceSpec {
                cluster_ip: Some("10.0.0.12".into()),
                cluster_ips: Some(vec!["10.0.0.12".into()]),
                ..Default::default()
            }),
            ..Default::default()
        });
        let desired = ChildObject::NetworkEndpoint(Service {
            spec: Some(ServiceSpec::default()),
            ..Default::default()
        });

        match merge(&existing, &desired).unwrap() {
            ChildObject::NetworkEndpoint(svc) => {
                assert_eq!(svc.spec.unwrap().cluster_ip.as_deref(), Some("10.0.0.12"))
            }
            other => panic!("unexpected kind {}", other.kind()),
        }
    }

    fn default_pod(template: &mut k8s_openapi::api::core::v1::PodTemplateSpec) {
        let pod = template.spec.get_or_insert_with(Default::default);
        pod.restart_policy.get_or_insert_with(|| "Always".into());
        pod.dns_policy.get_or_insert_with(|| "ClusterFirst".into());
        pod.scheduler_name.get_or_insert_with(|| "default-scheduler".into());
        pod.termination_grace_period_seconds.get_or_insert(30);
        pod.security_context.get_or_insert_with(Default::default);
        for volume in pod.volumes.iter_mut().flatten() {
            if let Some(source) = volume.config_map.as_mut() {
                source.default_mode.get_or_insert(420);
            }
        }
        for container in pod.containers.iter_mut() {
            container.image_pull_policy.get_or_insert_with(|| "IfNotPresent".into());
            container.termination_message_path.get_or_insert_with(|| "/dev/termination-log".into());
            container.termination_message_policy.get_or_insert_with(|| "File".into());
            for port in container.ports.iter_mut().flatten() {
                port.protocol.get_or_insert_with(|| "TCP".into());
            }
        }
    }

    /// What the API server hands back after accepting `desired`
    fn as_served(desired: &ChildObject) -> ChildObject {
        use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

        let mut served = desired.clone();
        match &mut served {
            ChildObject::NetworkEndpoint(svc) => {
                let spec = svc.spec.get_or_insert_with(Default::default);
                spec.cluster_ip = Some("10.0.0.12".into());
                spec.cluster_ips = Some(vec!["10.0.0.12".into()]);
                spec.ip_families = Some(vec!["IPv4".into()]);
                spec.ip_family_policy = Some("SingleStack".into());
                spec.type_.get_or_insert_with(|| "ClusterIP".into());
                spec.session_affinity.get_or_insert_with(|| "None".into());
                spec.internal_traffic_policy.get_or_insert_with(|| "Cluster".into());
                for port in spec.ports.iter_mut().flatten() {
                    port.protocol.get_or_insert_with(|| "TCP".into());
                    port.target_port.get_or_insert(IntOrString::Int(port.port));
                }
            }
            ChildObject::Workload(d) => {
                let spec = d.spec.get_or_insert_with(Default::default);
                spec.revision_history_limit.get_or_insert(10);
                spec.progress_deadline_seconds.get_or_insert(600);
                spec.strategy.get_or_insert_with(|| k8s_openapi::api::apps::v1::DeploymentStrategy {
                    type_: Some("RollingUpdate".into()),
                    rolling_update: Some(k8s_openapi::api::apps::v1::RollingUpdateDeployment {
                        max_surge: Some(IntOrString::String("25%".into())),
                        max_unavailable: Some(IntOrString::String("25%".into())),
                    }),
                });
                default_pod(&mut spec.template);
                d.status = Some(Default::default());
            }
            ChildObject::DaemonTopology(ds) => {
                let spec = ds.spec.get_or_insert_with(Default::default);
                spec.revision_history_limit.get_or_insert(10);
                spec.update_strategy.get_or_insert_with(|| k8s_openapi::api::apps::v1::DaemonSetUpdateStrategy {
                    type_: Some("RollingUpdate".into()),
                    rolling_update: Some(k8s_openapi::api::apps::v1::RollingUpdateDaemonSet {
                        max_surge: Some(IntOrString::Int(0)),
                        max_unavailable: Some(IntOrString::Int(1)),
                    }),
                });
                default_pod(&mut spec.template);
                ds.status = Some(Default::default());
            }
            _ => {}
        }
        let meta = served.meta_mut();
        meta.uid = Some("child-uid".into());
        meta.resource_version = Some("3".into());
        meta.generation = Some(1);
        served
    }

    #[test]
    fn test_served_objects_merge_unchanged() {
        use crate::config::OperatorConfig;
        use crate::crd::{CollectorMode, TelemetryCollectorSpec};
        use crate::desired::{build, tests::collector};
        use crate::reconciler::ownership::{owner_reference, tag};

        for mode in [CollectorMode::Deployment, CollectorMode::DaemonSet] {
            let spec = TelemetryCollectorSpec {
                mode,
                config: Some(
                    "receivers:\n  jaeger:\n    protocols:\n      thrift_compact:\n        endpoint: 0.0.0.0:6831\n".into(),
                ),
                ..Default::default()
            };
            let instance = collector("my-col", spec);
            let owner = owner_reference(&instance).unwrap();
            let state = build(&instance, &OperatorConfig::default()).unwrap();

            for desired in state.objects() {
                let desired = tag(desired.clone(), &owner).unwrap();
                let served = as_served(&desired);
                assert_eq!(merge(&served, &desired).unwrap(), served, "{} {}", desired.kind(), desired.name());
            }
        }
    }

    #[test]
    fn test_merge_rejects_mismatched_kinds() {
        let existing = ChildObject::ConfigBlob(ConfigMap::default());
        let desired = deployment(ObjectMeta::default(), 1);
        assert!(matches!(merge(&existing, &desired), Err(Error::Internal(_))));
    }
}
