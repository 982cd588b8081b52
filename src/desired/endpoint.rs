//! Collector Services
//!
//! Fields the API server would otherwise default are spelled out, so an
//! unchanged Service compares equal to what the server returns.

use super::{labels, monitoring_service_name, BuildContext, MONITORING_PORT, MONITORING_PORT_NAME};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::debug;

fn service(ctx: &BuildContext<'_>, name: &str, ports: Vec<ServicePort>) -> Service {
    Service {
        metadata: ctx.child_meta(name),
        spec: Some(ServiceSpec {
            selector: Some(labels::selector_labels(ctx.instance, &ctx.collector_name)),
            ports: Some(ports),
            type_: Some("ClusterIP".to_string()),
            session_affinity: Some("None".to_string()),
            internal_traffic_policy: Some("Cluster".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Service exposing the receiver ports, if the config declares any
pub fn receiver_service(ctx: &BuildContext<'_>) -> Option<Service> {
    if ctx.receiver_ports.is_empty() {
        debug!(
            "Collector {}/{} exposes no receiver ports, skipping {}",
            ctx.namespace(),
            ctx.instance.name(),
            ctx.collector_name
        );
        return None;
    }
    Some(service(ctx, &ctx.collector_name, ctx.receiver_ports.clone()))
}

/// Service exposing the collector's own metrics endpoint
pub fn monitoring_service(ctx: &BuildContext<'_>) -> Service {
    let port = ServicePort {
        name: Some(MONITORING_PORT_NAME.to_string()),
        port: MONITORING_PORT,
        target_port: Some(IntOrString::Int(MONITORING_PORT)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    };
    service(ctx, &monitoring_service_name(&ctx.collector_name), vec![port])
}

pub fn services(ctx: &BuildContext<'_>) -> Vec<Service> {
    receiver_service(ctx)
        .into_iter()
        .chain(std::iter::once(monitoring_service(ctx)))
        .collect()
}
