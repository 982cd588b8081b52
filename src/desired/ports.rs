//! Receiver port discovery
//!
//! Reads the `receivers` section of a collector configuration and turns
//! every `endpoint: host:port` it finds into a Service port.

use k8s_openapi::api::core::v1::ServicePort;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde_yaml::Value;
use std::collections::BTreeSet;
use tracing::debug;

/// Longest valid Service port name
const MAX_PORT_NAME_LEN: usize = 15;

/// Receiver protocols that listen on UDP
const UDP_PROTOCOLS: &[&str] = &["thrift_compact", "thrift_binary"];

/// Extract the ports exposed by the receivers of a parsed configuration
///
/// Receivers are visited in document order. A receiver either has a direct
/// `endpoint`, or per-protocol endpoints under `protocols`. The first
/// receiver claiming a port number wins. Port names are unique within the
/// result: a name that is unusable or already taken becomes `port-<number>`.
pub fn receiver_ports(config: &Value) -> Vec<ServicePort> {
    let receivers = match config.get("receivers").and_then(Value::as_mapping) {
        Some(receivers) => receivers,
        None => return Vec::new(),
    };

    let mut seen = BTreeSet::new();
    let mut names = BTreeSet::new();
    let mut ports = Vec::new();

    for (receiver, settings) in receivers {
        let receiver = match receiver.as_str() {
            Some(name) => name,
            None => continue,
        };

        let mut endpoints = Vec::new();
        if let Some(endpoint) = settings.get("endpoint").and_then(Value::as_str) {
            endpoints.push((receiver.to_string(), endpoint, false));
        }
        if let Some(protocols) = settings.get("protocols").and_then(Value::as_mapping) {
            for (protocol, protocol_settings) in protocols {
                let endpoint = protocol_settings.get("endpoint").and_then(Value::as_str);
                if let (Some(protocol), Some(endpoint)) = (protocol.as_str(), endpoint) {
                    let udp = UDP_PROTOCOLS.contains(&protocol);
                    endpoints.push((format!("{}-{}", receiver, protocol), endpoint, udp));
                }
            }
        }

        for (name, endpoint, udp) in endpoints {
            let port = match parse_port(endpoint) {
                Some(port) => port,
                None => {
                    debug!("Receiver {} endpoint {:?} has no usable port", name, endpoint);
                    continue;
                }
            };
            if !seen.insert(port) {
                continue;
            }

            let fallback = format!("port-{}", port);
            let name = match port_name(&name) {
                Some(name) if !names.contains(&name) && !claims_other_port(&name, &fallback) => name,
                _ => fallback,
            };
            names.insert(name.clone());

            ports.push(ServicePort {
                name: Some(name),
                port,
                target_port: Some(IntOrString::Int(port)),
                protocol: Some(if udp { "UDP" } else { "TCP" }.to_string()),
                ..Default::default()
            });
        }
    }

    ports
}

/// Whether `name` looks like the fallback name of a different port
fn claims_other_port(name: &str, fallback: &str) -> bool {
    name != fallback
        && name
            .strip_prefix("port-")
            .is_some_and(|rest| rest.bytes().all(|b| b.is_ascii_digit()))
}

/// Port number of a `host:port` endpoint
fn parse_port(endpoint: &str) -> Option<i32> {
    let (_, port) = endpoint.rsplit_once(':')?;
    port.parse::<i32>().ok().filter(|p| (1..=65535).contains(p))
}

/// Sanitise a receiver name into a valid Service port name
///
/// Lowercase alphanumerics and single `-`, at least one letter, at most 15
/// characters. `None` when the sanitised name would not fit or is empty.
pub fn port_name(raw: &str) -> Option<String> {
    let mut name = String::with_capacity(raw.len());
    for c in raw.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c);
        } else if !name.is_empty() && !name.ends_with('-') {
            name.push('-');
        }
    }
    let name = name.trim_end_matches('-');

    let usable = !name.is_empty()
        && name.len() <= MAX_PORT_NAME_LEN
        && name.chars().any(|c| c.is_ascii_lowercase());
    usable.then(|| name.to_string())
}
