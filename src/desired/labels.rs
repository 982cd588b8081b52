//! Label policy for child objects
//!
//! Every child carries the marker labels below. The identity label is
//! always the child's own derived name; the instance and managed-by markers
//! are what the garbage-collection selector matches on, so user labels can
//! never replace them either.

use crate::crd::TelemetryCollector;
use std::collections::BTreeMap;

/// Identity label, always the derived child name
pub const NAME_LABEL: &str = "app.kubernetes.io/name";
/// `<namespace>.<name>` of the owning collector
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";

/// Value of the managed-by marker
pub const MANAGED_BY: &str = "collector-operator";

/// Value of the `app.kubernetes.io/instance` label for a collector
pub fn instance_value(namespace: &str, name: &str) -> String {
    format!("{}.{}", namespace, name)
}

/// Selector matching every child owned by the collector, regardless of kind
pub fn ownership_selector(instance: &TelemetryCollector) -> BTreeMap<String, String> {
    let mut selector = BTreeMap::new();
    selector.insert(
        INSTANCE_LABEL.to_string(),
        instance_value(instance.namespace(), instance.name()),
    );
    selector.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    selector
}

/// Immutable labels identifying one child; used for workload and service selectors
pub fn selector_labels(instance: &TelemetryCollector, derived_name: &str) -> BTreeMap<String, String> {
    let mut labels = ownership_selector(instance);
    labels.insert(NAME_LABEL.to_string(), derived_name.to_string());
    labels
}

/// Full label set of a child object
///
/// Starts from the common labels, overlays the collector's custom labels,
/// then reasserts the markers.
pub fn child_labels(instance: &TelemetryCollector, derived_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(PART_OF_LABEL.to_string(), "opentelemetry".to_string());
    labels.insert(COMPONENT_LABEL.to_string(), "opentelemetry-collector".to_string());

    merge_into(&mut labels, &instance.custom_labels());
    merge_into(&mut labels, &selector_labels(instance, derived_name));
    labels
}

/// Union `overlay` into `base`; overlay wins on conflicting keys
pub fn merge_into(base: &mut BTreeMap<String, String>, overlay: &BTreeMap<String, String>) {
    for (key, value) in overlay {
        base.insert(key.clone(), value.clone());
    }
}

/// Whether `labels` contain every entry of `selector`
pub fn matches_selector(labels: &BTreeMap<String, String>, selector: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}
