//! ConfigMap carrying the collector configuration

use super::{BuildContext, CONFIG_MAP_ENTRY};
use k8s_openapi::api::core::v1::ConfigMap;
use std::collections::BTreeMap;

pub fn config_map(ctx: &BuildContext<'_>) -> ConfigMap {
    let payload = ctx.instance.spec.config.clone().unwrap_or_default();

    ConfigMap {
        metadata: ctx.child_meta(&ctx.collector_name),
        data: Some(BTreeMap::from([(CONFIG_MAP_ENTRY.to_string(), payload)])),
        ..Default::default()
    }
}
