//! ServiceMonitor for the collector's metrics endpoint

use super::{labels, monitoring_service_name, BuildContext, MONITORING_PORT_NAME};
use crate::crd::{ServiceMonitor, ServiceMonitorEndpoint, ServiceMonitorSelector, ServiceMonitorSpec};

/// ServiceMonitor scraping the monitoring Service
pub fn service_monitor(ctx: &BuildContext<'_>) -> ServiceMonitor {
    let selector = labels::selector_labels(ctx.instance, &monitoring_service_name(&ctx.collector_name));

    let mut monitor = ServiceMonitor::new(
        &ctx.collector_name,
        ServiceMonitorSpec {
            selector: ServiceMonitorSelector {
                match_labels: selector,
            },
            endpoints: vec![ServiceMonitorEndpoint {
                port: MONITORING_PORT_NAME.to_string(),
                path: None,
            }],
        },
    );
    monitor.metadata = ctx.child_meta(&ctx.collector_name);
    monitor
}
