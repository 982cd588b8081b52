//! Custom Resource Definitions
//!
//! - TelemetryCollector: the collector deployment a user asks for
//! - ServiceMonitor: the Prometheus Operator resource created for it

pub mod collector;
pub mod service_monitor;

pub use collector::*;
pub use service_monitor::*;
