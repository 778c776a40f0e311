//! Component C/D: turns the registry's point-in-time view into a stream of
//! state-change events and alerts, and into a short-horizon metric history.

mod events;
mod service;

pub use events::{Alert, AlertSeverity, BoundedRing, MetricSample, StateChangeEvent};
pub use service::{AggregatedMetrics, AlertHandler, BreakerMonitor, MetricsCollector, SyncAlertHandler};
