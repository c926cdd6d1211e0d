//! Metrics and logging for the Portico gateway.

pub mod exporter;
pub mod logger;
pub mod metrics;

pub use exporter::PrometheusExporter;
pub use metrics::{MetricsCollector, MountCycle, RouteBudget};
