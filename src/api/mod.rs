//! HTTP endpoint handlers.

mod metrics;

pub use metrics::prometheus_metrics;
