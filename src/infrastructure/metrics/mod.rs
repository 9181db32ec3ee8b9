//! Prometheus metrics for the dispatch pipeline.
//!
//! - Inbound message outcomes per topic (acknowledged, retained, dead-lettered)
//! - Route delivery results per channel
//! - Worker pool occupancy and saturation
//! - Status publication failures
//! - Template catalog operations

mod helpers;

pub use helpers::{encode_metrics, PipelineMetrics, TemplateMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "dispatch";

lazy_static! {
    // ============================================================================
    // Inbound Metrics
    // ============================================================================

    /// Messages received from the broker
    pub static ref MESSAGES_RECEIVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_received_total", METRIC_PREFIX),
        "Total messages received from the broker",
        &["topic"]
    ).unwrap();

    /// Final disposition of each processed message
    pub static ref MESSAGES_OUTCOME_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_outcome_total", METRIC_PREFIX),
        "Message outcomes (acknowledged, retained, dead_lettered, timed_out)",
        &["topic", "outcome"]
    ).unwrap();

    /// Unit-of-work latency
    pub static ref UNIT_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_unit_latency_seconds", METRIC_PREFIX),
        "Unit-of-work latency in seconds",
        &["topic"],
        vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    // ============================================================================
    // Worker Pool Metrics
    // ============================================================================

    /// Units of work currently running
    pub static ref UNITS_IN_FLIGHT: IntGauge = register_int_gauge!(
        format!("{}_units_in_flight", METRIC_PREFIX),
        "Units of work currently running"
    ).unwrap();

    /// Messages left unacknowledged because the pool was saturated
    pub static ref SATURATION_REJECTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_saturation_rejected_total", METRIC_PREFIX),
        "Messages rejected because every worker permit was taken"
    ).unwrap();

    // ============================================================================
    // Route Metrics
    // ============================================================================

    /// Gateway calls per channel and result
    pub static ref ROUTES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_routes_total", METRIC_PREFIX),
        "Delivery gateway calls",
        &["channel", "result"]
    ).unwrap();

    // ============================================================================
    // Status Publisher Metrics
    // ============================================================================

    /// Outcome records published
    pub static ref STATUS_PUBLISHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_status_published_total", METRIC_PREFIX),
        "Outcome records published",
        &["event_type"]
    ).unwrap();

    /// Outcome records lost to publish failures
    pub static ref STATUS_PUBLISH_FAILED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_status_publish_failed_total", METRIC_PREFIX),
        "Outcome records that could not be published",
        &["event_type"]
    ).unwrap();

    // ============================================================================
    // Template Metrics
    // ============================================================================

    pub static ref TEMPLATE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_template_operations_total", METRIC_PREFIX),
        "Template catalog operations",
        &["operation", "result"]
    ).unwrap();
}
