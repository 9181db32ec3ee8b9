//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    MESSAGES_OUTCOME_TOTAL, MESSAGES_RECEIVED_TOTAL, ROUTES_TOTAL, SATURATION_REJECTED_TOTAL,
    STATUS_PUBLISHED_TOTAL, STATUS_PUBLISH_FAILED_TOTAL, TEMPLATE_OPERATIONS_TOTAL,
    UNITS_IN_FLIGHT, UNIT_LATENCY,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording pipeline metrics
pub struct PipelineMetrics;

impl PipelineMetrics {
    pub fn record_received(topic: &str) {
        MESSAGES_RECEIVED_TOTAL.with_label_values(&[topic]).inc();
    }

    pub fn record_outcome(topic: &str, outcome: &str, elapsed: Duration) {
        MESSAGES_OUTCOME_TOTAL
            .with_label_values(&[topic, outcome])
            .inc();
        UNIT_LATENCY
            .with_label_values(&[topic])
            .observe(elapsed.as_secs_f64());
    }

    pub fn unit_started() {
        UNITS_IN_FLIGHT.inc();
    }

    pub fn unit_finished() {
        UNITS_IN_FLIGHT.dec();
    }

    pub fn record_saturation_rejected() {
        SATURATION_REJECTED_TOTAL.inc();
    }

    pub fn record_route(channel: &str, success: bool) {
        let result = if success { "success" } else { "failure" };
        ROUTES_TOTAL.with_label_values(&[channel, result]).inc();
    }

    pub fn record_status_published(event_type: &str) {
        STATUS_PUBLISHED_TOTAL.with_label_values(&[event_type]).inc();
    }

    pub fn record_status_publish_failed(event_type: &str) {
        STATUS_PUBLISH_FAILED_TOTAL
            .with_label_values(&[event_type])
            .inc();
    }
}

/// Helper struct for recording template catalog metrics
pub struct TemplateMetrics;

impl TemplateMetrics {
    pub fn record(operation: &str, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        TEMPLATE_OPERATIONS_TOTAL
            .with_label_values(&[operation, result])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_recorded_metrics() {
        PipelineMetrics::record_received("metrics-test-topic");
        PipelineMetrics::record_route("email", true);

        let output = encode_metrics().unwrap();
        assert!(output.contains("dispatch_messages_received_total"));
        assert!(output.contains("metrics-test-topic"));
    }
}
