//! Best-effort emission of outcome records.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::broker::{BrokerError, EventPublisher};
use crate::domain::notification::Channel;
use crate::metrics::PipelineMetrics;

use super::events::{self, OutcomeRecord};

/// Publishes outcome records onto their topics.
///
/// Publish failures are logged and counted, never retried and never
/// returned. `dead_letter` is the exception: it reports failure because the
/// caller's acknowledgment depends on it.
pub struct StatusPublisher {
    publisher: Arc<dyn EventPublisher>,
    service: String,
    dead_letter_topic: String,
}

impl StatusPublisher {
    pub fn new(
        publisher: Arc<dyn EventPublisher>,
        service: impl Into<String>,
        dead_letter_topic: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            service: service.into(),
            dead_letter_topic: dead_letter_topic.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Publish a record to its kind's topic; failures are swallowed.
    pub async fn emit(&self, record: OutcomeRecord) {
        let Some(topic) = record.kind.topic() else {
            tracing::warn!(
                event_type = record.kind.as_str(),
                "Outcome kind has no fixed topic, record dropped"
            );
            return;
        };

        let event_type = record.kind.as_str();
        let payload = record.to_payload(&self.service);

        match self.publisher.publish(topic, &record.key, &payload).await {
            Ok(id) => {
                PipelineMetrics::record_status_published(event_type);
                tracing::debug!(
                    topic = %topic,
                    event_type = event_type,
                    key = %record.key,
                    stream_id = %id,
                    "Outcome record published"
                );
            }
            Err(e) => {
                PipelineMetrics::record_status_publish_failed(event_type);
                tracing::warn!(
                    topic = %topic,
                    event_type = event_type,
                    key = %record.key,
                    error = %e,
                    "Failed to publish outcome record"
                );
            }
        }
    }

    pub async fn sent(
        &self,
        notification_id: &str,
        user_id: &str,
        channels: &[Channel],
        template_key: &str,
    ) {
        self.emit(events::notification_sent(
            notification_id,
            user_id,
            channels,
            template_key,
        ))
        .await;
    }

    pub async fn failed(
        &self,
        notification_id: &str,
        user_id: &str,
        channel: Channel,
        recipient: &str,
        error: &str,
    ) {
        self.emit(events::notification_failed(
            notification_id,
            user_id,
            channel,
            recipient,
            error,
        ))
        .await;
    }

    pub async fn rate_limited(&self, user_id: &str, channel: Channel, detail: &str) {
        self.emit(events::rate_limit_exceeded(user_id, channel, detail))
            .await;
    }

    pub async fn bulk_completed(&self, batch_id: &str, total: u64, succeeded: u64, failed: u64) {
        self.emit(events::bulk_completed(batch_id, total, succeeded, failed))
            .await;
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn channel_status(
        &self,
        notification_id: &str,
        user_id: &str,
        channel: Channel,
        recipient: &str,
        success: bool,
        delivery_id: Option<&str>,
        error: Option<&str>,
    ) {
        self.emit(events::channel_status(
            notification_id,
            user_id,
            channel,
            recipient,
            success,
            delivery_id,
            error,
        ))
        .await;
    }

    pub async fn template_used(
        &self,
        template_key: &str,
        notification_id: &str,
        user_id: &str,
        channel: Channel,
    ) {
        self.emit(events::template_used(
            template_key,
            notification_id,
            user_id,
            channel,
        ))
        .await;
    }

    pub async fn service_health(&self, snapshot: Map<String, Value>) {
        let record = events::service_health(&self.service, snapshot);
        self.emit(record).await;
    }

    /// Publish a dead-letter record to the configured topic.
    pub async fn dead_letter(
        &self,
        topic: &str,
        message_id: &str,
        key: Option<&str>,
        reason: &str,
        raw_payload: &str,
    ) -> Result<String, BrokerError> {
        let record = events::dead_letter(topic, message_id, key, reason, raw_payload);
        let payload = record.to_payload(&self.service);
        let event_type = record.kind.as_str();

        match self
            .publisher
            .publish(&self.dead_letter_topic, &record.key, &payload)
            .await
        {
            Ok(id) => {
                PipelineMetrics::record_status_published(event_type);
                Ok(id)
            }
            Err(e) => {
                PipelineMetrics::record_status_publish_failed(event_type);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::status::events::{NOTIFICATION_STATUS_TOPIC, SECURITY_ALERTS_TOPIC};

    fn publisher(broker: &Arc<MemoryBroker>) -> StatusPublisher {
        StatusPublisher::new(broker.clone(), "notification-service", "notification-dead-letter")
    }

    #[tokio::test]
    async fn test_sent_goes_to_status_topic() {
        let broker = Arc::new(MemoryBroker::new());
        publisher(&broker)
            .sent("n-1", "u-1", &[Channel::Email, Channel::Sms], "trade-executed")
            .await;

        let records = broker.published(NOTIFICATION_STATUS_TOPIC).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "n-1");
        assert_eq!(records[0].payload["eventType"], "NOTIFICATION_SENT");
        assert_eq!(records[0].payload["channel"], "email,sms");
        assert_eq!(records[0].payload["service"], "notification-service");
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let broker = Arc::new(MemoryBroker::new());
        broker.fail_topic(SECURITY_ALERTS_TOPIC).await;

        // must return normally
        publisher(&broker)
            .rate_limited("u-1", Channel::Sms, "hourly limit")
            .await;
        assert!(broker.published(SECURITY_ALERTS_TOPIC).await.is_empty());
    }

    #[tokio::test]
    async fn test_dead_letter_reports_failure() {
        let broker = Arc::new(MemoryBroker::new());
        let status = publisher(&broker);

        status
            .dead_letter("payment-events", "1-0", None, "invalid JSON", "{oops")
            .await
            .unwrap();
        let records = broker.published("notification-dead-letter").await;
        assert_eq!(records[0].payload["reason"], "invalid JSON");
        assert_eq!(records[0].payload["topic"], "payment-events");

        broker.fail_topic("notification-dead-letter").await;
        assert!(status
            .dead_letter("payment-events", "2-0", None, "invalid JSON", "{oops")
            .await
            .is_err());
    }
}
