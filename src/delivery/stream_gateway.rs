//! Gateway that hands requests to per-channel delivery streams.

use std::sync::Arc;

use async_trait::async_trait;

use crate::broker::EventPublisher;
use crate::dispatch::DispatchContext;
use crate::domain::routing::DeliveryRequest;

use super::{DeliveryGateway, DeliveryReceipt, GatewayError};

/// Publishes each request onto `{prefix}:{channel}` for the transport
/// workers. A successful append is a successful route.
pub struct StreamDeliveryGateway {
    publisher: Arc<dyn EventPublisher>,
    prefix: String,
}

impl StreamDeliveryGateway {
    pub fn new(publisher: Arc<dyn EventPublisher>, prefix: impl Into<String>) -> Self {
        Self {
            publisher,
            prefix: prefix.into(),
        }
    }

    pub fn stream_for(&self, request: &DeliveryRequest) -> String {
        format!("{}:{}", self.prefix, request.channel)
    }
}

#[async_trait]
impl DeliveryGateway for StreamDeliveryGateway {
    async fn send(
        &self,
        ctx: &DispatchContext,
        request: &DeliveryRequest,
    ) -> Result<DeliveryReceipt, GatewayError> {
        let stream = self.stream_for(request);
        let body = serde_json::to_value(request)
            .map_err(|e| GatewayError::Rejected(format!("unserializable request: {}", e)))?;

        let id = self
            .publisher
            .publish(&stream, &request.idempotency_key, &body)
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        tracing::debug!(
            correlation_id = %ctx.correlation_id,
            channel = %request.channel,
            stream = %stream,
            delivery_id = %id,
            "Delivery request queued"
        );

        Ok(DeliveryReceipt::accepted(id, "QUEUED"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::domain::notification::{Channel, Priority};
    use serde_json::Map;

    fn request(channel: Channel, recipient: &str) -> DeliveryRequest {
        DeliveryRequest {
            channel,
            recipient: recipient.to_string(),
            template_key: "payment-failed".to_string(),
            content: None,
            variables: Map::new(),
            priority: Priority::High,
            correlation_id: "c-1".to_string(),
            user_id: "u-1".to_string(),
            idempotency_key: format!("c-1:{}:{}", channel, recipient),
        }
    }

    #[tokio::test]
    async fn test_send_appends_to_channel_stream() {
        let broker = Arc::new(MemoryBroker::new());
        let gateway = StreamDeliveryGateway::new(broker.clone(), "notification-delivery");
        let ctx = DispatchContext::new("c-1", "payment-events", "9-0", "PAYMENT_FAILED");

        let receipt = gateway
            .send(&ctx, &request(Channel::Email, "p@example.com"))
            .await
            .unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.status, "QUEUED");

        let records = broker.published("notification-delivery:email").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "c-1:email:p@example.com");
        assert_eq!(records[0].payload["templateKey"], "payment-failed");
        assert_eq!(receipt.id.as_deref(), Some(records[0].id.as_str()));
    }

    #[tokio::test]
    async fn test_publish_failure_is_gateway_error() {
        let broker = Arc::new(MemoryBroker::new());
        broker.fail_topic("notification-delivery:sms").await;
        let gateway = StreamDeliveryGateway::new(broker.clone(), "notification-delivery");
        let ctx = DispatchContext::new("c-1", "trade-execution-events", "1-0", "ORDER_FILLED");

        let err = gateway
            .send(&ctx, &request(Channel::Sms, "+15550100"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
    }
}
