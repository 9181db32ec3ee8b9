//! Per-message context threaded through handler, composer and gateway.

use std::fmt;

use crate::broker::InboundMessage;
use crate::domain::event::DomainEvent;

/// Identifies the unit of work in logs and downstream calls.
///
/// Built once per decoded message and passed by reference; nothing in the
/// pipeline reads correlation state from anywhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    pub correlation_id: String,
    pub topic: String,
    pub message_id: String,
    pub event_type: String,
    pub delivery_count: u64,
}

impl DispatchContext {
    pub fn new(
        correlation_id: impl Into<String>,
        topic: impl Into<String>,
        message_id: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            topic: topic.into(),
            message_id: message_id.into(),
            event_type: event_type.into(),
            delivery_count: 1,
        }
    }

    pub fn for_event(message: &InboundMessage, event: &DomainEvent) -> Self {
        Self {
            correlation_id: event.correlation_id.clone(),
            topic: message.topic.clone(),
            message_id: message.id.clone(),
            event_type: event.event_type.as_str().to_string(),
            delivery_count: message.delivery_count,
        }
    }
}

impl fmt::Display for DispatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}/{} ({})",
            self.correlation_id, self.topic, self.message_id, self.event_type
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{decode_event, EventFamily};

    #[test]
    fn test_context_from_message_and_event() {
        let message = InboundMessage {
            topic: "payment-events".into(),
            id: "17-0".into(),
            key: Some("u-1".into()),
            payload: r#"{"eventType":"PAYMENT_FAILED","userId":"u-1","correlationId":"c-9"}"#
                .into(),
            delivery_count: 2,
        };
        let event = decode_event(EventFamily::Payment, &message.payload).unwrap();
        let ctx = DispatchContext::for_event(&message, &event);

        assert_eq!(ctx.correlation_id, "c-9");
        assert_eq!(ctx.event_type, "PAYMENT_FAILED");
        assert_eq!(ctx.delivery_count, 2);
        assert_eq!(ctx.to_string(), "c-9@payment-events/17-0 (PAYMENT_FAILED)");
    }
}
