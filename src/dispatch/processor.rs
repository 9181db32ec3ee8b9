//! One unit of work: handle a message, then acknowledge or withhold.

use std::sync::Arc;

use crate::broker::{EventConsumer, InboundMessage};
use crate::status::StatusPublisher;

use super::handler::{DeliverySummary, HandlerOutcome, HandlerTable};
use super::DispatchError;

/// Final disposition of one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Every route succeeded and the message was acknowledged
    Acknowledged,
    /// No route was activated; acknowledged without a success record
    NoRoutes,
    /// Malformed; dead-lettered, then acknowledged
    DeadLettered,
    /// Left unacknowledged for redelivery
    Retained,
    /// Work finished but the acknowledgment itself failed
    AckFailed,
    /// The unit exceeded its time budget; left unacknowledged
    TimedOut,
    /// Not started because the worker pool was saturated
    Rejected,
}

impl MessageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageOutcome::Acknowledged => "acknowledged",
            MessageOutcome::NoRoutes => "no_routes",
            MessageOutcome::DeadLettered => "dead_lettered",
            MessageOutcome::Retained => "retained",
            MessageOutcome::AckFailed => "ack_failed",
            MessageOutcome::TimedOut => "timed_out",
            MessageOutcome::Rejected => "rejected",
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        matches!(
            self,
            MessageOutcome::Acknowledged | MessageOutcome::NoRoutes | MessageOutcome::DeadLettered
        )
    }
}

/// Runs the handler bound to a message's topic and applies the
/// acknowledgment rule: acknowledge only when every route succeeded, when
/// no route applied, or once a malformed message is safely dead-lettered.
pub struct MessageProcessor {
    handlers: HandlerTable,
    consumer: Arc<dyn EventConsumer>,
    status: Arc<StatusPublisher>,
}

impl MessageProcessor {
    pub fn new(
        handlers: HandlerTable,
        consumer: Arc<dyn EventConsumer>,
        status: Arc<StatusPublisher>,
    ) -> Self {
        Self {
            handlers,
            consumer,
            status,
        }
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    pub async fn process_message(&self, message: &InboundMessage) -> MessageOutcome {
        let result = match self.handlers.get(&message.topic) {
            Some(handler) => handler.handle(message).await,
            None => Err(DispatchError::UnboundTopic(message.topic.clone())),
        };

        match result {
            Ok(HandlerOutcome::Delivered(summary)) => {
                let outcome = self
                    .acknowledge(message, MessageOutcome::Acknowledged)
                    .await;
                if outcome == MessageOutcome::Acknowledged {
                    self.publish_success(&summary).await;
                }
                outcome
            }
            Ok(HandlerOutcome::NoRoutes) => {
                self.acknowledge(message, MessageOutcome::NoRoutes).await
            }
            Ok(HandlerOutcome::Failed { .. }) => MessageOutcome::Retained,
            Err(e) => self.dead_letter(message, &e).await,
        }
    }

    async fn publish_success(&self, summary: &DeliverySummary) {
        self.status
            .sent(
                &summary.notification_id,
                &summary.user_id,
                &summary.channels,
                summary.template_key,
            )
            .await;
        for channel in &summary.channels {
            self.status
                .template_used(
                    summary.template_key,
                    &summary.notification_id,
                    &summary.user_id,
                    *channel,
                )
                .await;
        }
    }

    async fn acknowledge(
        &self,
        message: &InboundMessage,
        outcome: MessageOutcome,
    ) -> MessageOutcome {
        match self.consumer.ack(message).await {
            Ok(()) => outcome,
            Err(e) => {
                tracing::error!(
                    topic = %message.topic,
                    message_id = %message.id,
                    error = %e,
                    "Failed to acknowledge message, it will be redelivered"
                );
                MessageOutcome::AckFailed
            }
        }
    }

    async fn dead_letter(
        &self,
        message: &InboundMessage,
        error: &DispatchError,
    ) -> MessageOutcome {
        let reason = error.to_string();
        tracing::warn!(
            topic = %message.topic,
            message_id = %message.id,
            reason = %reason,
            "Malformed message, dead-lettering"
        );

        match self
            .status
            .dead_letter(
                &message.topic,
                &message.id,
                message.key.as_deref(),
                &reason,
                &message.payload,
            )
            .await
        {
            Ok(_) => self.acknowledge(message, MessageOutcome::DeadLettered).await,
            Err(e) => {
                tracing::error!(
                    topic = %message.topic,
                    message_id = %message.id,
                    error = %e,
                    "Dead-letter publish failed, leaving message unacknowledged"
                );
                MessageOutcome::Retained
            }
        }
    }
}
