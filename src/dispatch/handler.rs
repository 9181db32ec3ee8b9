//! Per-family event handling and the topic → handler table.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::broker::InboundMessage;
use crate::config::TopicBinding;
use crate::delivery::{DeliveryGateway, DeliveryReceipt, GatewayError};
use crate::domain::event::{decode_event, DomainEvent, EventFamily};
use crate::domain::notification::Channel;
use crate::domain::routing::{compose, resolve, DeliveryRequest, Resolution};
use crate::domain::template::TemplateStore;
use crate::metrics::PipelineMetrics;
use crate::status::StatusPublisher;

use super::context::DispatchContext;
use super::DispatchError;

/// Receipt status a gateway uses to signal its rate-limit policy kicked in
const RATE_LIMITED_STATUS: &str = "RATE_LIMITED";

/// Success records owed for a fully delivered message.
///
/// Published by the processor only after the acknowledgment commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySummary {
    pub notification_id: String,
    pub user_id: String,
    pub template_key: &'static str,
    pub channels: Vec<Channel>,
}

/// What a handler did with one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Every route succeeded
    Delivered(DeliverySummary),
    /// The event activated no route
    NoRoutes,
    /// At least one route failed; the message must be redelivered
    Failed { failed: usize, total: usize },
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn family(&self) -> EventFamily;

    /// Decode and dispatch one message.
    ///
    /// Returns `DispatchError::Malformed` when the payload cannot be decoded;
    /// delivery failures are reported through `HandlerOutcome::Failed`.
    async fn handle(&self, message: &InboundMessage) -> Result<HandlerOutcome, DispatchError>;
}

struct RouteResult<'a> {
    request: &'a DeliveryRequest,
    outcome: Result<DeliveryReceipt, String>,
    rate_limited: bool,
}

/// Resolver → composer → gateway for one event family
pub struct NotificationHandler {
    family: EventFamily,
    gateway: Arc<dyn DeliveryGateway>,
    status: Arc<StatusPublisher>,
    template_guard: Option<Arc<TemplateStore>>,
}

impl NotificationHandler {
    pub fn new(
        family: EventFamily,
        gateway: Arc<dyn DeliveryGateway>,
        status: Arc<StatusPublisher>,
    ) -> Self {
        Self {
            family,
            gateway,
            status,
            template_guard: None,
        }
    }

    /// Fail every route whose catalogued template is not valid for sending.
    pub fn with_template_guard(mut self, store: Arc<TemplateStore>) -> Self {
        self.template_guard = Some(store);
        self
    }

    #[tracing::instrument(
        name = "dispatch_event",
        skip_all,
        fields(
            correlation_id = %ctx.correlation_id,
            topic = %ctx.topic,
            message_id = %ctx.message_id,
            event_type = %ctx.event_type,
        )
    )]
    pub async fn dispatch(&self, ctx: &DispatchContext, event: &DomainEvent) -> HandlerOutcome {
        let resolution = resolve(event);

        if resolution.is_empty() {
            tracing::info!(
                template_key = resolution.template_key,
                user_id = %event.user_id,
                "Event activated no channel route"
            );
            return HandlerOutcome::NoRoutes;
        }

        let requests = compose(event, &resolution);

        if let Err(reason) = self.check_template(&resolution).await {
            return self.fail_all(ctx, event, &requests, &reason).await;
        }

        let results = join_all(requests.iter().map(|request| self.send_route(ctx, request))).await;

        for result in &results {
            let (success, delivery_id, error) = match &result.outcome {
                Ok(receipt) => (true, receipt.id.as_deref(), None),
                Err(e) => (false, None, Some(e.as_str())),
            };
            self.status
                .channel_status(
                    &ctx.correlation_id,
                    &event.user_id,
                    result.request.channel,
                    &result.request.recipient,
                    success,
                    delivery_id,
                    error,
                )
                .await;
        }

        let failed: Vec<&RouteResult<'_>> = results.iter().filter(|r| r.outcome.is_err()).collect();

        if failed.is_empty() {
            tracing::info!(
                template_key = resolution.template_key,
                routes = requests.len(),
                "Notification delivered on every route"
            );
            return HandlerOutcome::Delivered(DeliverySummary {
                notification_id: ctx.correlation_id.clone(),
                user_id: event.user_id.clone(),
                template_key: resolution.template_key,
                channels: requests.iter().map(|r| r.channel).collect(),
            });
        }

        for result in &failed {
            let error = result.outcome.as_ref().err().map_or("", String::as_str);
            self.status
                .failed(
                    &ctx.correlation_id,
                    &event.user_id,
                    result.request.channel,
                    &result.request.recipient,
                    error,
                )
                .await;
            if result.rate_limited {
                self.status
                    .rate_limited(&event.user_id, result.request.channel, error)
                    .await;
            }
        }

        tracing::warn!(
            template_key = resolution.template_key,
            failed = failed.len(),
            routes = requests.len(),
            delivery_count = ctx.delivery_count,
            "Route delivery failed, message left for redelivery"
        );

        HandlerOutcome::Failed {
            failed: failed.len(),
            total: requests.len(),
        }
    }

    async fn send_route<'a>(
        &self,
        ctx: &DispatchContext,
        request: &'a DeliveryRequest,
    ) -> RouteResult<'a> {
        let result = self.gateway.send(ctx, request).await;

        let (outcome, rate_limited) = match result {
            Ok(receipt) if receipt.success => (Ok(receipt), false),
            Ok(receipt) => {
                let rate_limited = receipt.status.eq_ignore_ascii_case(RATE_LIMITED_STATUS);
                (
                    Err(format!("gateway returned status {}", receipt.status)),
                    rate_limited,
                )
            }
            Err(e) => (Err(e.to_string()), false),
        };

        PipelineMetrics::record_route(request.channel.as_str(), outcome.is_ok());

        if let Err(error) = &outcome {
            tracing::warn!(
                channel = %request.channel,
                recipient = %request.recipient,
                error = %error,
                "Delivery gateway call failed"
            );
        }

        RouteResult {
            request,
            outcome,
            rate_limited,
        }
    }

    /// Keys with no catalogued rows pass; rendering is the gateway's job.
    async fn check_template(&self, resolution: &Resolution) -> Result<(), String> {
        let Some(store) = &self.template_guard else {
            return Ok(());
        };

        let rows = store
            .lineage(resolution.template_key)
            .await
            .map_err(|e| format!("template lookup failed: {}", e))?;
        if rows.is_empty() {
            return Ok(());
        }

        let sendable = rows
            .iter()
            .filter(|row| row.active)
            .max_by_key(|row| row.version)
            .is_some_and(|row| row.is_valid_for_sending());

        if sendable {
            Ok(())
        } else {
            Err(GatewayError::TemplateNotSendable(resolution.template_key.to_string()).to_string())
        }
    }

    async fn fail_all(
        &self,
        ctx: &DispatchContext,
        event: &DomainEvent,
        requests: &[DeliveryRequest],
        reason: &str,
    ) -> HandlerOutcome {
        tracing::warn!(
            reason = %reason,
            routes = requests.len(),
            "Template guard rejected message"
        );
        for request in requests {
            PipelineMetrics::record_route(request.channel.as_str(), false);
            self.status
                .failed(
                    &ctx.correlation_id,
                    &event.user_id,
                    request.channel,
                    &request.recipient,
                    reason,
                )
                .await;
        }
        HandlerOutcome::Failed {
            failed: requests.len(),
            total: requests.len(),
        }
    }
}

#[async_trait]
impl EventHandler for NotificationHandler {
    fn family(&self) -> EventFamily {
        self.family
    }

    async fn handle(&self, message: &InboundMessage) -> Result<HandlerOutcome, DispatchError> {
        let event = decode_event(self.family, &message.payload)?;
        let ctx = DispatchContext::for_event(message, &event);
        Ok(self.dispatch(&ctx, &event).await)
    }
}

/// Explicit topic → handler table, built at startup
#[derive(Default, Clone)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one handler per binding with `factory`.
    pub fn from_bindings<F>(bindings: &[TopicBinding], mut factory: F) -> Self
    where
        F: FnMut(EventFamily) -> Arc<dyn EventHandler>,
    {
        let mut table = Self::new();
        for binding in bindings {
            table.register(binding.topic.clone(), factory(binding.family));
        }
        table
    }

    /// Bind `topic` to `handler`, replacing any previous binding.
    pub fn register(&mut self, topic: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let topic = topic.into();
        tracing::info!(
            topic = %topic,
            family = %handler.family(),
            "Registered event handler"
        );
        if self.handlers.insert(topic.clone(), handler).is_some() {
            tracing::warn!(topic = %topic, "Handler binding replaced");
        }
    }

    pub fn get(&self, topic: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(topic).cloned()
    }

    /// Bound topics, sorted
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.handlers.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::config::default_topics;

    struct NullGateway;

    #[async_trait]
    impl DeliveryGateway for NullGateway {
        async fn send(
            &self,
            _ctx: &DispatchContext,
            _request: &DeliveryRequest,
        ) -> Result<DeliveryReceipt, GatewayError> {
            Ok(DeliveryReceipt::accepted("x", "SENT"))
        }
    }

    #[test]
    fn test_table_from_default_bindings() {
        let broker = Arc::new(MemoryBroker::new());
        let status = Arc::new(StatusPublisher::new(broker, "svc", "dlq"));
        let gateway: Arc<dyn DeliveryGateway> = Arc::new(NullGateway);

        let table = HandlerTable::from_bindings(&default_topics(), |family| {
            Arc::new(NotificationHandler::new(family, gateway.clone(), status.clone()))
        });

        assert_eq!(table.len(), 5);
        assert_eq!(
            table.get("trade-execution-events").unwrap().family(),
            EventFamily::TradeExecution
        );
        assert_eq!(
            table.get("security-alerts").unwrap().family(),
            EventFamily::SecurityAlert
        );
        assert!(table.get("unbound").is_none());
        assert_eq!(table.topics()[0], "payment-events");
    }
}
