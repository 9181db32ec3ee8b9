//! Builds channel-addressed delivery requests from a resolved event.
//!
//! Email requests carry the template key and a variable map for the
//! downstream renderer. SMS requests carry finished text from a fixed
//! sentence per family.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::domain::event::{
    DomainEvent, EventPayload, EventType, PaymentPayload, RegistrationPayload, SecurityPayload,
    SubscriptionPayload, TradePayload,
};
use crate::domain::notification::{Channel, Priority};

use super::resolver::{ChannelRoute, Resolution};

/// One outbound request for the delivery gateway
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRequest {
    pub channel: Channel,
    pub recipient: String,
    pub template_key: String,
    /// Pre-rendered body; set for SMS, absent for template-rendered channels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub variables: Map<String, Value>,
    pub priority: Priority,
    pub correlation_id: String,
    pub user_id: String,
    /// `{correlationId}:{channel}:{recipient}`, stable across redeliveries
    pub idempotency_key: String,
}

/// Compose one request per route of `resolution`.
pub fn compose(event: &DomainEvent, resolution: &Resolution) -> Vec<DeliveryRequest> {
    if resolution.routes.is_empty() {
        return Vec::new();
    }

    let variables = template_variables(event);
    let priority = priority_for(event);

    resolution
        .routes
        .iter()
        .map(|route| compose_route(event, resolution.template_key, route, &variables, priority))
        .collect()
}

fn compose_route(
    event: &DomainEvent,
    template_key: &str,
    route: &ChannelRoute,
    variables: &Map<String, Value>,
    priority: Priority,
) -> DeliveryRequest {
    let content = match route.channel {
        Channel::Sms => Some(sms_text(event, template_key)),
        Channel::Email | Channel::Push => None,
    };

    DeliveryRequest {
        channel: route.channel,
        recipient: route.recipient.clone(),
        template_key: template_key.to_string(),
        content,
        variables: variables.clone(),
        priority,
        correlation_id: event.correlation_id.clone(),
        user_id: event.user_id.clone(),
        idempotency_key: idempotency_key(&event.correlation_id, route),
    }
}

pub fn idempotency_key(correlation_id: &str, route: &ChannelRoute) -> String {
    format!("{}:{}:{}", correlation_id, route.channel, route.recipient)
}

/// Variable map handed to the renderer.
///
/// Starts from the raw event fields so templates can use anything the
/// producer sent, then layers the normalised values on top.
pub fn template_variables(event: &DomainEvent) -> Map<String, Value> {
    let mut vars = event.attributes.clone();

    vars.insert("userId".into(), json!(event.user_id));
    vars.insert("correlationId".into(), json!(event.correlation_id));
    vars.insert("eventType".into(), json!(event.event_type.as_str()));
    vars.insert("timestamp".into(), json!(event.occurred_at.to_rfc3339()));
    if let Some(email) = event.email() {
        vars.insert("userEmail".into(), json!(email));
    }
    if let Some(phone) = event.phone() {
        vars.insert("userPhone".into(), json!(phone));
    }

    match &event.payload {
        EventPayload::Registration(p) => registration_vars(&mut vars, p),
        EventPayload::Trade(p) => trade_vars(&mut vars, p),
        EventPayload::Subscription(p) => subscription_vars(&mut vars, p),
        EventPayload::Payment(p) => payment_vars(&mut vars, p),
        EventPayload::Security(p) => security_vars(&mut vars, p),
    }

    vars
}

fn put_str(vars: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        vars.insert(key.to_string(), json!(v));
    }
}

fn put_num(vars: &mut Map<String, Value>, key: &str, value: Option<f64>) {
    if let Some(v) = value {
        vars.insert(key.to_string(), json!(v));
    }
}

fn registration_vars(vars: &mut Map<String, Value>, p: &RegistrationPayload) {
    put_str(vars, "userName", &p.user_name);
    put_str(vars, "verificationLink", &p.verification_link);
    put_str(vars, "kycLevel", &p.kyc_level);
    put_str(vars, "reason", &p.reason);
}

fn trade_vars(vars: &mut Map<String, Value>, p: &TradePayload) {
    put_str(vars, "orderId", &p.order_id);
    put_str(vars, "symbol", &p.symbol);
    put_str(vars, "side", &p.side);
    put_num(vars, "price", p.price);
    put_num(vars, "quantity", p.quantity);
    put_num(vars, "totalValue", p.notional());
    put_str(vars, "status", &p.raw_status);
    put_str(vars, "exchange", &p.exchange);
}

fn subscription_vars(vars: &mut Map<String, Value>, p: &SubscriptionPayload) {
    put_str(vars, "subscriptionId", &p.subscription_id);
    put_str(vars, "planName", &p.plan_name);
    put_num(vars, "amount", p.amount);
    put_str(vars, "currency", &p.currency);
    put_str(vars, "renewalDate", &p.renewal_date);
    put_str(vars, "status", &p.status);
}

fn payment_vars(vars: &mut Map<String, Value>, p: &PaymentPayload) {
    put_str(vars, "paymentId", &p.payment_id);
    put_num(vars, "amount", p.amount);
    put_str(vars, "currency", &p.currency);
    put_str(vars, "paymentMethod", &p.method);
    put_str(vars, "failureReason", &p.failure_reason);
}

fn security_vars(vars: &mut Map<String, Value>, p: &SecurityPayload) {
    put_str(vars, "alertType", &p.alert_type);
    put_str(vars, "severity", &p.raw_severity);
    put_str(vars, "ipAddress", &p.ip_address);
    put_str(vars, "location", &p.location);
    put_str(vars, "deviceInfo", &p.device);
    put_str(vars, "description", &p.description);
}

fn priority_for(event: &DomainEvent) -> Priority {
    match (&event.payload, &event.event_type) {
        (EventPayload::Security(_), _) => Priority::High,
        (EventPayload::Payment(_), EventType::PaymentFailed) => Priority::High,
        (EventPayload::Registration(_), EventType::PasswordResetRequested) => Priority::High,
        _ => Priority::Normal,
    }
}

/// Fixed SMS sentences. These bypass the template engine.
pub fn sms_text(event: &DomainEvent, template_key: &str) -> String {
    match &event.payload {
        EventPayload::Trade(trade) => trade_sms(trade),
        EventPayload::Security(alert) => security_sms(alert),
        _ => format!(
            "You have a new {} notification. Check your email or app for details.",
            template_key
        ),
    }
}

fn trade_sms(trade: &TradePayload) -> String {
    let side = trade.side.as_deref().unwrap_or("trade").to_ascii_uppercase();
    let symbol = trade.symbol.as_deref().unwrap_or("your order");
    let quantity = trade.quantity.map(format_number).unwrap_or_else(|| "-".into());
    let price = trade.price.map(format_number).unwrap_or_else(|| "-".into());
    let total = trade
        .notional()
        .map(|n| format!("{:.2}", n))
        .unwrap_or_else(|| "-".into());

    format!(
        "Trade executed: {} {} {} @ {}. Total value: {}.",
        side, quantity, symbol, price, total
    )
}

fn security_sms(alert: &SecurityPayload) -> String {
    let alert_type = alert.alert_type.as_deref().unwrap_or("Suspicious activity");
    match alert.location.as_deref() {
        Some(location) => format!(
            "SECURITY ALERT: {} detected on your account from {}. If this wasn't you, secure your account immediately.",
            alert_type, location
        ),
        None => format!(
            "SECURITY ALERT: {} detected on your account. If this wasn't you, secure your account immediately.",
            alert_type
        ),
    }
}

fn format_number(value: f64) -> String {
    format!("{}", value)
}
