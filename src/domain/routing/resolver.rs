//! Template key lookup and channel route selection.
//!
//! Everything here is pure and total: unknown tags, statuses and severities
//! fall through to the family default key, and absent numeric fields make a
//! guard false.

use crate::domain::event::{
    DomainEvent, EventPayload, EventType, SecurityPayload, Severity, TradePayload, TradeStatus,
};
use crate::domain::notification::Channel;

/// Trade notional above which an SMS is also sent (strictly greater)
pub const TRADE_SMS_NOTIONAL_THRESHOLD: f64 = 10_000.0;

/// One channel the event will be delivered on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRoute {
    pub channel: Channel,
    pub recipient: String,
}

/// Output of resolving one event
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub template_key: &'static str,
    pub routes: Vec<ChannelRoute>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Resolve the template key and the active channel routes for `event`.
pub fn resolve(event: &DomainEvent) -> Resolution {
    Resolution {
        template_key: resolve_template_key(event),
        routes: resolve_routes(event),
    }
}

pub fn resolve_template_key(event: &DomainEvent) -> &'static str {
    match &event.payload {
        EventPayload::Registration(_) => registration_key(&event.event_type),
        EventPayload::Trade(trade) => trade_key(&event.event_type, trade),
        EventPayload::Subscription(_) => subscription_key(&event.event_type),
        EventPayload::Payment(_) => payment_key(&event.event_type),
        EventPayload::Security(alert) => security_key(&event.event_type, alert),
    }
}

fn registration_key(event_type: &EventType) -> &'static str {
    match event_type {
        EventType::UserRegistered => "welcome-email",
        EventType::EmailVerificationRequested => "email-verification",
        EventType::PasswordResetRequested => "password-reset",
        EventType::KycVerified => "kyc-verified",
        EventType::KycRejected => "kyc-rejected",
        _ => "user-registration",
    }
}

/// The order status, when recognised, wins over the event type.
fn trade_key(event_type: &EventType, trade: &TradePayload) -> &'static str {
    match trade.status {
        Some(TradeStatus::Filled) => return "trade-executed",
        Some(TradeStatus::PartiallyFilled) => return "trade-partially-filled",
        Some(TradeStatus::Cancelled) => return "trade-cancelled",
        Some(TradeStatus::Rejected) => return "trade-rejected",
        Some(TradeStatus::Pending) | None => {}
    }

    match event_type {
        EventType::OrderFilled | EventType::TradeExecuted => "trade-executed",
        EventType::OrderPartiallyFilled => "trade-partially-filled",
        EventType::OrderCancelled => "trade-cancelled",
        EventType::OrderRejected => "trade-rejected",
        EventType::OrderPlaced => "order-placed",
        _ => "trade-notification",
    }
}

fn subscription_key(event_type: &EventType) -> &'static str {
    match event_type {
        EventType::SubscriptionCreated => "subscription-welcome",
        EventType::SubscriptionRenewed => "subscription-renewed",
        EventType::SubscriptionCancelled => "subscription-cancelled",
        EventType::SubscriptionExpiring => "subscription-expiring",
        _ => "subscription-update",
    }
}

fn payment_key(event_type: &EventType) -> &'static str {
    match event_type {
        EventType::PaymentSucceeded => "payment-success",
        EventType::PaymentFailed => "payment-failed",
        EventType::DepositCompleted => "deposit-completed",
        EventType::WithdrawalCompleted => "withdrawal-completed",
        EventType::RefundProcessed => "refund-processed",
        _ => "payment-notification",
    }
}

/// Severity wins over the event type.
fn security_key(event_type: &EventType, alert: &SecurityPayload) -> &'static str {
    match alert.severity {
        Some(Severity::High) | Some(Severity::Critical) => "security-alert-high",
        Some(Severity::Medium) => "security-alert",
        Some(Severity::Low) => "security-notice",
        None => match event_type {
            EventType::NewDeviceLogin => "new-device-login",
            _ => "security-alert",
        },
    }
}

/// Email whenever an address is present; SMS only behind the family guard.
pub fn resolve_routes(event: &DomainEvent) -> Vec<ChannelRoute> {
    let mut routes = Vec::with_capacity(2);

    if let Some(email) = event.email() {
        routes.push(ChannelRoute {
            channel: Channel::Email,
            recipient: email.to_string(),
        });
    }

    if let Some(phone) = event.phone() {
        if sms_guard(&event.payload) {
            routes.push(ChannelRoute {
                channel: Channel::Sms,
                recipient: phone.to_string(),
            });
        }
    }

    routes
}

/// SMS guard over the payload alone; the phone check is separate.
pub fn sms_guard(payload: &EventPayload) -> bool {
    match payload {
        EventPayload::Trade(trade) => trade_sms_guard(trade),
        EventPayload::Security(alert) => security_sms_guard(alert),
        _ => false,
    }
}

pub fn trade_sms_guard(trade: &TradePayload) -> bool {
    trade
        .notional()
        .is_some_and(|notional| notional > TRADE_SMS_NOTIONAL_THRESHOLD)
}

pub fn security_sms_guard(alert: &SecurityPayload) -> bool {
    alert.severity == Some(Severity::High)
}
