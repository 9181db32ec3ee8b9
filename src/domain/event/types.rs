//! Domain event types consumed from the upstream services.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upstream event family; one inbound topic per family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventFamily {
    Registration,
    TradeExecution,
    Subscription,
    Payment,
    SecurityAlert,
}

impl EventFamily {
    pub const ALL: [EventFamily; 5] = [
        EventFamily::Registration,
        EventFamily::TradeExecution,
        EventFamily::Subscription,
        EventFamily::Payment,
        EventFamily::SecurityAlert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventFamily::Registration => "registration",
            EventFamily::TradeExecution => "trade_execution",
            EventFamily::Subscription => "subscription",
            EventFamily::Payment => "payment",
            EventFamily::SecurityAlert => "security_alert",
        }
    }
}

impl fmt::Display for EventFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event-type tag carried by every inbound event.
///
/// The tag is the dispatch key. Tags this service does not know are kept
/// verbatim in `Unknown` and handled through the family default path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    // registration / identity
    UserRegistered,
    EmailVerificationRequested,
    PasswordResetRequested,
    KycVerified,
    KycRejected,
    // trading
    TradeExecuted,
    OrderPlaced,
    OrderFilled,
    OrderPartiallyFilled,
    OrderCancelled,
    OrderRejected,
    // subscriptions
    SubscriptionCreated,
    SubscriptionRenewed,
    SubscriptionCancelled,
    SubscriptionExpiring,
    // payments
    PaymentSucceeded,
    PaymentFailed,
    DepositCompleted,
    WithdrawalCompleted,
    RefundProcessed,
    // security
    SecurityAlert,
    NewDeviceLogin,
    PasswordChanged,
    SuspiciousActivity,
    RateLimitExceeded,
    Unknown(String),
}

static KNOWN_TYPES: [(&str, EventType); 25] = [
    ("USER_REGISTERED", EventType::UserRegistered),
    ("EMAIL_VERIFICATION_REQUESTED", EventType::EmailVerificationRequested),
    ("PASSWORD_RESET_REQUESTED", EventType::PasswordResetRequested),
    ("KYC_VERIFIED", EventType::KycVerified),
    ("KYC_REJECTED", EventType::KycRejected),
    ("TRADE_EXECUTED", EventType::TradeExecuted),
    ("ORDER_PLACED", EventType::OrderPlaced),
    ("ORDER_FILLED", EventType::OrderFilled),
    ("ORDER_PARTIALLY_FILLED", EventType::OrderPartiallyFilled),
    ("ORDER_CANCELLED", EventType::OrderCancelled),
    ("ORDER_REJECTED", EventType::OrderRejected),
    ("SUBSCRIPTION_CREATED", EventType::SubscriptionCreated),
    ("SUBSCRIPTION_RENEWED", EventType::SubscriptionRenewed),
    ("SUBSCRIPTION_CANCELLED", EventType::SubscriptionCancelled),
    ("SUBSCRIPTION_EXPIRING", EventType::SubscriptionExpiring),
    ("PAYMENT_SUCCEEDED", EventType::PaymentSucceeded),
    ("PAYMENT_FAILED", EventType::PaymentFailed),
    ("DEPOSIT_COMPLETED", EventType::DepositCompleted),
    ("WITHDRAWAL_COMPLETED", EventType::WithdrawalCompleted),
    ("REFUND_PROCESSED", EventType::RefundProcessed),
    ("SECURITY_ALERT", EventType::SecurityAlert),
    ("NEW_DEVICE_LOGIN", EventType::NewDeviceLogin),
    ("PASSWORD_CHANGED", EventType::PasswordChanged),
    ("SUSPICIOUS_ACTIVITY", EventType::SuspiciousActivity),
    ("RATE_LIMIT_EXCEEDED", EventType::RateLimitExceeded),
];

impl EventType {
    /// Parse a wire tag. Tags match exactly; anything else becomes `Unknown`.
    pub fn parse(tag: &str) -> Self {
        KNOWN_TYPES
            .iter()
            .find(|(name, _)| *name == tag)
            .map(|(_, ty)| ty.clone())
            .unwrap_or_else(|| EventType::Unknown(tag.to_string()))
    }

    pub fn as_str(&self) -> &str {
        if let EventType::Unknown(tag) = self {
            return tag;
        }
        KNOWN_TYPES
            .iter()
            .find(|(_, ty)| ty == self)
            .map(|(name, _)| *name)
            .unwrap_or("UNKNOWN")
    }

    /// Family the tag belongs to; `None` for unknown tags
    pub fn family(&self) -> Option<EventFamily> {
        use EventType::*;
        match self {
            UserRegistered | EmailVerificationRequested | PasswordResetRequested | KycVerified
            | KycRejected => Some(EventFamily::Registration),
            TradeExecuted | OrderPlaced | OrderFilled | OrderPartiallyFilled | OrderCancelled
            | OrderRejected => Some(EventFamily::TradeExecution),
            SubscriptionCreated | SubscriptionRenewed | SubscriptionCancelled
            | SubscriptionExpiring => Some(EventFamily::Subscription),
            PaymentSucceeded | PaymentFailed | DepositCompleted | WithdrawalCompleted
            | RefundProcessed => Some(EventFamily::Payment),
            SecurityAlert | NewDeviceLogin | PasswordChanged | SuspiciousActivity
            | RateLimitExceeded => Some(EventFamily::SecurityAlert),
            Unknown(_) => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, EventType::Unknown(_))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Security alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Exact wire tags only; `"high"` is not `HIGH`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "LOW" => Some(Severity::Low),
            "MEDIUM" => Some(Severity::Medium),
            "HIGH" => Some(Severity::High),
            "CRITICAL" => Some(Severity::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

/// Order status reported with trade events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeStatus {
    Pending,
    Filled,
    PartiallyFilled,
    Cancelled,
    Rejected,
}

impl TradeStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" | "NEW" | "OPEN" => Some(TradeStatus::Pending),
            "FILLED" | "EXECUTED" => Some(TradeStatus::Filled),
            "PARTIALLY_FILLED" | "PARTIAL" => Some(TradeStatus::PartiallyFilled),
            "CANCELLED" | "CANCELED" => Some(TradeStatus::Cancelled),
            "REJECTED" => Some(TradeStatus::Rejected),
            _ => None,
        }
    }
}

/// Contact fields; absent values suppress the matching channel route
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contact {
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrationPayload {
    pub user_name: Option<String>,
    pub verification_link: Option<String>,
    pub kyc_level: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradePayload {
    pub order_id: Option<String>,
    pub symbol: Option<String>,
    pub side: Option<String>,
    pub price: Option<f64>,
    pub quantity: Option<f64>,
    pub status: Option<TradeStatus>,
    /// Status exactly as received, for variables and logs
    pub raw_status: Option<String>,
    pub exchange: Option<String>,
}

impl TradePayload {
    /// `price × quantity`, when both are present
    pub fn notional(&self) -> Option<f64> {
        Some(self.price? * self.quantity?)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionPayload {
    pub subscription_id: Option<String>,
    pub plan_name: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub renewal_date: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentPayload {
    pub payment_id: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub method: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityPayload {
    pub alert_type: Option<String>,
    pub severity: Option<Severity>,
    pub raw_severity: Option<String>,
    pub ip_address: Option<String>,
    pub location: Option<String>,
    pub device: Option<String>,
    pub description: Option<String>,
}

/// Family-specific part of a domain event
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Registration(RegistrationPayload),
    Trade(TradePayload),
    Subscription(SubscriptionPayload),
    Payment(PaymentPayload),
    Security(SecurityPayload),
}

impl EventPayload {
    pub fn family(&self) -> EventFamily {
        match self {
            EventPayload::Registration(_) => EventFamily::Registration,
            EventPayload::Trade(_) => EventFamily::TradeExecution,
            EventPayload::Subscription(_) => EventFamily::Subscription,
            EventPayload::Payment(_) => EventFamily::Payment,
            EventPayload::Security(_) => EventFamily::SecurityAlert,
        }
    }
}

/// A decoded upstream event
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    pub correlation_id: String,
    pub event_type: EventType,
    pub user_id: String,
    pub contact: Contact,
    pub payload: EventPayload,
    pub occurred_at: DateTime<Utc>,
    /// Every field as received, for template variables the typed payload does not name
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl DomainEvent {
    pub fn family(&self) -> EventFamily {
        self.payload.family()
    }

    pub fn email(&self) -> Option<&str> {
        self.contact.email.as_deref()
    }

    pub fn phone(&self) -> Option<&str> {
        self.contact.phone.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_parse_is_exact() {
        assert_eq!(EventType::parse("ORDER_FILLED"), EventType::OrderFilled);
        assert!(EventType::parse("order_filled").is_unknown());
        assert_eq!(EventType::parse("order.filled").as_str(), "order.filled");
    }

    #[test]
    fn test_unknown_event_type_keeps_tag() {
        let ty = EventType::parse("LOYALTY_POINTS_EARNED");
        assert!(ty.is_unknown());
        assert_eq!(ty.as_str(), "LOYALTY_POINTS_EARNED");
        assert_eq!(ty.family(), None);
    }

    #[test]
    fn test_every_known_type_round_trips_and_has_family() {
        for (name, ty) in KNOWN_TYPES.iter() {
            assert_eq!(ty.as_str(), *name);
            assert_eq!(&EventType::parse(name), ty);
            assert!(ty.family().is_some(), "{} has no family", name);
        }
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!(Severity::parse("HIGH"), Some(Severity::High));
        assert_eq!(Severity::parse("high"), None);
        assert_eq!(Severity::parse(" HIGH"), None);
        assert_eq!(Severity::parse("severe"), None);
    }

    #[test]
    fn test_notional_requires_both_fields() {
        let mut trade = TradePayload {
            price: Some(50.0),
            quantity: Some(300.0),
            ..Default::default()
        };
        assert_eq!(trade.notional(), Some(15_000.0));

        trade.quantity = None;
        assert_eq!(trade.notional(), None);
    }
}
