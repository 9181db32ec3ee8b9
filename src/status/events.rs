//! Outcome records published downstream.
//!
//! Every record is a flat camelCase map carrying at least `eventType`, a
//! subject identifier, `timestamp` (RFC 3339) and `service`.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::domain::notification::Channel;

pub const NOTIFICATION_STATUS_TOPIC: &str = "notification-status-events";
pub const SECURITY_ALERTS_TOPIC: &str = "security-alerts";
pub const SERVICE_HEALTH_TOPIC: &str = "service-health-events";
pub const EMAIL_DELIVERY_TOPIC: &str = "email-delivery-events";
pub const SMS_DELIVERY_TOPIC: &str = "sms-delivery-events";
pub const ANALYTICS_TOPIC: &str = "analytics-events";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    NotificationSent,
    NotificationFailed,
    RateLimitExceeded,
    BulkNotificationCompleted,
    EmailDeliveryStatus,
    SmsDeliveryStatus,
    PushDeliveryStatus,
    TemplateUsed,
    ServiceHealth,
    DeadLetter,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::NotificationSent => "NOTIFICATION_SENT",
            OutcomeKind::NotificationFailed => "NOTIFICATION_FAILED",
            OutcomeKind::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            OutcomeKind::BulkNotificationCompleted => "BULK_NOTIFICATION_COMPLETED",
            OutcomeKind::EmailDeliveryStatus => "EMAIL_DELIVERY_STATUS",
            OutcomeKind::SmsDeliveryStatus => "SMS_DELIVERY_STATUS",
            OutcomeKind::PushDeliveryStatus => "PUSH_DELIVERY_STATUS",
            OutcomeKind::TemplateUsed => "TEMPLATE_USED",
            OutcomeKind::ServiceHealth => "SERVICE_HEALTH",
            OutcomeKind::DeadLetter => "DEAD_LETTER",
        }
    }

    /// Fixed destination; dead letters go to the configured topic instead.
    pub fn topic(&self) -> Option<&'static str> {
        match self {
            OutcomeKind::NotificationSent
            | OutcomeKind::NotificationFailed
            | OutcomeKind::BulkNotificationCompleted
            | OutcomeKind::PushDeliveryStatus => Some(NOTIFICATION_STATUS_TOPIC),
            OutcomeKind::RateLimitExceeded => Some(SECURITY_ALERTS_TOPIC),
            OutcomeKind::EmailDeliveryStatus => Some(EMAIL_DELIVERY_TOPIC),
            OutcomeKind::SmsDeliveryStatus => Some(SMS_DELIVERY_TOPIC),
            OutcomeKind::TemplateUsed => Some(ANALYTICS_TOPIC),
            OutcomeKind::ServiceHealth => Some(SERVICE_HEALTH_TOPIC),
            OutcomeKind::DeadLetter => None,
        }
    }

    pub fn channel_status(channel: Channel) -> Self {
        match channel {
            Channel::Email => OutcomeKind::EmailDeliveryStatus,
            Channel::Sms => OutcomeKind::SmsDeliveryStatus,
            Channel::Push => OutcomeKind::PushDeliveryStatus,
        }
    }
}

/// One record before the service-level fields are stamped on
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeRecord {
    pub kind: OutcomeKind,
    /// Broker key: notification id, user id or service name
    pub key: String,
    pub fields: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl OutcomeRecord {
    pub fn new(kind: OutcomeKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            fields: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn optional_field(self, name: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.field(name, v),
            None => self,
        }
    }

    /// Flat payload with `eventType`, `timestamp` and `service` added.
    pub fn to_payload(&self, service: &str) -> Value {
        let mut map = self.fields.clone();
        map.insert("eventType".into(), json!(self.kind.as_str()));
        map.insert("timestamp".into(), json!(self.timestamp.to_rfc3339()));
        map.insert("service".into(), json!(service));
        Value::Object(map)
    }
}

pub fn notification_sent(
    notification_id: &str,
    user_id: &str,
    channels: &[Channel],
    template_key: &str,
) -> OutcomeRecord {
    let channels: Vec<&str> = channels.iter().map(Channel::as_str).collect();
    OutcomeRecord::new(OutcomeKind::NotificationSent, notification_id)
        .field("notificationId", notification_id)
        .field("userId", user_id)
        .field("channel", channels.join(","))
        .field("templateKey", template_key)
        .field("success", true)
}

pub fn notification_failed(
    notification_id: &str,
    user_id: &str,
    channel: Channel,
    recipient: &str,
    error: &str,
) -> OutcomeRecord {
    OutcomeRecord::new(OutcomeKind::NotificationFailed, notification_id)
        .field("notificationId", notification_id)
        .field("userId", user_id)
        .field("channel", channel.as_str())
        .field("recipient", recipient)
        .field("success", false)
        .field("error", error)
}

/// Escalation record; carries no contact fields so it never routes a
/// notification when consumed back from the security topic.
pub fn rate_limit_exceeded(user_id: &str, channel: Channel, detail: &str) -> OutcomeRecord {
    OutcomeRecord::new(OutcomeKind::RateLimitExceeded, user_id)
        .field("userId", user_id)
        .field("alertType", "RATE_LIMIT_EXCEEDED")
        .field("severity", "MEDIUM")
        .field("channel", channel.as_str())
        .field("description", detail)
}

pub fn bulk_completed(
    batch_id: &str,
    total: u64,
    succeeded: u64,
    failed: u64,
) -> OutcomeRecord {
    OutcomeRecord::new(OutcomeKind::BulkNotificationCompleted, batch_id)
        .field("notificationId", batch_id)
        .field("totalCount", total)
        .field("successCount", succeeded)
        .field("failureCount", failed)
        .field("success", failed == 0)
}

pub fn channel_status(
    notification_id: &str,
    user_id: &str,
    channel: Channel,
    recipient: &str,
    success: bool,
    delivery_id: Option<&str>,
    error: Option<&str>,
) -> OutcomeRecord {
    OutcomeRecord::new(OutcomeKind::channel_status(channel), notification_id)
        .field("notificationId", notification_id)
        .field("userId", user_id)
        .field("channel", channel.as_str())
        .field("recipient", recipient)
        .field("success", success)
        .optional_field("deliveryId", delivery_id)
        .optional_field("error", error)
}

pub fn template_used(
    template_key: &str,
    notification_id: &str,
    user_id: &str,
    channel: Channel,
) -> OutcomeRecord {
    OutcomeRecord::new(OutcomeKind::TemplateUsed, template_key)
        .field("templateKey", template_key)
        .field("notificationId", notification_id)
        .field("userId", user_id)
        .field("channel", channel.as_str())
}

pub fn service_health(service: &str, snapshot: Map<String, Value>) -> OutcomeRecord {
    let mut record = OutcomeRecord::new(OutcomeKind::ServiceHealth, service)
        .field("serviceName", service)
        .field("status", "UP");
    record.fields.extend(snapshot);
    record
}

pub fn dead_letter(
    topic: &str,
    message_id: &str,
    key: Option<&str>,
    reason: &str,
    raw_payload: &str,
) -> OutcomeRecord {
    OutcomeRecord::new(OutcomeKind::DeadLetter, key.unwrap_or(message_id))
        .field("topic", topic)
        .field("messageId", message_id)
        .optional_field("key", key)
        .field("reason", reason)
        .field("rawPayload", raw_payload)
}
