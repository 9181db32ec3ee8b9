//! Decoding of loosely-typed broker payloads into `DomainEvent`s.
//!
//! Upstream services publish flat JSON objects with camelCase keys. Field
//! presence varies with the event-type tag, so every family field is
//! optional; only the dispatch key (`eventType`) and the subject (`userId`)
//! are required. A field that is present with the wrong JSON type is a
//! decode error rather than a silently ignored value.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use super::types::{
    Contact, DomainEvent, EventFamily, EventPayload, EventType, PaymentPayload,
    RegistrationPayload, SecurityPayload, Severity, SubscriptionPayload, TradePayload,
    TradeStatus,
};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field {field} has an invalid value: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Decode a raw payload received on a topic bound to `family`.
pub fn decode_event(family: EventFamily, raw: &str) -> Result<DomainEvent, DecodeError> {
    let value: Value = serde_json::from_str(raw)?;
    match value {
        Value::Object(map) => decode_object(family, map),
        _ => Err(DecodeError::NotAnObject),
    }
}

/// Decode an already-parsed JSON object.
pub fn decode_object(
    family: EventFamily,
    map: Map<String, Value>,
) -> Result<DomainEvent, DecodeError> {
    let fields = Fields(&map);

    let tag = fields
        .string(&["eventType", "type"], "eventType")?
        .ok_or(DecodeError::MissingField("eventType"))?;
    let event_type = EventType::parse(&tag);

    let user_id = fields
        .identifier(&["userId"], "userId")?
        .ok_or(DecodeError::MissingField("userId"))?;

    let correlation_keys = ["correlationId", "eventId", "notificationId"];
    let correlation_id = match fields.identifier(&correlation_keys, "correlationId")? {
        Some(id) => id,
        None => {
            let generated = uuid::Uuid::new_v4().to_string();
            tracing::debug!(
                correlation_id = %generated,
                event_type = %event_type,
                "Inbound event has no correlation id, generated one"
            );
            generated
        }
    };

    let occurred_at = fields
        .timestamp(&["timestamp", "occurredAt", "eventTime"], "timestamp")?
        .unwrap_or_else(Utc::now);

    let contact = Contact {
        email: fields.string(&["userEmail", "email"], "userEmail")?,
        phone: fields.string(&["userPhone", "phone", "phoneNumber"], "userPhone")?,
    };

    let payload = match family {
        EventFamily::Registration => EventPayload::Registration(RegistrationPayload {
            user_name: fields.string(&["userName", "name", "firstName"], "userName")?,
            verification_link: fields
                .string(&["verificationLink", "verificationUrl"], "verificationLink")?,
            kyc_level: fields.string(&["kycLevel"], "kycLevel")?,
            reason: fields.string(&["reason", "rejectionReason"], "reason")?,
        }),
        EventFamily::TradeExecution => {
            let raw_status = fields.string(&["status", "orderStatus"], "status")?;
            EventPayload::Trade(TradePayload {
                order_id: fields.identifier(&["orderId", "tradeId"], "orderId")?,
                symbol: fields.string(&["symbol"], "symbol")?,
                side: fields.string(&["side"], "side")?,
                price: fields.number(&["price", "executionPrice"], "price")?,
                quantity: fields.number(&["quantity", "executedQuantity"], "quantity")?,
                status: raw_status.as_deref().and_then(TradeStatus::parse),
                raw_status,
                exchange: fields.string(&["exchange"], "exchange")?,
            })
        }
        EventFamily::Subscription => EventPayload::Subscription(SubscriptionPayload {
            subscription_id: fields.identifier(&["subscriptionId"], "subscriptionId")?,
            plan_name: fields.string(&["planName", "plan"], "planName")?,
            amount: fields.number(&["amount"], "amount")?,
            currency: fields.string(&["currency"], "currency")?,
            renewal_date: fields.string(&["renewalDate", "nextBillingDate"], "renewalDate")?,
            status: fields.string(&["status"], "status")?,
        }),
        EventFamily::Payment => EventPayload::Payment(PaymentPayload {
            payment_id: fields.identifier(&["paymentId", "transactionId"], "paymentId")?,
            amount: fields.number(&["amount"], "amount")?,
            currency: fields.string(&["currency"], "currency")?,
            method: fields.string(&["paymentMethod", "method"], "paymentMethod")?,
            failure_reason: fields.string(&["failureReason", "reason"], "failureReason")?,
        }),
        EventFamily::SecurityAlert => {
            let raw_severity = fields.string(&["severity"], "severity")?;
            EventPayload::Security(SecurityPayload {
                alert_type: fields.string(&["alertType"], "alertType")?,
                severity: raw_severity.as_deref().and_then(Severity::parse),
                raw_severity,
                ip_address: fields.string(&["ipAddress"], "ipAddress")?,
                location: fields.string(&["location"], "location")?,
                device: fields.string(&["deviceInfo", "device"], "deviceInfo")?,
                description: fields.string(&["description", "message"], "description")?,
            })
        }
    };

    match event_type.family() {
        None => tracing::warn!(
            event_type = %event_type,
            family = %family,
            "Unrecognized event type, using family default handling"
        ),
        Some(owner) if owner != family => tracing::warn!(
            event_type = %event_type,
            family = %family,
            owner = %owner,
            "Event type belongs to another family, using family default handling"
        ),
        Some(_) => {}
    }

    Ok(DomainEvent {
        correlation_id,
        event_type,
        user_id,
        contact,
        payload,
        occurred_at,
        attributes: map,
    })
}

/// Lenient accessors over the raw object. `null`, absent and blank values
/// all read as `None`.
struct Fields<'a>(&'a Map<String, Value>);

impl Fields<'_> {
    fn first(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter()
            .filter_map(|k| self.0.get(*k))
            .find(|v| !v.is_null())
    }

    fn string(&self, keys: &[&str], field: &'static str) -> Result<Option<String>, DecodeError> {
        match self.first(keys) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(non_blank(s)),
            Some(other) => Err(invalid(field, format!("expected string, got {}", kind(other)))),
        }
    }

    /// Identifiers may arrive as strings or integers
    fn identifier(
        &self,
        keys: &[&str],
        field: &'static str,
    ) -> Result<Option<String>, DecodeError> {
        match self.first(keys) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(non_blank(s)),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(invalid(field, format!("expected identifier, got {}", kind(other)))),
        }
    }

    /// Numbers may arrive as JSON numbers or numeric strings (decimal-as-string)
    fn number(&self, keys: &[&str], field: &'static str) -> Result<Option<f64>, DecodeError> {
        match self.first(keys) {
            None => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| invalid(field, format!("not a number: {:?}", s))),
            Some(other) => Err(invalid(field, format!("expected number, got {}", kind(other)))),
        }
    }

    /// RFC 3339 strings or epoch milliseconds
    fn timestamp(
        &self,
        keys: &[&str],
        field: &'static str,
    ) -> Result<Option<DateTime<Utc>>, DecodeError> {
        match self.first(keys) {
            None => Ok(None),
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|e| invalid(field, e.to_string())),
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .map(Some)
                .ok_or_else(|| invalid(field, format!("epoch millis out of range: {}", n))),
            Some(other) => Err(invalid(field, format!("expected timestamp, got {}", kind(other)))),
        }
    }
}

fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn invalid(field: &'static str, reason: String) -> DecodeError {
    DecodeError::InvalidField { field, reason }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(family: EventFamily, value: Value) -> Result<DomainEvent, DecodeError> {
        decode_event(family, &value.to_string())
    }

    #[test]
    fn test_decode_trade_event() {
        let event = decode(
            EventFamily::TradeExecution,
            json!({
                "eventId": "evt-1",
                "eventType": "ORDER_FILLED",
                "userId": 42,
                "userEmail": "trader@example.com",
                "userPhone": "+911234567890",
                "orderId": "ORD-1",
                "symbol": "BTC-USD",
                "side": "BUY",
                "price": "50.0",
                "quantity": 300,
                "status": "FILLED",
                "timestamp": "2024-05-01T10:00:00Z"
            }),
        )
        .unwrap();

        assert_eq!(event.correlation_id, "evt-1");
        assert_eq!(event.event_type, EventType::OrderFilled);
        assert_eq!(event.user_id, "42");
        assert_eq!(event.email(), Some("trader@example.com"));
        match &event.payload {
            EventPayload::Trade(trade) => {
                assert_eq!(trade.price, Some(50.0));
                assert_eq!(trade.quantity, Some(300.0));
                assert_eq!(trade.status, Some(TradeStatus::Filled));
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(event.occurred_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_type_alias_and_generated_correlation_id() {
        let event = decode(
            EventFamily::TradeExecution,
            json!({"type": "ORDER_FILLED", "userId": "u1"}),
        )
        .unwrap();
        assert_eq!(event.event_type, EventType::OrderFilled);
        assert!(!event.correlation_id.is_empty());
    }

    #[test]
    fn test_blank_contact_fields_are_absent() {
        let event = decode(
            EventFamily::Payment,
            json!({
                "eventType": "PAYMENT_FAILED",
                "userId": "u1",
                "userEmail": "  ",
                "userPhone": null
            }),
        )
        .unwrap();
        assert_eq!(event.contact, Contact::default());
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let event = decode(
            EventFamily::Subscription,
            json!({"eventType": "PLAN_UPGRADED", "userId": "u1"}),
        )
        .unwrap();
        assert_eq!(event.event_type, EventType::Unknown("PLAN_UPGRADED".into()));
        assert_eq!(event.family(), EventFamily::Subscription);
    }

    #[test]
    fn test_missing_dispatch_key() {
        let err = decode(EventFamily::Payment, json!({"userId": "u1"})).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("eventType")));
    }

    #[test]
    fn test_missing_user_id() {
        let err = decode(EventFamily::Payment, json!({"eventType": "PAYMENT_FAILED"})).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("userId")));
    }

    #[test]
    fn test_mistyped_field_is_rejected() {
        let err = decode(
            EventFamily::TradeExecution,
            json!({"eventType": "ORDER_FILLED", "userId": "u1", "price": {"amount": 1}}),
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField { field: "price", .. }));

        let err = decode(
            EventFamily::TradeExecution,
            json!({"eventType": "ORDER_FILLED", "userId": "u1", "quantity": "lots"}),
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField { field: "quantity", .. }));
    }

    #[test]
    fn test_not_json_and_not_object() {
        assert!(matches!(
            decode_event(EventFamily::Payment, "{not json"),
            Err(DecodeError::InvalidJson(_))
        ));
        assert!(matches!(
            decode_event(EventFamily::Payment, "[1,2,3]"),
            Err(DecodeError::NotAnObject)
        ));
    }

    #[test]
    fn test_security_severity_and_epoch_timestamp() {
        let event = decode(
            EventFamily::SecurityAlert,
            json!({
                "eventType": "SECURITY_ALERT",
                "userId": "u1",
                "severity": "HIGH",
                "alertType": "NEW_DEVICE",
                "timestamp": 1_714_557_600_000i64
            }),
        )
        .unwrap();
        match &event.payload {
            EventPayload::Security(sec) => {
                assert_eq!(sec.severity, Some(Severity::High));
                assert_eq!(sec.raw_severity.as_deref(), Some("HIGH"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(event.occurred_at.timestamp_millis(), 1_714_557_600_000);
    }

    #[test]
    fn test_lowercase_severity_is_not_recognised() {
        let event = decode(
            EventFamily::SecurityAlert,
            json!({"eventType": "SECURITY_ALERT", "userId": "u1", "severity": "high"}),
        )
        .unwrap();
        match &event.payload {
            EventPayload::Security(sec) => {
                assert_eq!(sec.severity, None);
                assert_eq!(sec.raw_severity.as_deref(), Some("high"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
