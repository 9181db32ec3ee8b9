//! Template/channel resolution and request composition.
//!
//! Pure computation; the only I/O on the dispatch path happens in the
//! delivery gateway and the broker.

mod composer;
mod resolver;

pub use composer::{compose, idempotency_key, sms_text, template_variables, DeliveryRequest};
pub use resolver::{
    resolve, resolve_routes, resolve_template_key, security_sms_guard, sms_guard,
    trade_sms_guard, ChannelRoute, Resolution, TRADE_SMS_NOTIONAL_THRESHOLD,
};
