//! Upstream domain events.
//!
//! Each inbound topic carries one event family. The event-type tag selects
//! the template; the family selects the payload shape and channel guards.

mod decode;
mod types;

pub use decode::{decode_event, decode_object, DecodeError};
pub use types::{
    Contact, DomainEvent, EventFamily, EventPayload, EventType, PaymentPayload,
    RegistrationPayload, SecurityPayload, Severity, SubscriptionPayload, TradePayload,
    TradeStatus,
};
