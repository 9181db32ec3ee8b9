//! Outbound status publication.
//!
//! Outcome records are telemetry: losing one is tolerated, so publishing
//! never blocks or fails the dispatch path.

pub mod events;
mod publisher;

pub use events::{OutcomeKind, OutcomeRecord};
pub use publisher::StatusPublisher;
