//! Inbound dispatch: topic → handler → gateway → acknowledgment.
//!
//! - `InboundEventRouter`: poll loop and bounded worker pool
//! - `MessageProcessor`: one unit of work and the acknowledgment rule
//! - `NotificationHandler`: resolve, compose and deliver one event
//! - `HandlerTable`: explicit topic → handler bindings

mod context;
mod handler;
mod processor;
mod router;
mod stats;

use thiserror::Error;

use crate::domain::event::DecodeError;

pub use context::DispatchContext;
pub use handler::{
    DeliverySummary, EventHandler, HandlerOutcome, HandlerTable, NotificationHandler,
};
pub use processor::{MessageOutcome, MessageProcessor};
pub use router::{DrainReport, InboundEventRouter};
pub use stats::{RouterStats, RouterStatsSnapshot};

/// Reasons a message cannot be dispatched at all
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("malformed event: {0}")]
    Malformed(#[from] DecodeError),

    #[error("no handler bound to topic {0}")]
    UnboundTopic(String),
}
