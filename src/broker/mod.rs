//! Message broker access.
//!
//! - `EventConsumer` / `EventPublisher`: the seams the pipeline depends on
//! - `RedisStreamBroker`: consumer groups over Redis Streams
//! - `MemoryBroker`: same contract in memory, for tests and local runs

mod memory;
mod redis_streams;
mod types;

pub use memory::{MemoryBroker, PublishedRecord};
pub use redis_streams::RedisStreamBroker;
pub use types::{BrokerError, EventConsumer, EventPublisher, InboundMessage};
