//! Broker seams shared by every backend.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::redis::PoolError;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

/// One message as handed out by `EventConsumer::poll`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    /// Broker-assigned id, used for acknowledgment
    pub id: String,
    /// Natural key the producer attached, if any
    pub key: Option<String>,
    /// Raw event body, decoded later by the topic's handler
    pub payload: String,
    /// 1 on first delivery, incremented on every redelivery
    pub delivery_count: u64,
}

impl InboundMessage {
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

/// Consumer-group subscription over a set of topics.
///
/// A polled message stays pending until `ack` is called; pending messages
/// are handed out again later (redelivery).
#[async_trait]
pub trait EventConsumer: Send + Sync {
    /// Register the consumer group on every topic. Idempotent.
    async fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError>;

    /// Fetch up to `max` messages across the subscribed topics.
    ///
    /// May wait up to the backend's block timeout; an empty batch is normal.
    async fn poll(&self, max: usize) -> Result<Vec<InboundMessage>, BrokerError>;

    async fn ack(&self, message: &InboundMessage) -> Result<(), BrokerError>;
}

/// Producer side; safe to share across units of work.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Append `payload` to `topic` under `key`, returning the broker id.
    async fn publish(&self, topic: &str, key: &str, payload: &Value)
        -> Result<String, BrokerError>;
}
