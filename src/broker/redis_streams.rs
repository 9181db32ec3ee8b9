//! Redis Streams broker backend.
//!
//! Topics are streams read through one consumer group. A polled entry sits in
//! the group's pending entries list until `XACK`; entries left pending for
//! longer than `claim_idle_ms` are re-claimed by the next poll and handed out
//! again.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::RedisResult;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::config::BrokerConfig;
use crate::redis::{PoolError, RedisPool};

use super::types::{BrokerError, EventConsumer, EventPublisher, InboundMessage};

const KEY_FIELD: &str = "key";
const PAYLOAD_FIELD: &str = "payload";

type StreamEntry = (String, Vec<(String, String)>);
type StreamReply = Vec<(String, Vec<StreamEntry>)>;

pub struct RedisStreamBroker {
    pool: Arc<RedisPool>,
    config: BrokerConfig,
    topics: RwLock<Vec<String>>,
    /// Blocking reads get their own connection so they do not stall the
    /// shared one used for acks and publishes.
    reader: Mutex<Option<MultiplexedConnection>>,
}

impl RedisStreamBroker {
    pub fn new(pool: Arc<RedisPool>, config: BrokerConfig) -> Self {
        Self {
            pool,
            config,
            topics: RwLock::new(Vec::new()),
            reader: Mutex::new(None),
        }
    }

    async fn create_group(&self, topic: &str) -> Result<(), BrokerError> {
        let group = self.config.consumer_group.clone();
        let stream = topic.to_string();
        let result: Result<(), _> = self
            .pool
            .execute(|mut conn| async move {
                redis::cmd("XGROUP")
                    .arg("CREATE")
                    .arg(&stream)
                    .arg(&group)
                    .arg("0")
                    .arg("MKSTREAM")
                    .query_async(&mut conn)
                    .await
            })
            .await;

        match result {
            Ok(()) => {
                tracing::info!(
                    topic = %topic,
                    group = %self.config.consumer_group,
                    "Created consumer group"
                );
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                tracing::debug!(
                    topic = %topic,
                    group = %self.config.consumer_group,
                    "Consumer group already exists"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Re-claim entries another delivery left pending for too long.
    async fn claim_idle(
        &self,
        topic: &str,
        max: usize,
    ) -> Result<Vec<InboundMessage>, BrokerError> {
        let group = self.config.consumer_group.clone();
        let consumer = self.config.consumer_name.clone();
        let idle = self.config.claim_idle_ms;
        let stream = topic.to_string();

        let pending: Result<Vec<(String, String, u64, u64)>, PoolError> = {
            let (stream, group) = (stream.clone(), group.clone());
            self.pool
                .execute(|mut conn| async move {
                    redis::cmd("XPENDING")
                        .arg(&stream)
                        .arg(&group)
                        .arg("IDLE")
                        .arg(idle)
                        .arg("-")
                        .arg("+")
                        .arg(max)
                        .query_async(&mut conn)
                        .await
                })
                .await
        };

        let pending = match pending {
            Ok(p) => p,
            Err(PoolError::Redis(e)) if e.to_string().contains("NOGROUP") => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let deliveries: HashMap<String, u64> = pending
            .iter()
            .map(|(id, _, _, count)| (id.clone(), *count))
            .collect();
        let ids: Vec<String> = pending.into_iter().map(|(id, _, _, _)| id).collect();

        let claimed: Vec<Option<StreamEntry>> = self
            .pool
            .execute(|mut conn| async move {
                let mut cmd = redis::cmd("XCLAIM");
                cmd.arg(&stream).arg(&group).arg(&consumer).arg(idle);
                for id in &ids {
                    cmd.arg(id);
                }
                cmd.query_async(&mut conn).await
            })
            .await?;

        let messages: Vec<InboundMessage> = claimed
            .into_iter()
            .flatten()
            .map(|(id, fields)| {
                // XCLAIM bumps the delivery counter
                let count = deliveries.get(&id).copied().unwrap_or(1) + 1;
                entry_to_message(topic, id, fields, count)
            })
            .collect();

        if !messages.is_empty() {
            tracing::warn!(
                topic = %topic,
                count = messages.len(),
                idle_ms = idle,
                "Re-claimed unacknowledged messages for redelivery"
            );
        }

        Ok(messages)
    }

    async fn read_new(
        &self,
        topics: &[String],
        max: usize,
    ) -> Result<Vec<InboundMessage>, BrokerError> {
        let mut reader = self.reader.lock().await;
        let mut conn = match reader.as_ref() {
            Some(conn) => conn.clone(),
            None => {
                let conn = self.pool.dedicated_connection().await?;
                *reader = Some(conn.clone());
                conn
            }
        };

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg("COUNT")
            .arg(max)
            .arg("BLOCK")
            .arg(self.config.block_timeout_ms)
            .arg("STREAMS");
        for topic in topics {
            cmd.arg(topic);
        }
        for _ in topics {
            cmd.arg(">");
        }

        let reply: RedisResult<Option<StreamReply>> = cmd.query_async(&mut conn).await;

        match reply {
            Ok(Some(streams)) => Ok(streams
                .into_iter()
                .flat_map(|(topic, entries)| {
                    entries
                        .into_iter()
                        .map(move |(id, fields)| entry_to_message(&topic, id, fields, 1))
                        .collect::<Vec<_>>()
                })
                .collect()),
            Ok(None) => Ok(Vec::new()),
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    *reader = None;
                }
                Err(e.into())
            }
        }
    }
}

/// Build a message from stream fields.
///
/// Entries written by this service carry `key` and `payload`. Entries from
/// producers that write flat fields are re-assembled into a JSON object so
/// the handler sees the same shape either way.
fn entry_to_message(
    topic: &str,
    id: String,
    fields: Vec<(String, String)>,
    delivery_count: u64,
) -> InboundMessage {
    let mut key = None;
    let mut payload = None;
    let mut flat = serde_json::Map::new();

    for (name, value) in fields {
        match name.as_str() {
            KEY_FIELD => key = Some(value),
            PAYLOAD_FIELD => payload = Some(value),
            _ => {
                flat.insert(name, Value::String(value));
            }
        }
    }

    let payload = payload.unwrap_or_else(|| {
        if flat.is_empty() {
            String::new()
        } else {
            Value::Object(flat).to_string()
        }
    });

    InboundMessage {
        topic: topic.to_string(),
        id,
        key,
        payload,
        delivery_count,
    }
}

#[async_trait]
impl EventConsumer for RedisStreamBroker {
    async fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError> {
        for topic in topics {
            self.create_group(topic).await?;
        }

        let mut subscribed = self.topics.write().await;
        for topic in topics {
            if !subscribed.contains(topic) {
                subscribed.push(topic.clone());
            }
        }

        tracing::info!(
            topics = ?*subscribed,
            group = %self.config.consumer_group,
            consumer = %self.config.consumer_name,
            "Subscribed to broker topics"
        );
        Ok(())
    }

    async fn poll(&self, max: usize) -> Result<Vec<InboundMessage>, BrokerError> {
        let topics = self.topics.read().await.clone();
        if topics.is_empty() || max == 0 {
            return Ok(Vec::new());
        }

        let mut batch = Vec::new();
        for topic in &topics {
            let room = max - batch.len();
            if room == 0 {
                return Ok(batch);
            }
            batch.extend(self.claim_idle(topic, room).await?);
        }

        let room = max - batch.len();
        if room > 0 {
            batch.extend(self.read_new(&topics, room).await?);
        }

        Ok(batch)
    }

    async fn ack(&self, message: &InboundMessage) -> Result<(), BrokerError> {
        let stream = message.topic.clone();
        let group = self.config.consumer_group.clone();
        let id = message.id.clone();

        let _: i64 = self
            .pool
            .execute(|mut conn| async move {
                redis::cmd("XACK")
                    .arg(&stream)
                    .arg(&group)
                    .arg(&id)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        tracing::debug!(topic = %message.topic, message_id = %message.id, "Acknowledged message");
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for RedisStreamBroker {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &Value,
    ) -> Result<String, BrokerError> {
        let body = serde_json::to_string(payload)?;
        let stream = topic.to_string();
        let key = key.to_string();
        let max_length = self.config.stream_max_length;

        let id: String = self
            .pool
            .execute(|mut conn| async move {
                redis::cmd("XADD")
                    .arg(&stream)
                    .arg("MAXLEN")
                    .arg("~")
                    .arg(max_length)
                    .arg("*")
                    .arg(KEY_FIELD)
                    .arg(&key)
                    .arg(PAYLOAD_FIELD)
                    .arg(&body)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        tracing::trace!(topic = %topic, stream_id = %id, "Published to stream");
        Ok(id)
    }
}
