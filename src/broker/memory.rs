//! In-memory broker for tests and local runs.
//!
//! Keeps the same delivery contract as the Redis backend: polled messages
//! stay pending until acknowledged, and `redeliver_pending` hands every
//! pending message out again the way a consumer-group rebalance would.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::types::{BrokerError, EventConsumer, EventPublisher, InboundMessage};

const IDLE_POLL_WAIT: Duration = Duration::from_millis(5);

/// A record appended through `EventPublisher::publish`
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedRecord {
    pub topic: String,
    pub id: String,
    pub key: String,
    pub payload: Value,
}

#[derive(Debug, Clone)]
struct StoredEntry {
    id: String,
    key: Option<String>,
    payload: String,
}

#[derive(Default)]
struct MemoryState {
    next_id: u64,
    streams: HashMap<String, Vec<StoredEntry>>,
    cursors: HashMap<String, usize>,
    subscribed: Vec<String>,
    /// (topic, id) -> message, in delivery order
    pending: BTreeMap<(String, String), InboundMessage>,
    redeliveries: VecDeque<InboundMessage>,
    acked: Vec<(String, String)>,
    published: Vec<PublishedRecord>,
    failing_topics: HashSet<String>,
    failing_acks: bool,
}

impl MemoryState {
    fn append(&mut self, topic: &str, key: Option<String>, payload: String) -> String {
        self.next_id += 1;
        let id = format!("{}-0", self.next_id);
        self.streams
            .entry(topic.to_string())
            .or_default()
            .push(StoredEntry {
                id: id.clone(),
                key,
                payload,
            });
        id
    }
}

#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<MemoryState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw message as an upstream producer would.
    pub async fn inject(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: impl Into<String>,
    ) -> String {
        let mut state = self.state.lock().await;
        state.append(topic, key.map(str::to_string), payload.into())
    }

    /// Make every publish to `topic` fail until `restore_topic` is called.
    pub async fn fail_topic(&self, topic: &str) {
        self.state.lock().await.failing_topics.insert(topic.to_string());
    }

    pub async fn restore_topic(&self, topic: &str) {
        self.state.lock().await.failing_topics.remove(topic);
    }

    /// Make every `ack` fail while `failing` is set; messages stay pending.
    pub async fn fail_acks(&self, failing: bool) {
        self.state.lock().await.failing_acks = failing;
    }

    /// Records published to `topic`, oldest first
    pub async fn published(&self, topic: &str) -> Vec<PublishedRecord> {
        self.state
            .lock()
            .await
            .published
            .iter()
            .filter(|r| r.topic == topic)
            .cloned()
            .collect()
    }

    pub async fn all_published(&self) -> Vec<PublishedRecord> {
        self.state.lock().await.published.clone()
    }

    pub async fn acked(&self) -> Vec<(String, String)> {
        self.state.lock().await.acked.clone()
    }

    pub async fn is_acked(&self, message: &InboundMessage) -> bool {
        self.state
            .lock()
            .await
            .acked
            .iter()
            .any(|(topic, id)| *topic == message.topic && *id == message.id)
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Queue every unacknowledged message for delivery again.
    ///
    /// Returns how many messages were queued.
    pub async fn redeliver_pending(&self) -> usize {
        let mut state = self.state.lock().await;
        let mut queued = VecDeque::new();
        for message in state.pending.values_mut() {
            message.delivery_count += 1;
            queued.push_back(message.clone());
        }
        let count = queued.len();
        state.redeliveries = queued;
        count
    }
}

#[async_trait]
impl EventConsumer for MemoryBroker {
    async fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        for topic in topics {
            if !state.subscribed.contains(topic) {
                state.subscribed.push(topic.clone());
                state.cursors.entry(topic.clone()).or_insert(0);
            }
        }
        Ok(())
    }

    async fn poll(&self, max: usize) -> Result<Vec<InboundMessage>, BrokerError> {
        let mut state = self.state.lock().await;
        let mut batch = Vec::new();

        while batch.len() < max {
            match state.redeliveries.pop_front() {
                Some(message) => batch.push(message),
                None => break,
            }
        }

        let topics = state.subscribed.clone();
        for topic in topics {
            let cursor = state.cursors.get(&topic).copied().unwrap_or(0);
            let available: Vec<StoredEntry> = state
                .streams
                .get(&topic)
                .map(|entries| {
                    entries
                        .iter()
                        .skip(cursor)
                        .take(max.saturating_sub(batch.len()))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();

            state.cursors.insert(topic.clone(), cursor + available.len());

            for entry in available {
                let message = InboundMessage {
                    topic: topic.clone(),
                    id: entry.id.clone(),
                    key: entry.key,
                    payload: entry.payload,
                    delivery_count: 1,
                };
                state
                    .pending
                    .insert((topic.clone(), entry.id), message.clone());
                batch.push(message);
            }
        }

        if batch.is_empty() {
            // Stand-in for a blocking read so idle poll loops do not spin
            drop(state);
            tokio::time::sleep(IDLE_POLL_WAIT).await;
        }

        Ok(batch)
    }

    async fn ack(&self, message: &InboundMessage) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        if state.failing_acks {
            return Err(BrokerError::Unavailable(format!(
                "ack of {} on {} rejected",
                message.id, message.topic
            )));
        }
        let key = (message.topic.clone(), message.id.clone());
        if state.pending.remove(&key).is_some() {
            state.redeliveries.retain(|m| !(m.topic == key.0 && m.id == key.1));
            state.acked.push(key);
        }
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for MemoryBroker {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &Value,
    ) -> Result<String, BrokerError> {
        let mut state = self.state.lock().await;
        if state.failing_topics.contains(topic) {
            return Err(BrokerError::Unavailable(format!("topic {} rejects writes", topic)));
        }

        let id = state.append(topic, Some(key.to_string()), payload.to_string());
        state.published.push(PublishedRecord {
            topic: topic.to_string(),
            id: id.clone(),
            key: key.to_string(),
            payload: payload.clone(),
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_poll_only_subscribed_topics() {
        let broker = MemoryBroker::new();
        broker.inject("a", None, "1").await;
        broker.inject("b", None, "2").await;
        broker.subscribe(&["a".to_string()]).await.unwrap();

        let batch = broker.poll(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].topic, "a");
        assert!(broker.poll(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unacked_message_is_redelivered() {
        let broker = MemoryBroker::new();
        broker.subscribe(&["t".to_string()]).await.unwrap();
        broker.inject("t", Some("k"), "first").await;
        broker.inject("t", Some("k"), "second").await;

        let batch = broker.poll(10).await.unwrap();
        assert_eq!(batch.len(), 2);
        broker.ack(&batch[1]).await.unwrap();
        assert_eq!(broker.pending_count().await, 1);

        assert_eq!(broker.redeliver_pending().await, 1);
        let again = broker.poll(10).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].payload, "first");
        assert_eq!(again[0].delivery_count, 2);
        assert!(again[0].is_redelivery());

        broker.ack(&again[0]).await.unwrap();
        assert_eq!(broker.pending_count().await, 0);
        assert_eq!(broker.acked().await.len(), 2);
    }

    #[tokio::test]
    async fn test_poll_respects_max() {
        let broker = MemoryBroker::new();
        broker.subscribe(&["t".to_string()]).await.unwrap();
        for i in 0..5 {
            broker.inject("t", None, i.to_string()).await;
        }
        assert_eq!(broker.poll(3).await.unwrap().len(), 3);
        assert_eq!(broker.poll(3).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_publish_records_and_failure_injection() {
        let broker = MemoryBroker::new();
        broker
            .publish("status", "n-1", &json!({"eventType": "NOTIFICATION_SENT"}))
            .await
            .unwrap();

        broker.fail_topic("status").await;
        assert!(broker.publish("status", "n-2", &json!({})).await.is_err());
        broker.restore_topic("status").await;

        let records = broker.published("status").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "n-1");
        assert_eq!(records[0].payload["eventType"], "NOTIFICATION_SENT");
    }

    #[tokio::test]
    async fn test_failing_ack_keeps_message_pending() {
        let broker = MemoryBroker::new();
        broker.subscribe(&["t".to_string()]).await.unwrap();
        broker.inject("t", None, "x").await;
        let message = broker.poll(10).await.unwrap().remove(0);

        broker.fail_acks(true).await;
        assert!(broker.ack(&message).await.is_err());
        assert_eq!(broker.pending_count().await, 1);

        broker.fail_acks(false).await;
        broker.ack(&message).await.unwrap();
        assert!(broker.is_acked(&message).await);
    }
}
