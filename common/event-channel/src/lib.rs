//! Event channel: publish side of the message bus shared by the order- and
//! inventory-facing services.
//!
//! Delivery is at-least-once; ordering is only guaranteed per record key, so
//! publishers key records by product id and consumers deduplicate by the
//! `requestId` carried in every payload. Consumption runs in per-service
//! `StreamConsumer` loops; this crate only owns the producer surface and the
//! message vocabulary.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod messages;
pub mod retry;

pub use messages::{
    ReservationRequest, ReservationResponse, StockAction, INVENTORY_REQUEST_TOPIC,
    INVENTORY_RESPONSE_TOPIC,
};
pub use retry::{with_retry, RetryPolicy};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Deliver `payload` to `topic`. Records with the same `key` land on the
    /// same partition, which is the only ordering the system relies on.
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), ChannelError>;
}

/// Serialize `message` as JSON and publish it keyed by product id.
pub async fn publish_json<T: Serialize>(
    channel: &dyn EventChannel,
    topic: &str,
    key: &str,
    message: &T,
) -> Result<(), ChannelError> {
    let payload = serde_json::to_vec(message)?;
    channel.publish(topic, key, &payload).await
}

// ---------------- Kafka Implementation ----------------

#[derive(Clone)]
pub struct KafkaEventChannel {
    producer: FutureProducer,
    retry: RetryPolicy,
}

impl KafkaEventChannel {
    pub fn new(bootstrap: &str, retry: RetryPolicy) -> Result<Self, ChannelError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap)
            .create()?;
        Ok(Self { producer, retry })
    }

    pub fn from_producer(producer: FutureProducer, retry: RetryPolicy) -> Self {
        Self { producer, retry }
    }
}

#[async_trait]
impl EventChannel for KafkaEventChannel {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), ChannelError> {
        with_retry(self.retry, "kafka publish", || async {
            self.producer
                .send(
                    FutureRecord::to(topic).payload(payload).key(key),
                    Duration::from_secs(0),
                )
                .await
                .map(|_| ())
                .map_err(|(err, _)| ChannelError::Publish {
                    topic: topic.to_string(),
                    reason: err.to_string(),
                })
        })
        .await
    }
}

// ---------------- In-Memory Implementation (Tests) ----------------

/// Per-topic fan-out over unbounded channels. Subscribers registered before
/// a publish see every payload once; closed receivers are pruned lazily.
#[derive(Clone, Default)]
pub struct InMemoryEventChannel {
    topics: Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>>>,
}

impl InMemoryEventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .lock()
            .expect("topic registry poisoned")
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        rx
    }
}

#[async_trait]
impl EventChannel for InMemoryEventChannel {
    async fn publish(&self, topic: &str, _key: &str, payload: &[u8]) -> Result<(), ChannelError> {
        let mut guard = self.topics.lock().expect("topic registry poisoned");
        if let Some(subscribers) = guard.get_mut(topic) {
            subscribers.retain(|tx| tx.send(payload.to_vec()).is_ok());
        }
        Ok(())
    }
}
