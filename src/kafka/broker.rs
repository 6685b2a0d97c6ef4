//! The session seam between the messaging operations and a broker.
//!
//! A [`Broker`] is the shared, long-lived handle built once at startup. It is
//! not a connection: each operation opens its own short-lived session from it
//! (admin, producer or consumer), uses it, and closes it. [`KafkaClient`]
//! implements this against a real cluster through rdkafka; [`InMemoryBroker`]
//! implements it in-process.
//!
//! [`KafkaClient`]: crate::kafka::KafkaClient
//! [`InMemoryBroker`]: crate::kafka::InMemoryBroker

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

/// Where a consumer group with no committed offset starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetReset {
    /// Replay the full retained history.
    Earliest,
    /// Only see records published after subscribing.
    Latest,
}

impl OffsetReset {
    pub fn from_beginning(from_beginning: bool) -> Self {
        if from_beginning {
            OffsetReset::Earliest
        } else {
            OffsetReset::Latest
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

/// Result of an idempotent topic provisioning request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicOutcome {
    Created { partitions: i32 },
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetadata {
    pub name: String,
    pub partitions: i32,
}

/// A single record on its way to the broker.
#[derive(Debug, Clone)]
pub struct OutgoingRecord {
    pub topic: String,
    pub key: Option<String>,
    pub payload: String,
}

/// Where the broker stored a published record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// A record handed to a consumer's message handler.
#[derive(Debug, Clone)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub payload: Option<Bytes>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ConsumedRecord {
    /// The payload as UTF-8 text, if present and valid.
    pub fn payload_str(&self) -> Option<&str> {
        self.payload
            .as_deref()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    pub fn key_str(&self) -> Option<&str> {
        self.key
            .as_deref()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    /// Parses the JSON payload into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        match self.payload.as_deref() {
            Some(bytes) => crate::kafka::JsonSerializer::decode(bytes),
            None => Err(Error::InvalidMessage {
                message: format!(
                    "record {}/{}@{} has no payload",
                    self.topic, self.partition, self.offset
                ),
            }),
        }
    }
}

/// Factory for sessions. Shared by reference across every operation.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn open_admin(&self) -> Result<Box<dyn AdminSession>>;

    async fn open_producer(&self) -> Result<Box<dyn ProducerSession>>;

    async fn open_consumer(
        &self,
        group: &str,
        offset_reset: OffsetReset,
    ) -> Result<Box<dyn ConsumerSession>>;
}

#[async_trait]
pub trait AdminSession: Send {
    async fn list_topics(&mut self) -> Result<Vec<TopicMetadata>>;

    /// Issues one create request. A broker-side "already exists" answer is
    /// reported as `Ok(TopicOutcome::AlreadyExists)`.
    async fn create_topic(&mut self, name: &str, partitions: i32) -> Result<TopicOutcome>;

    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait ProducerSession: Send {
    async fn send(&mut self, record: OutgoingRecord) -> Result<Delivery>;

    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait ConsumerSession: Send {
    async fn subscribe(&mut self, topic: &str) -> Result<()>;

    /// Waits for the next record. Records of one partition arrive in offset order.
    async fn recv(&mut self) -> Result<ConsumedRecord>;

    async fn close(&mut self) -> Result<()>;
}
