//! In-process [`Broker`] with consumer-group offsets and fault injection.
//!
//! Topics are partitioned append logs held in memory. Unkeyed records are
//! spread round-robin; keyed records hash to a fixed partition. A consumer
//! group's committed position is shared by every session of that group, so
//! each record is delivered once per group. Pending records are delivered in
//! arrival order across partitions, which keeps every partition moving and
//! hands a new group its history before anything published later. Unlike a real Kafka cluster there
//! is no partition assignment: every member reads every partition.
//!
//! [`BrokerStats`] counts every broker-side call so tests can assert how
//! many sessions were opened and closed, or how many create requests were made.

use crate::kafka::broker::{
    AdminSession, Broker, ConsumedRecord, ConsumerSession, Delivery, OffsetReset, OutgoingRecord,
    ProducerSession, TopicMetadata, TopicOutcome,
};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredRecord {
    // Topic-wide arrival order.
    sequence: u64,
    key: Option<Bytes>,
    payload: Bytes,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Topic {
    partitions: Vec<Vec<StoredRecord>>,
    next_partition: usize,
    next_sequence: u64,
}

#[derive(Default)]
struct State {
    topics: BTreeMap<String, Topic>,
    // (group, topic) -> next offset per partition
    committed: HashMap<(String, String), Vec<i64>>,
}

#[derive(Default)]
struct Counters {
    admin_opened: AtomicUsize,
    admin_closed: AtomicUsize,
    producer_opened: AtomicUsize,
    producer_closed: AtomicUsize,
    consumer_opened: AtomicUsize,
    consumer_closed: AtomicUsize,
    subscriptions: AtomicUsize,
    list_calls: AtomicUsize,
    create_calls: AtomicUsize,
    send_calls: AtomicUsize,
}

#[derive(Default)]
struct Faults {
    refuse_connections: AtomicBool,
    fail_sends: AtomicBool,
    fail_closes: AtomicBool,
    fail_receives: AtomicBool,
}

struct Shared {
    state: Mutex<State>,
    arrivals: Notify,
    counters: Counters,
    faults: Faults,
}

/// Snapshot of broker-side call counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub admin_opened: usize,
    pub admin_closed: usize,
    pub producer_opened: usize,
    pub producer_closed: usize,
    pub consumer_opened: usize,
    pub consumer_closed: usize,
    /// Subscriptions whose starting positions are in place.
    pub subscriptions: usize,
    pub list_calls: usize,
    pub create_calls: usize,
    pub send_calls: usize,
}

#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                arrivals: Notify::new(),
                counters: Counters::default(),
                faults: Faults::default(),
            }),
        }
    }

    pub fn stats(&self) -> BrokerStats {
        let c = &self.shared.counters;
        BrokerStats {
            admin_opened: c.admin_opened.load(Ordering::SeqCst),
            admin_closed: c.admin_closed.load(Ordering::SeqCst),
            producer_opened: c.producer_opened.load(Ordering::SeqCst),
            producer_closed: c.producer_closed.load(Ordering::SeqCst),
            consumer_opened: c.consumer_opened.load(Ordering::SeqCst),
            consumer_closed: c.consumer_closed.load(Ordering::SeqCst),
            subscriptions: c.subscriptions.load(Ordering::SeqCst),
            list_calls: c.list_calls.load(Ordering::SeqCst),
            create_calls: c.create_calls.load(Ordering::SeqCst),
            send_calls: c.send_calls.load(Ordering::SeqCst),
        }
    }

    /// Partition count of `topic`, if it exists.
    pub async fn partition_count(&self, topic: &str) -> Option<i32> {
        let state = self.shared.state.lock().await;
        state.topics.get(topic).map(|t| t.partitions.len() as i32)
    }

    /// Number of records stored in `topic` across all partitions.
    pub async fn record_count(&self, topic: &str) -> usize {
        let state = self.shared.state.lock().await;
        state
            .topics
            .get(topic)
            .map(|t| t.partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Every `open_*` call fails as if the broker refused the connection.
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared
            .faults
            .refuse_connections
            .store(refuse, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.shared.faults.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Session `close` calls are still counted but report an error.
    pub fn fail_closes(&self, fail: bool) {
        self.shared.faults.fail_closes.store(fail, Ordering::SeqCst);
    }

    /// Pending and future `recv` calls fail as if the connection dropped.
    pub fn fail_receives(&self, fail: bool) {
        self.shared.faults.fail_receives.store(fail, Ordering::SeqCst);
        self.shared.arrivals.notify_waiters();
    }

    fn check_connect(&self) -> Result<()> {
        if self.shared.faults.refuse_connections.load(Ordering::SeqCst) {
            return Err(Error::Connection("connection refused".to_string()));
        }
        Ok(())
    }
}

fn partition_for_key(key: &str, partition_count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partition_count as u64) as usize
}

fn close_result(shared: &Shared) -> Result<()> {
    if shared.faults.fail_closes.load(Ordering::SeqCst) {
        return Err(Error::session("close", "broker did not acknowledge close"));
    }
    Ok(())
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn open_admin(&self) -> Result<Box<dyn AdminSession>> {
        self.check_connect()?;
        self.shared.counters.admin_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryAdminSession {
            shared: Arc::clone(&self.shared),
            closed: false,
        }))
    }

    async fn open_producer(&self) -> Result<Box<dyn ProducerSession>> {
        self.check_connect()?;
        self.shared.counters.producer_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryProducerSession {
            shared: Arc::clone(&self.shared),
            closed: false,
        }))
    }

    async fn open_consumer(
        &self,
        group: &str,
        offset_reset: OffsetReset,
    ) -> Result<Box<dyn ConsumerSession>> {
        self.check_connect()?;
        self.shared.counters.consumer_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConsumerSession {
            shared: Arc::clone(&self.shared),
            group: group.to_string(),
            offset_reset,
            topic: None,
            closed: false,
        }))
    }
}

struct MemoryAdminSession {
    shared: Arc<Shared>,
    closed: bool,
}

#[async_trait]
impl AdminSession for MemoryAdminSession {
    async fn list_topics(&mut self) -> Result<Vec<TopicMetadata>> {
        self.shared.counters.list_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.shared.state.lock().await;
        Ok(state
            .topics
            .iter()
            .map(|(name, topic)| TopicMetadata {
                name: name.clone(),
                partitions: topic.partitions.len() as i32,
            })
            .collect())
    }

    async fn create_topic(&mut self, name: &str, partitions: i32) -> Result<TopicOutcome> {
        self.shared.counters.create_calls.fetch_add(1, Ordering::SeqCst);
        if partitions <= 0 {
            return Err(Error::InvalidPartitionCount(partitions));
        }

        let mut state = self.shared.state.lock().await;
        if state.topics.contains_key(name) {
            return Ok(TopicOutcome::AlreadyExists);
        }
        state.topics.insert(
            name.to_string(),
            Topic {
                partitions: vec![Vec::new(); partitions as usize],
                next_partition: 0,
                next_sequence: 0,
            },
        );
        debug!("In-memory topic {} created with {} partitions", name, partitions);
        Ok(TopicOutcome::Created { partitions })
    }

    async fn close(&mut self) -> Result<()> {
        if !std::mem::replace(&mut self.closed, true) {
            self.shared.counters.admin_closed.fetch_add(1, Ordering::SeqCst);
        }
        close_result(&self.shared)
    }
}

struct MemoryProducerSession {
    shared: Arc<Shared>,
    closed: bool,
}

#[async_trait]
impl ProducerSession for MemoryProducerSession {
    async fn send(&mut self, record: OutgoingRecord) -> Result<Delivery> {
        self.shared.counters.send_calls.fetch_add(1, Ordering::SeqCst);
        if self.shared.faults.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Connection("broker unavailable during send".to_string()));
        }

        let mut state = self.shared.state.lock().await;
        let topic = state
            .topics
            .get_mut(&record.topic)
            .ok_or_else(|| Error::session("send", format!("unknown topic '{}'", record.topic)))?;

        let partition_count = topic.partitions.len();
        let partition = match &record.key {
            Some(key) => partition_for_key(key, partition_count),
            None => {
                let p = topic.next_partition % partition_count;
                topic.next_partition = topic.next_partition.wrapping_add(1);
                p
            }
        };

        let sequence = topic.next_sequence;
        topic.next_sequence += 1;

        let log = &mut topic.partitions[partition];
        log.push(StoredRecord {
            sequence,
            key: record.key.map(Bytes::from),
            payload: Bytes::from(record.payload),
            timestamp: Utc::now(),
        });
        let offset = (log.len() - 1) as i64;
        drop(state);

        self.shared.arrivals.notify_waiters();
        Ok(Delivery {
            topic: record.topic,
            partition: partition as i32,
            offset,
        })
    }

    async fn close(&mut self) -> Result<()> {
        if !std::mem::replace(&mut self.closed, true) {
            self.shared.counters.producer_closed.fetch_add(1, Ordering::SeqCst);
        }
        close_result(&self.shared)
    }
}

struct MemoryConsumerSession {
    shared: Arc<Shared>,
    group: String,
    offset_reset: OffsetReset,
    topic: Option<String>,
    closed: bool,
}

impl MemoryConsumerSession {
    // Claims the group's oldest undelivered record across all partitions.
    async fn poll(&self, topic_name: &str) -> Option<ConsumedRecord> {
        let mut state = self.shared.state.lock().await;
        let State { topics, committed } = &mut *state;

        let topic = topics.get(topic_name)?;
        let positions = committed.get_mut(&(self.group.clone(), topic_name.to_string()))?;

        let (partition, position, stored) = topic
            .partitions
            .iter()
            .enumerate()
            .filter_map(|(partition, log)| {
                let position = positions[partition];
                log.get(position as usize)
                    .map(|stored| (partition, position, stored))
            })
            .min_by_key(|(_, _, stored)| stored.sequence)?;

        positions[partition] = position + 1;
        Some(ConsumedRecord {
            topic: topic_name.to_string(),
            partition: partition as i32,
            offset: position,
            key: stored.key.clone(),
            payload: Some(stored.payload.clone()),
            timestamp: Some(stored.timestamp),
        })
    }
}

#[async_trait]
impl ConsumerSession for MemoryConsumerSession {
    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        let State { topics, committed } = &mut *state;

        let existing = topics
            .get(topic)
            .ok_or_else(|| Error::session("subscribe", format!("unknown topic '{}'", topic)))?;

        committed
            .entry((self.group.clone(), topic.to_string()))
            .or_insert_with(|| match self.offset_reset {
                OffsetReset::Earliest => vec![0; existing.partitions.len()],
                OffsetReset::Latest => existing
                    .partitions
                    .iter()
                    .map(|log| log.len() as i64)
                    .collect(),
            });

        self.topic = Some(topic.to_string());
        self.shared.counters.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn recv(&mut self) -> Result<ConsumedRecord> {
        let topic = self
            .topic
            .clone()
            .ok_or_else(|| Error::session("recv", "not subscribed"))?;

        loop {
            let arrived = self.shared.arrivals.notified();
            tokio::pin!(arrived);
            // Register before checking so a concurrent send cannot be missed.
            arrived.as_mut().enable();

            if self.shared.faults.fail_receives.load(Ordering::SeqCst) {
                return Err(Error::Connection("broker connection lost".to_string()));
            }
            if let Some(record) = self.poll(&topic).await {
                return Ok(record);
            }

            arrived.await;
        }
    }

    async fn close(&mut self) -> Result<()> {
        if !std::mem::replace(&mut self.closed, true) {
            self.shared.counters.consumer_closed.fetch_add(1, Ordering::SeqCst);
        }
        close_result(&self.shared)
    }
}
