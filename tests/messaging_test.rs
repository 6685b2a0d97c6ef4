mod common;

use kafka_events::kafka::{Broker, ConsumedRecord, InMemoryBroker, TopicOutcome};
use kafka_events::{Error, EventConsumer, EventProducer, TopicAdmin};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Level;

struct Harness {
    broker: InMemoryBroker,
    admin: TopicAdmin,
    producer: EventProducer,
    shared: Arc<dyn Broker>,
}

impl Harness {
    fn new() -> Self {
        let broker = InMemoryBroker::new();
        let shared: Arc<dyn Broker> = Arc::new(broker.clone());
        Self {
            admin: TopicAdmin::new(Arc::clone(&shared)),
            producer: EventProducer::new(Arc::clone(&shared)),
            broker,
            shared,
        }
    }

    /// Starts a consumer in the background; records are forwarded on the channel.
    fn spawn_consumer(
        &self,
        group: &str,
        topic: &str,
    ) -> (
        mpsc::UnboundedReceiver<ConsumedRecord>,
        CancellationToken,
        tokio::task::JoinHandle<kafka_events::Result<()>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = EventConsumer::new(Arc::clone(&self.shared), true);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let group = group.to_string();
        let topic = topic.to_string();

        let handle = tokio::spawn(async move {
            consumer
                .consume_until(
                    &group,
                    &topic,
                    move |record| {
                        let _ = tx.send(record.clone());
                    },
                    token,
                )
                .await
        });
        (rx, shutdown, handle)
    }
}

#[tokio::test]
async fn test_idempotent_topic_creation() {
    common::init_tracing();
    let h = Harness::new();

    assert_eq!(
        h.admin.ensure_topic("T", 3).await.unwrap(),
        TopicOutcome::Created { partitions: 3 }
    );
    assert_eq!(
        h.admin.ensure_topic("T", 3).await.unwrap(),
        TopicOutcome::AlreadyExists
    );

    assert_eq!(h.broker.stats().create_calls, 1);
    assert_eq!(h.broker.partition_count("T").await, Some(3));
}

#[tokio::test]
async fn test_publish_closes_session_on_both_branches() {
    let h = Harness::new();
    h.admin.ensure_topic("T", 1).await.unwrap();

    h.producer.publish("T", &json!({"ok": true})).await.unwrap();
    let after_success = h.broker.stats();
    assert_eq!(after_success.producer_opened, 1);
    assert_eq!(after_success.producer_closed, 1);

    h.broker.fail_sends(true);
    assert!(h.producer.publish("T", &json!({"ok": false})).await.is_err());
    let after_failure = h.broker.stats();
    assert_eq!(after_failure.producer_opened, 2);
    assert_eq!(after_failure.producer_closed, 2);
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Sample {
    a: i32,
    b: String,
}

#[tokio::test]
async fn test_payload_survives_publish_and_consume() {
    let h = Harness::new();
    h.admin.ensure_topic("T", 1).await.unwrap();

    let sent = Sample {
        a: 1,
        b: "x".to_string(),
    };
    h.producer.publish("T", &sent).await.unwrap();

    let (mut rx, shutdown, handle) = h.spawn_consumer("roundtrip", "T");
    let record = rx.recv().await.unwrap();

    assert_eq!(record.payload_str(), Some(r#"{"a":1,"b":"x"}"#));
    assert_eq!(record.decode::<Sample>().unwrap(), sent);
    assert_eq!(record.decode::<Value>().unwrap(), json!({"a": 1, "b": "x"}));

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_new_group_sees_history_before_new_messages() {
    let h = Harness::new();
    h.admin.ensure_topic("history", 3).await.unwrap();
    h.producer.publish("history", &json!({"seq": 1})).await.unwrap();
    h.producer.publish("history", &json!({"seq": 2})).await.unwrap();

    let (mut rx, shutdown, handle) = h.spawn_consumer("brand-new", "history");

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    h.producer.publish("history", &json!({"seq": 3})).await.unwrap();
    let third = rx.recv().await.unwrap();

    let seqs: Vec<i64> = [first, second, third]
        .iter()
        .map(|r| r.decode::<Value>().unwrap()["seq"].as_i64().unwrap())
        .collect();
    assert_eq!(seqs, vec![1, 2, 3]);

    shutdown.cancel();
    handle.await.unwrap().unwrap();
    assert_eq!(h.broker.stats().consumer_closed, 1);
}

#[tokio::test]
async fn test_refused_connection_resolves_with_logged_error() {
    let (logs, _guard) = common::LogCapture::install();
    let h = Harness::new();
    h.broker.refuse_connections(true);

    let result = h.producer.publish("T", &json!({})).await;
    assert!(matches!(result, Err(Error::Connection(_))));
    assert!(logs.contains(Level::ERROR, "Failed to open producer session"));

    let result = h.admin.ensure_topic("T", 1).await;
    assert!(matches!(result, Err(Error::Connection(_))));
    assert!(logs.contains(Level::ERROR, "Failed to open admin session"));
}

#[tokio::test]
async fn test_failed_send_is_logged() {
    let (logs, _guard) = common::LogCapture::install();
    let h = Harness::new();
    h.admin.ensure_topic("T", 1).await.unwrap();
    h.broker.fail_sends(true);

    assert!(h.producer.publish("T", &json!({})).await.is_err());
    assert!(logs.contains(Level::ERROR, "Failed to publish message"));
    assert!(!logs.contains(Level::ERROR, "Failed to open producer session"));
}

#[tokio::test]
async fn test_unkeyed_messages_have_no_order_guarantee() {
    let h = Harness::new();
    h.admin.ensure_topic("spread", 3).await.unwrap();
    for n in 1..=3 {
        h.producer.publish("spread", &json!({"n": n})).await.unwrap();
    }

    let (mut rx, shutdown, handle) = h.spawn_consumer("spread-readers", "spread");
    let mut seen = Vec::new();
    for _ in 0..3 {
        let record = rx.recv().await.unwrap();
        seen.push(record.decode::<Value>().unwrap()["n"].as_i64().unwrap());
    }
    // Only the set of messages is guaranteed, not their order.
    seen.sort();
    assert_eq!(seen, vec![1, 2, 3]);

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_keyed_messages_arrive_in_order() {
    let h = Harness::new();
    h.admin.ensure_topic("keyed", 3).await.unwrap();
    for n in 1..=3 {
        h.producer
            .publish_keyed("keyed", "entity-1", &json!({"n": n}))
            .await
            .unwrap();
    }

    let (mut rx, shutdown, handle) = h.spawn_consumer("keyed-readers", "keyed");
    let mut seen = Vec::new();
    for _ in 0..3 {
        let record = rx.recv().await.unwrap();
        assert_eq!(record.key_str(), Some("entity-1"));
        seen.push(record.decode::<Value>().unwrap()["n"].as_i64().unwrap());
    }
    assert_eq!(seen, vec![1, 2, 3]);

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_group_members_share_offsets() {
    let h = Harness::new();
    h.admin.ensure_topic("work", 1).await.unwrap();
    h.producer.publish("work", &json!({"job": 1})).await.unwrap();

    let (mut rx, shutdown, handle) = h.spawn_consumer("workers", "work");
    rx.recv().await.unwrap();
    shutdown.cancel();
    handle.await.unwrap().unwrap();

    // A restarted member resumes after the committed offset.
    h.producer.publish("work", &json!({"job": 2})).await.unwrap();
    let (mut rx, shutdown, handle) = h.spawn_consumer("workers", "work");
    let record = rx.recv().await.unwrap();
    assert_eq!(record.decode::<Value>().unwrap()["job"], 2);
    assert_eq!(record.offset, 1);

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}
