use crate::kafka::broker::{Broker, Delivery, OutgoingRecord};
use crate::kafka::{JsonSerializer, KeyStrategy};
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Publishes JSON events, one producer session per call.
///
/// Each publish makes exactly one send attempt with no retry or batching at
/// this level. The session is closed whether or not the send succeeded, and a
/// failed close is logged without replacing the send's outcome.
pub struct EventProducer {
    broker: Arc<dyn Broker>,
}

impl EventProducer {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Publishes without a key. Partition choice is left to the broker, so
    /// there is no ordering guarantee between separate calls.
    pub async fn publish<T>(&self, topic: &str, payload: &T) -> Result<Delivery>
    where
        T: Serialize + ?Sized + Sync,
    {
        self.send(topic, None, payload).await
    }

    /// Publishes with an explicit key; records sharing a key keep their order.
    pub async fn publish_keyed<T>(&self, topic: &str, key: &str, payload: &T) -> Result<Delivery>
    where
        T: Serialize + ?Sized + Sync,
    {
        self.send(topic, Some(key.to_string()), payload).await
    }

    /// Publishes with a key derived from the payload by `strategy`. A payload
    /// missing the key fields is sent unkeyed.
    pub async fn publish_with<T>(
        &self,
        topic: &str,
        strategy: &KeyStrategy,
        payload: &T,
    ) -> Result<Delivery>
    where
        T: Serialize + ?Sized + Sync,
    {
        let value = serde_json::to_value(payload).map_err(|e| {
            error!(topic = %topic, "Failed to serialize payload: {}", e);
            e
        })?;
        let key = strategy.extract_key(&value);
        self.send(topic, key, &value).await
    }

    #[instrument(skip(self, payload))]
    async fn send<T>(&self, topic: &str, key: Option<String>, payload: &T) -> Result<Delivery>
    where
        T: Serialize + ?Sized + Sync,
    {
        let encoded = JsonSerializer::encode(payload).map_err(|e| {
            error!("Failed to serialize payload: {}", e);
            e
        })?;

        let mut session = self.broker.open_producer().await.map_err(|e| {
            error!("Failed to open producer session: {}", e);
            e
        })?;

        let result = session
            .send(OutgoingRecord {
                topic: topic.to_string(),
                key,
                payload: encoded,
            })
            .await;

        if let Err(e) = session.close().await {
            error!("Failed to close producer session: {}", e);
        }

        match result {
            Ok(delivery) => {
                info!(
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "Published message"
                );
                Ok(delivery)
            }
            Err(e) => {
                error!("Failed to publish message: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::broker::TopicOutcome;
    use crate::kafka::{InMemoryBroker, TopicAdmin};
    use crate::Error;
    use serde_json::json;

    async fn setup(topic: &str, partitions: i32) -> (InMemoryBroker, EventProducer) {
        let broker = InMemoryBroker::new();
        let shared: Arc<dyn Broker> = Arc::new(broker.clone());
        let outcome = TopicAdmin::new(Arc::clone(&shared))
            .ensure_topic(topic, partitions)
            .await
            .unwrap();
        assert_eq!(outcome, TopicOutcome::Created { partitions });
        (broker, EventProducer::new(shared))
    }

    #[tokio::test]
    async fn test_close_once_after_successful_send() {
        let (broker, producer) = setup("T", 1).await;

        let delivery = producer.publish("T", &json!({"a": 1})).await.unwrap();
        assert_eq!(delivery.topic, "T");
        assert_eq!(delivery.offset, 0);

        let stats = broker.stats();
        assert_eq!(stats.producer_opened, 1);
        assert_eq!(stats.producer_closed, 1);
        assert_eq!(stats.send_calls, 1);
    }

    #[tokio::test]
    async fn test_close_once_after_failed_send() {
        let (broker, producer) = setup("T", 1).await;
        broker.fail_sends(true);

        let result = producer.publish("T", &json!({"a": 1})).await;
        assert!(matches!(result, Err(Error::Connection(_))));

        let stats = broker.stats();
        assert_eq!(stats.producer_opened, 1);
        assert_eq!(stats.producer_closed, 1);
        assert_eq!(stats.send_calls, 1);
    }

    #[tokio::test]
    async fn test_close_failure_does_not_mask_send_outcome() {
        let (broker, producer) = setup("T", 1).await;
        broker.fail_closes(true);

        assert!(producer.publish("T", &json!({})).await.is_ok());

        broker.fail_sends(true);
        assert!(matches!(
            producer.publish("T", &json!({})).await,
            Err(Error::Connection(_))
        ));
        assert_eq!(broker.stats().producer_closed, 2);
    }

    #[tokio::test]
    async fn test_refused_connection_returns_error() {
        let (broker, producer) = setup("T", 1).await;
        broker.refuse_connections(true);

        let result = producer.publish("T", &json!({})).await;
        assert!(matches!(result, Err(Error::Connection(_))));
        assert_eq!(broker.stats().send_calls, 0);
        assert_eq!(broker.record_count("T").await, 0);
    }

    #[tokio::test]
    async fn test_keyed_publish_pins_partition() {
        let (_broker, producer) = setup("orders", 6).await;

        let mut partitions = Vec::new();
        for n in 1..=3 {
            let delivery = producer
                .publish_keyed("orders", "order-77", &json!({"seq": n}))
                .await
                .unwrap();
            partitions.push(delivery.partition);
        }
        assert!(partitions.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_publish_with_key_strategy() {
        let (_broker, producer) = setup("orders", 4).await;
        let strategy = KeyStrategy::FieldPath("order.id".to_string());

        let first = producer
            .publish_with("orders", &strategy, &json!({"order": {"id": 5}, "step": 1}))
            .await
            .unwrap();
        let second = producer
            .publish_with("orders", &strategy, &json!({"order": {"id": 5}, "step": 2}))
            .await
            .unwrap();
        assert_eq!(first.partition, second.partition);
        assert_eq!(second.offset, first.offset + 1);
    }
}
