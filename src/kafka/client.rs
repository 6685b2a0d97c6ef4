use crate::config::{AdminConfig, Config, ConsumerConfig, KafkaConfig, ProducerConfig};
use crate::kafka::broker::{
    AdminSession, Broker, ConsumedRecord, ConsumerSession, Delivery, OffsetReset, OutgoingRecord,
    ProducerSession, TopicMetadata, TopicOutcome,
};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::{ClientContext, DefaultClientContext};
use rdkafka::consumer::{Consumer, ConsumerContext, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::{ClientConfig, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared rdkafka client template.
///
/// Holds the broker connection descriptor and the per-role settings. Building
/// it never touches the network; each `open_*` call creates a fresh rdkafka
/// handle, and the first request on that handle is what reaches the brokers.
#[derive(Clone)]
pub struct KafkaClient {
    descriptor: KafkaConfig,
    base: ClientConfig,
    producer: ProducerConfig,
    consumer: ConsumerConfig,
    admin: AdminConfig,
}

impl KafkaClient {
    pub fn new(config: &Config) -> Result<Self> {
        config.kafka.validate()?;

        let mut base = ClientConfig::new();
        base.set("bootstrap.servers", config.kafka.bootstrap_servers())
            .set("client.id", &config.kafka.client_id);

        info!(
            client_id = %config.kafka.client_id,
            brokers = ?config.kafka.brokers,
            "Kafka client configured"
        );

        Ok(Self {
            descriptor: config.kafka.clone(),
            base,
            producer: config.producer.clone(),
            consumer: config.consumer.clone(),
            admin: config.admin.clone(),
        })
    }

    pub fn descriptor(&self) -> &KafkaConfig {
        &self.descriptor
    }

    fn producer_config(&self) -> ClientConfig {
        let mut config = self.base.clone();
        config
            .set("acks", &self.producer.acks)
            .set("compression.type", &self.producer.compression)
            .set("message.timeout.ms", self.producer.message_timeout_ms.to_string());
        config
    }

    fn consumer_config(&self, group: &str, offset_reset: OffsetReset) -> ClientConfig {
        let mut config = self.base.clone();
        config
            .set("group.id", group)
            .set("auto.offset.reset", offset_reset.as_str())
            .set("enable.auto.commit", self.consumer.enable_auto_commit.to_string())
            .set("session.timeout.ms", self.consumer.session_timeout_ms.to_string())
            .set("enable.partition.eof", "false");
        config
    }
}

#[async_trait]
impl Broker for KafkaClient {
    async fn open_admin(&self) -> Result<Box<dyn AdminSession>> {
        let admin: AdminClient<DefaultClientContext> = self.base.create()?;
        debug!("Opened admin session");

        Ok(Box::new(KafkaAdminSession {
            admin: Arc::new(admin),
            replication_factor: self.admin.replication_factor,
            operation_timeout: Duration::from_millis(self.admin.operation_timeout_ms),
            metadata_timeout: Duration::from_millis(self.admin.metadata_timeout_ms),
        }))
    }

    async fn open_producer(&self) -> Result<Box<dyn ProducerSession>> {
        let producer: FutureProducer = self.producer_config().create()?;
        debug!("Opened producer session");

        Ok(Box::new(KafkaProducerSession {
            producer,
            flush_timeout: Duration::from_millis(self.producer.flush_timeout_ms),
        }))
    }

    async fn open_consumer(
        &self,
        group: &str,
        offset_reset: OffsetReset,
    ) -> Result<Box<dyn ConsumerSession>> {
        let (context, failures) = SessionContext::new();
        let consumer: StreamConsumer<SessionContext> = self
            .consumer_config(group, offset_reset)
            .create_with_context(context)?;
        debug!(group = %group, offset_reset = offset_reset.as_str(), "Opened consumer session");

        Ok(Box::new(KafkaConsumerSession {
            consumer: Arc::new(consumer),
            failures,
        }))
    }
}

// librdkafka metadata and flush calls block the calling thread.
async fn blocking<T, F>(operation: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> KafkaResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::session(operation, e.to_string()))?
        .map_err(Error::Kafka)
}

struct KafkaAdminSession {
    admin: Arc<AdminClient<DefaultClientContext>>,
    replication_factor: i32,
    operation_timeout: Duration,
    metadata_timeout: Duration,
}

#[async_trait]
impl AdminSession for KafkaAdminSession {
    async fn list_topics(&mut self) -> Result<Vec<TopicMetadata>> {
        let admin = Arc::clone(&self.admin);
        let timeout = self.metadata_timeout;

        blocking("list_topics", move || {
            let metadata = admin.inner().fetch_metadata(None, timeout)?;
            Ok(metadata
                .topics()
                .iter()
                .map(|topic| TopicMetadata {
                    name: topic.name().to_string(),
                    partitions: topic.partitions().len() as i32,
                })
                .collect())
        })
        .await
    }

    async fn create_topic(&mut self, name: &str, partitions: i32) -> Result<TopicOutcome> {
        let new_topic = NewTopic::new(
            name,
            partitions,
            TopicReplication::Fixed(self.replication_factor),
        );
        let opts = AdminOptions::new().operation_timeout(Some(self.operation_timeout));

        let results = self.admin.create_topics(&[new_topic], &opts).await?;

        let mut outcome = TopicOutcome::Created { partitions };
        for result in results {
            match result {
                Ok(topic) => debug!("Broker acknowledged creation of topic {}", topic),
                Err((_topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    outcome = TopicOutcome::AlreadyExists;
                }
                Err((_topic, code)) => return Err(Error::Kafka(KafkaError::AdminOp(code))),
            }
        }

        Ok(outcome)
    }

    async fn close(&mut self) -> Result<()> {
        debug!("Closed admin session");
        Ok(())
    }
}

struct KafkaProducerSession {
    producer: FutureProducer,
    flush_timeout: Duration,
}

#[async_trait]
impl ProducerSession for KafkaProducerSession {
    async fn send(&mut self, record: OutgoingRecord) -> Result<Delivery> {
        let mut future_record = FutureRecord::<str, str>::to(&record.topic).payload(&record.payload);
        if let Some(key) = record.key.as_deref() {
            future_record = future_record.key(key);
        }

        match self.producer.send(future_record, Timeout::Never).await {
            Ok((partition, offset)) => Ok(Delivery {
                topic: record.topic.clone(),
                partition,
                offset,
            }),
            Err((e, _message)) => Err(Error::Kafka(e)),
        }
    }

    async fn close(&mut self) -> Result<()> {
        let producer = self.producer.clone();
        let timeout = self.flush_timeout;
        blocking("flush", move || producer.flush(timeout)).await?;
        debug!("Closed producer session");
        Ok(())
    }
}

/// Consumer context that reports lost brokers to the session.
///
/// librdkafka delivers client-level errors such as "all brokers down" to the
/// context rather than through `recv`, which would otherwise keep waiting.
struct SessionContext {
    failures: mpsc::UnboundedSender<KafkaError>,
}

impl SessionContext {
    fn new() -> (Self, mpsc::UnboundedReceiver<KafkaError>) {
        let (failures, receiver) = mpsc::unbounded_channel();
        (Self { failures }, receiver)
    }
}

impl ClientContext for SessionContext {
    fn error(&self, error: KafkaError, reason: &str) {
        if is_connection_loss(&error) {
            error!("Kafka consumer lost its brokers: {}: {}", error, reason);
            let _ = self.failures.send(error);
        } else {
            warn!("Kafka client error: {}: {}", error, reason);
        }
    }
}

impl ConsumerContext for SessionContext {}

fn is_connection_loss(error: &KafkaError) -> bool {
    matches!(
        error.rdkafka_error_code(),
        Some(RDKafkaErrorCode::AllBrokersDown | RDKafkaErrorCode::Fatal)
    )
}

struct KafkaConsumerSession {
    consumer: Arc<StreamConsumer<SessionContext>>,
    failures: mpsc::UnboundedReceiver<KafkaError>,
}

#[async_trait]
impl ConsumerSession for KafkaConsumerSession {
    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.consumer.subscribe(&[topic])?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<ConsumedRecord> {
        let message = tokio::select! {
            message = self.consumer.recv() => message?,
            Some(e) = self.failures.recv() => {
                return Err(Error::Connection(format!("broker connection lost: {}", e)));
            }
        };

        Ok(ConsumedRecord {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(Bytes::copy_from_slice),
            payload: message.payload().map(Bytes::copy_from_slice),
            timestamp: message
                .timestamp()
                .to_millis()
                .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis),
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.consumer.unsubscribe();
        debug!("Closed consumer session");
        Ok(())
    }
}
