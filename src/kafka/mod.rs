pub mod broker;
pub mod client;
pub mod consumer;
pub mod key_strategy;
pub mod memory;
pub mod producer;
pub mod serializer;
pub mod topic_admin;

pub use broker::{
    AdminSession, Broker, ConsumedRecord, ConsumerSession, Delivery, OffsetReset, OutgoingRecord,
    ProducerSession, TopicMetadata, TopicOutcome,
};
pub use client::KafkaClient;
pub use consumer::{ConsumerState, EventConsumer};
pub use key_strategy::KeyStrategy;
pub use memory::{BrokerStats, InMemoryBroker};
pub use producer::EventProducer;
pub use serializer::JsonSerializer;
pub use topic_admin::TopicAdmin;
