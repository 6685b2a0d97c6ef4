pub mod config;
pub mod error;
pub mod supervisor;

pub mod kafka;

pub use config::Config;
pub use error::{Error, Result};
pub use kafka::{EventConsumer, EventProducer, KafkaClient, TopicAdmin};
pub use supervisor::{RestartPolicy, Supervisor};
