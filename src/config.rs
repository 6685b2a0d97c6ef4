use serde::{Deserialize, Serialize};
use std::path::Path;

const ENV_PREFIX: &str = "KAFKA_EVENTS";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub producer: ProducerConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

/// Broker connection descriptor: who we are and where the brokers live.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_brokers")]
    pub brokers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProducerConfig {
    #[serde(default = "default_acks")]
    pub acks: String,
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsumerConfig {
    #[serde(default = "default_from_beginning")]
    pub from_beginning: bool,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    #[serde(default = "default_enable_auto_commit")]
    pub enable_auto_commit: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminConfig {
    #[serde(default = "default_partitions")]
    pub default_partitions: i32,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: i32,
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    #[serde(default = "default_metadata_timeout_ms")]
    pub metadata_timeout_ms: u64,
}

impl Config {
    /// Loads configuration from a TOML file, overlaid with `KAFKA_EVENTS_*`
    /// environment variables.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        Self::build(Some(path.as_ref()), true, Self::environment())
    }

    /// Like [`Config::from_file`], but a missing file (or no file at all) falls
    /// back to defaults plus environment.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        Self::build(path, false, Self::environment())
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("kafka.brokers")
    }

    fn build(
        path: Option<&Path>,
        required: bool,
        environment: config::Environment,
    ) -> crate::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(required));
        }

        let config: Config = builder.add_source(environment).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.kafka.validate()?;
        if self.admin.default_partitions <= 0 {
            return Err(invalid(format!(
                "admin.default_partitions must be positive, got {}",
                self.admin.default_partitions
            )));
        }
        if self.admin.replication_factor <= 0 {
            return Err(invalid(format!(
                "admin.replication_factor must be positive, got {}",
                self.admin.replication_factor
            )));
        }
        Ok(())
    }
}

impl KafkaConfig {
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(invalid("kafka.client_id must not be empty".to_string()));
        }
        if self.brokers.is_empty() {
            return Err(invalid("kafka.brokers must list at least one broker".to_string()));
        }
        for broker in &self.brokers {
            let valid = match broker.rsplit_once(':') {
                Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
                None => false,
            };
            if !valid {
                return Err(invalid(format!(
                    "broker address '{}' is not of the form host:port",
                    broker
                )));
            }
        }
        Ok(())
    }
}

fn invalid(message: String) -> crate::Error {
    crate::Error::Config(config::ConfigError::Message(message))
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            brokers: default_brokers(),
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            acks: default_acks(),
            compression: default_compression(),
            message_timeout_ms: default_message_timeout_ms(),
            flush_timeout_ms: default_flush_timeout_ms(),
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            from_beginning: default_from_beginning(),
            session_timeout_ms: default_session_timeout_ms(),
            enable_auto_commit: default_enable_auto_commit(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            default_partitions: default_partitions(),
            replication_factor: default_replication_factor(),
            operation_timeout_ms: default_operation_timeout_ms(),
            metadata_timeout_ms: default_metadata_timeout_ms(),
        }
    }
}

fn default_client_id() -> String {
    "kafka-events".to_string()
}

fn default_brokers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

fn default_acks() -> String {
    "all".to_string()
}

// Payloads go out as plain JSON text.
fn default_compression() -> String {
    "none".to_string()
}

fn default_message_timeout_ms() -> u64 {
    30_000
}

fn default_flush_timeout_ms() -> u64 {
    5_000
}

fn default_from_beginning() -> bool {
    true
}

fn default_session_timeout_ms() -> u64 {
    10_000
}

fn default_enable_auto_commit() -> bool {
    true
}

fn default_partitions() -> i32 {
    1
}

fn default_replication_factor() -> i32 {
    1
}

fn default_operation_timeout_ms() -> u64 {
    30_000
}

fn default_metadata_timeout_ms() -> u64 {
    5_000
}
