//! Error types and result handling for kafka-events.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! Every messaging operation logs its failures before returning them, so a
//! caller that only wants fire-and-forget behavior can drop the `Err` without
//! losing the diagnostic.
//!
//! # Example
//!
//! ```rust
//! use kafka_events::{Error, Result};
//!
//! fn open_session() -> Result<()> {
//!     Err(Error::Connection("broker refused connection".to_string()))
//! }
//!
//! match open_session() {
//!     Ok(()) => println!("Connected"),
//!     Err(Error::Connection(msg)) => eprintln!("Connection error: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for kafka-events operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Kafka client, producer, consumer or admin error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// JSON serialization error when encoding or decoding payloads.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Broker unreachable or the connection was lost.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Topic name rejected before reaching the broker.
    #[error("Invalid topic name '{name}': {reason}")]
    InvalidTopic {
        /// The rejected name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Partition count must be strictly positive.
    #[error("Invalid partition count: {0}")]
    InvalidPartitionCount(i32),

    /// A consumed record could not be interpreted.
    #[error("Invalid message format: {message}")]
    InvalidMessage {
        /// Description of what was invalid
        message: String,
    },

    /// A session-level operation failed outside of the Kafka client itself.
    #[error("Session error during {operation}: {message}")]
    Session {
        /// The session operation that failed (e.g. `send`, `list_topics`)
        operation: String,
        /// Description of the failure
        message: String,
    },
}

impl Error {
    pub(crate) fn session(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Session {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// A convenient Result type alias for kafka-events operations.
///
/// This is equivalent to `std::result::Result<T, kafka_events::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
