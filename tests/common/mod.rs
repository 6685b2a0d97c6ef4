#![allow(dead_code)]

use kafka_events::config::{AdminConfig, Config, ConsumerConfig, KafkaConfig, ProducerConfig};
use std::env;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

/// Get test configuration from environment variables
pub fn get_test_config() -> Config {
    // Use TEST_ prefix for test environment variables
    let kafka = KafkaConfig {
        client_id: format!("kafka-events-test-{}", std::process::id()),
        brokers: env::var("TEST_KAFKA_BROKERS")
            .unwrap_or_else(|_| "localhost:9092".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .collect(),
    };

    let producer = ProducerConfig {
        message_timeout_ms: 5_000,
        flush_timeout_ms: 1_000,
        ..ProducerConfig::default()
    };

    let consumer = ConsumerConfig {
        from_beginning: true,
        session_timeout_ms: 6_000,
        enable_auto_commit: true,
    };

    let admin = AdminConfig {
        operation_timeout_ms: 10_000,
        ..AdminConfig::default()
    };

    Config {
        kafka,
        producer,
        consumer,
        admin,
    }
}

/// Topic name unique to this test process
pub fn unique_topic(label: &str) -> String {
    format!("test_{}_{}", label, std::process::id())
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("kafka_events=debug,rdkafka=info")
        .try_init()
        .ok();
}

/// Records every event emitted while its guard is held on the current thread.
#[derive(Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

impl LogCapture {
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        (capture, tracing::subscriber::set_default(subscriber))
    }

    /// True if an event at `level` has a message containing `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.events
            .lock()
            .unwrap()
            .iter()
            .any(|(l, message)| *l == level && message.contains(needle))
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = MessageVisitor::default();
        event.record(&mut message);
        self.events
            .lock()
            .unwrap()
            .push((*event.metadata().level(), message.0));
    }
}

#[derive(Default)]
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}
