use crate::kafka::broker::{AdminSession, Broker, TopicMetadata, TopicOutcome};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

const MAX_TOPIC_NAME_LEN: usize = 249;

/// Idempotent topic provisioning, meant for startup and deploy time.
pub struct TopicAdmin {
    broker: Arc<dyn Broker>,
}

impl TopicAdmin {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Creates `topic_name` with `partitions` partitions unless it already exists.
    ///
    /// At most one create request is issued per call, and an existing topic is
    /// never resized. Every failure is logged before it is returned, so callers
    /// doing fire-and-forget provisioning may ignore the `Err`.
    #[instrument(skip(self), fields(topic = %topic_name))]
    pub async fn ensure_topic(&self, topic_name: &str, partitions: i32) -> Result<TopicOutcome> {
        if let Err(e) = validate_topic_name(topic_name).and(validate_partitions(partitions)) {
            error!("Rejected topic request: {}", e);
            return Err(e);
        }

        let mut session = match self.broker.open_admin().await {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to open admin session: {}", e);
                return Err(e);
            }
        };

        let outcome = ensure_with(session.as_mut(), topic_name, partitions).await;

        if let Err(e) = session.close().await {
            warn!("Failed to close admin session: {}", e);
        }

        match &outcome {
            Ok(TopicOutcome::AlreadyExists) => info!("Topic '{}' already exists", topic_name),
            Ok(TopicOutcome::Created { partitions }) => {
                info!("Created topic '{}' with {} partitions", topic_name, partitions)
            }
            Err(e) => error!("Failed to ensure topic '{}': {}", topic_name, e),
        }
        outcome
    }

    pub async fn list_topics(&self) -> Result<Vec<TopicMetadata>> {
        let mut session = self.broker.open_admin().await.map_err(|e| {
            error!("Failed to open admin session: {}", e);
            e
        })?;

        let topics = session.list_topics().await;
        if let Err(e) = session.close().await {
            warn!("Failed to close admin session: {}", e);
        }

        topics.map_err(|e| {
            error!("Failed to list topics: {}", e);
            e
        })
    }
}

async fn ensure_with(
    session: &mut dyn AdminSession,
    topic_name: &str,
    partitions: i32,
) -> Result<TopicOutcome> {
    let topics = session.list_topics().await?;
    debug!("Broker reports {} topics", topics.len());

    if topics.iter().any(|topic| topic.name == topic_name) {
        return Ok(TopicOutcome::AlreadyExists);
    }

    info!("Creating topic '{}'", topic_name);
    session.create_topic(topic_name, partitions).await
}

/// Kafka's legal topic names: 1-249 characters of `[A-Za-z0-9._-]`, excluding `.` and `..`.
pub fn validate_topic_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("name is empty".to_string())
    } else if name.len() > MAX_TOPIC_NAME_LEN {
        Some(format!("name exceeds {} characters", MAX_TOPIC_NAME_LEN))
    } else if name == "." || name == ".." {
        Some("name cannot be '.' or '..'".to_string())
    } else {
        name.chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
            .map(|c| format!("illegal character '{}'", c))
    };

    match reason {
        Some(reason) => Err(Error::InvalidTopic {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

fn validate_partitions(partitions: i32) -> Result<()> {
    if partitions <= 0 {
        return Err(Error::InvalidPartitionCount(partitions));
    }
    Ok(())
}
