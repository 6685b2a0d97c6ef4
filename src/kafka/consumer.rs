use crate::kafka::broker::{Broker, ConsumedRecord, ConsumerSession, OffsetReset};
use crate::Result;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Lifecycle of one consume call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    Subscribed,
    Consuming,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsumerState::Disconnected => "disconnected",
            ConsumerState::Connecting => "connecting",
            ConsumerState::Subscribed => "subscribed",
            ConsumerState::Consuming => "consuming",
        };
        f.write_str(name)
    }
}

/// Long-running subscription loop for a consumer group.
///
/// Records are handed to the handler one at a time, in the order the broker
/// delivers them; a slow handler delays every record behind it. A fatal
/// connect, subscribe or receive error ends the loop. Restarting is left to
/// the caller, see [`Supervisor`](crate::supervisor::Supervisor).
pub struct EventConsumer {
    broker: Arc<dyn Broker>,
    offset_reset: OffsetReset,
}

impl EventConsumer {
    /// `from_beginning` controls where a group with no committed offset starts.
    pub fn new(broker: Arc<dyn Broker>, from_beginning: bool) -> Self {
        Self {
            broker,
            offset_reset: OffsetReset::from_beginning(from_beginning),
        }
    }

    /// Runs until a fatal error, which is logged and returned.
    pub async fn consume<F>(&self, group: &str, topic: &str, handler: F) -> Result<()>
    where
        F: FnMut(&ConsumedRecord) + Send,
    {
        self.consume_until(group, topic, handler, CancellationToken::new())
            .await
    }

    /// Like [`consume`](Self::consume), but returns `Ok(())` once `shutdown`
    /// is cancelled.
    #[instrument(skip(self, handler, shutdown), fields(group = %group, topic = %topic))]
    pub async fn consume_until<F>(
        &self,
        group: &str,
        topic: &str,
        mut handler: F,
        shutdown: CancellationToken,
    ) -> Result<()>
    where
        F: FnMut(&ConsumedRecord) + Send,
    {
        transition(ConsumerState::Connecting);
        let mut session = match self.broker.open_consumer(group, self.offset_reset).await {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to open consumer session: {}", e);
                transition(ConsumerState::Disconnected);
                return Err(e);
            }
        };

        let result = run(session.as_mut(), topic, &mut handler, &shutdown).await;

        if let Err(e) = session.close().await {
            error!("Failed to close consumer session: {}", e);
        }
        transition(ConsumerState::Disconnected);

        match &result {
            Ok(()) => info!("Consumer stopped on shutdown request"),
            Err(e) => error!("Consumer terminated: {}", e),
        }
        result
    }
}

fn transition(state: ConsumerState) {
    info!(state = %state, "Consumer state changed");
}

async fn run<F>(
    session: &mut dyn ConsumerSession,
    topic: &str,
    handler: &mut F,
    shutdown: &CancellationToken,
) -> Result<()>
where
    F: FnMut(&ConsumedRecord) + Send,
{
    session.subscribe(topic).await?;
    transition(ConsumerState::Subscribed);
    transition(ConsumerState::Consuming);

    loop {
        let record = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            record = session.recv() => record?,
        };

        debug!(
            partition = record.partition,
            offset = record.offset,
            "Received message"
        );
        handler(&record);
    }
}
