use anyhow::Context;
use clap::{Parser, Subcommand};
use kafka_events::kafka::{Broker, ConsumedRecord};
use kafka_events::{
    Config, EventConsumer, EventProducer, KafkaClient, RestartPolicy, Supervisor, TopicAdmin,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "kafka-events")]
#[command(about = "Provision topics, publish and consume JSON events on Kafka", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", help = "TOML configuration file")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a topic unless it already exists
    EnsureTopic {
        topic: String,
        #[arg(short, long, help = "Defaults to admin.default_partitions")]
        partitions: Option<i32>,
    },
    /// Publish one JSON payload
    Publish {
        topic: String,
        payload: String,
        #[arg(short, long, help = "Message key; records sharing a key stay ordered")]
        key: Option<String>,
    },
    /// Consume a topic as part of a consumer group, logging each record
    Consume {
        group: String,
        topic: String,
        #[arg(long, help = "Restart the consumer with backoff after failures")]
        supervise: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting kafka-events");
    // A file named on the command line must exist; otherwise defaults plus environment.
    let config = match args.config.as_deref() {
        Some(path) => Config::from_file(path),
        None => Config::load(None),
    }
    .context("failed to load configuration")?;

    info!(
        client_id = %config.kafka.client_id,
        brokers = ?config.kafka.brokers,
        from_beginning = config.consumer.from_beginning,
        "Configuration summary"
    );

    let broker: Arc<dyn Broker> = Arc::new(KafkaClient::new(&config)?);

    match args.command {
        Command::EnsureTopic { topic, partitions } => {
            let partitions = partitions.unwrap_or(config.admin.default_partitions);
            let outcome = TopicAdmin::new(broker).ensure_topic(&topic, partitions).await?;
            info!(topic = %topic, outcome = ?outcome, "Topic ready");
        }
        Command::Publish {
            topic,
            payload,
            key,
        } => {
            let value: serde_json::Value =
                serde_json::from_str(&payload).context("payload is not valid JSON")?;
            let producer = EventProducer::new(broker);
            let delivery = match key {
                Some(key) => producer.publish_keyed(&topic, &key, &value).await?,
                None => producer.publish(&topic, &value).await?,
            };
            info!(
                topic = %delivery.topic,
                partition = delivery.partition,
                offset = delivery.offset,
                "Message delivered"
            );
        }
        Command::Consume {
            group,
            topic,
            supervise,
        } => {
            let consumer = EventConsumer::new(broker, config.consumer.from_beginning);
            run_consumer(&consumer, &group, &topic, supervise).await?;
        }
    }

    Ok(())
}

async fn run_consumer(
    consumer: &EventConsumer,
    group: &str,
    topic: &str,
    supervise: bool,
) -> kafka_events::Result<()> {
    let supervisor = Supervisor::new(format!("consumer:{}", group), RestartPolicy::default());
    let shutdown = if supervise {
        supervisor.cancellation_token()
    } else {
        CancellationToken::new()
    };

    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                on_signal.cancel();
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    if supervise {
        supervisor
            .supervise(move || consumer.consume_until(group, topic, log_record, shutdown.clone()))
            .await
    } else {
        consumer
            .consume_until(group, topic, log_record, shutdown)
            .await
    }
}

fn log_record(record: &ConsumedRecord) {
    info!(
        topic = %record.topic,
        partition = record.partition,
        offset = record.offset,
        key = record.key_str().unwrap_or(""),
        payload = record.payload_str().unwrap_or("<binary>"),
        "Received message"
    );
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("kafka_events=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("kafka_events=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
