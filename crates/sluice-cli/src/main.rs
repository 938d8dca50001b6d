//! Sluice CLI
//!
//! Runs a change-data pipeline against an in-process log: producers
//! publish change records while a consumer group reads them, handles each
//! record and commits its offset.

use clap::{Parser, Subcommand, ValueEnum};
use sluice_client::{
    ChangeDataHandler, ChangeDataProducer, ConfigOverrides, CoordinatorConfig, GroupRuntime,
    MemoryLog, MixedProducer, PipelineConfig, Producer,
};
use sluice_protocol::TopicPartition;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Sluice - change-data consumer groups with manual offset commit")]
#[command(version)]
struct Cli {
    /// Comma-separated broker list
    #[arg(long, global = true, value_delimiter = ',')]
    brokers: Option<Vec<String>>,

    /// Topic to produce to and consume from
    #[arg(long, global = true)]
    topic: Option<String>,

    /// Consumer group id
    #[arg(long, global = true)]
    group_id: Option<String>,

    /// PLAINTEXT, SSL, SASL_PLAINTEXT or SASL_SSL
    #[arg(long, global = true)]
    security_protocol: Option<String>,

    /// PLAIN, SCRAM-SHA-256 or SCRAM-SHA-512
    #[arg(long, global = true)]
    sasl_mechanism: Option<String>,

    #[arg(long, global = true)]
    username: Option<String>,

    #[arg(long, global = true)]
    password: Option<String>,

    /// Verify broker certificates
    #[arg(long, global = true)]
    ssl_verify: Option<bool>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run producers and a consumer group until Ctrl+C
    Demo {
        /// Partitions in the demo topic
        #[arg(short = 'n', long, env = "SLUICE_PARTITIONS", default_value = "3")]
        partitions: u32,

        /// Group members to start
        #[arg(short, long, default_value = "2")]
        consumers: usize,

        /// Message generator
        #[arg(long, value_enum, default_value_t = ProducerKind::ChangeData)]
        producer: ProducerKind,

        /// Delay between produced messages
        #[arg(long, default_value = "1000")]
        interval_ms: u64,

        /// Simulated per-record processing time
        #[arg(long, default_value = "100")]
        processing_ms: u64,

        /// Stop after this many seconds instead of waiting for Ctrl+C
        #[arg(long)]
        duration_secs: Option<u64>,
    },

    /// Print the resolved pipeline configuration
    Profile,
}

/// Which message generator feeds the demo topic
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq)]
enum ProducerKind {
    /// Protobuf change-data batches
    #[default]
    ChangeData,
    /// Alternating plain-text and JSON messages
    Mixed,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            brokers: self.brokers.clone(),
            topic: self.topic.clone(),
            group_id: self.group_id.clone(),
            security_protocol: self.security_protocol.clone(),
            sasl_mechanism: self.sasl_mechanism.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            ssl_verify: self.ssl_verify,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env(&cli.overrides())?;

    match cli.command {
        Commands::Demo {
            partitions,
            consumers,
            producer,
            interval_ms,
            processing_ms,
            duration_secs,
        } => {
            let demo = DemoOptions {
                partitions,
                consumers,
                producer,
                interval: Duration::from_millis(interval_ms),
                processing_delay: Duration::from_millis(processing_ms),
                duration: duration_secs.map(Duration::from_secs),
            };
            run_demo(config, demo).await?;
        }
        Commands::Profile => {
            println!("Brokers:        {}", config.brokers.join(","));
            println!("Topic:          {}", config.topic);
            println!("Consumer group: {}", config.group_id);
            println!("Security:       {}", config.security);
        }
    }

    Ok(())
}

struct DemoOptions {
    partitions: u32,
    consumers: usize,
    producer: ProducerKind,
    interval: Duration,
    processing_delay: Duration,
    duration: Option<Duration>,
}

async fn run_demo(config: PipelineConfig, opts: DemoOptions) -> anyhow::Result<()> {
    if opts.partitions == 0 {
        anyhow::bail!("demo topic needs at least one partition");
    }

    info!(
        brokers = %config.brokers.join(","),
        topic = %config.topic,
        group_id = %config.group_id,
        security = %config.security,
        "Starting demo pipeline"
    );

    let log = MemoryLog::new();
    log.create_topic(config.topic.clone(), opts.partitions);
    let shutdown = CancellationToken::new();

    let producer_task = {
        let publisher = Arc::new(log.clone());
        let cancel = shutdown.child_token();
        let topic = config.topic.clone();
        let interval = opts.interval;
        match opts.producer {
            ProducerKind::ChangeData => tokio::spawn(
                Producer::new(publisher, topic, ChangeDataProducer::new()).run(cancel, interval),
            ),
            ProducerKind::Mixed => tokio::spawn(
                Producer::new(publisher, topic, MixedProducer::new()).run(cancel, interval),
            ),
        }
    };

    let handler = Arc::new(ChangeDataHandler::new().with_processing_delay(opts.processing_delay));
    let mut members = JoinSet::new();
    for _ in 0..opts.consumers.max(1) {
        let runtime = GroupRuntime::new(
            Arc::new(log.clone()),
            CoordinatorConfig::new(config.group_id.clone()),
            handler.clone(),
        );
        let cancel = shutdown.child_token();
        let topics = vec![config.topic.clone()];
        members.spawn(async move { runtime.run(cancel, topics).await });
    }

    let deadline = async {
        match opts.duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };

    let mut failure = None;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received Ctrl+C"),
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
            }
        }
        _ = deadline => info!("Demo duration elapsed"),
        Some(joined) = members.join_next() => {
            failure = match joined {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(anyhow::Error::new(e)),
                Err(e) => Some(anyhow::Error::new(e)),
            };
            if let Some(e) = &failure {
                error!(error = %e, "Consumer group member failed");
            }
        }
    }

    info!("Initiating graceful shutdown...");
    shutdown.cancel();

    let sent = producer_task.await.unwrap_or_default();
    while let Some(joined) = members.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Consumer group member stopped with error"),
            Err(e) => warn!(error = %e, "Consumer group member task panicked"),
        }
    }

    println!("Messages sent: {}", sent);
    for partition in 0..opts.partitions {
        let tp = TopicPartition::new(config.topic.clone(), partition);
        let commits = log.commits_for(&config.group_id, &tp);
        match log.committed(&config.group_id, &tp) {
            Some(offset) => println!(
                "{}: committed offset {} ({} commits)",
                tp,
                offset,
                commits.len()
            ),
            None => println!("{}: nothing committed", tp),
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
