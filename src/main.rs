use clap::{ArgAction, Parser};
use kafka_relay::{
    stats_channel, BackoffPolicy, Config, Discovery, DiscoveryResolver, KafkaConfig,
    KafkaConnector, OutboundMessage, Publisher, Result, StatsEvent, StatsKind,
};
use std::collections::HashMap;
use std::io::BufRead;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "kafka-relay")]
#[command(about = "Publishes stdin records to Kafka, reconnecting across broker outages", long_about = None)]
struct Args {
    #[arg(long, env = "KAFKA_BROKERS", help = "The Kafka brokers to connect to, as a comma separated list")]
    kafka_brokers: Option<String>,

    #[arg(long, env = "KAFKA_FRAMEWORK", help = "The Kafka framework to query for brokers")]
    kafka_framework: Option<String>,

    #[arg(long, env = "KAFKA_SRV_DOMAIN", default_value = "marathon.mesos")]
    kafka_srv_domain: String,

    #[arg(long, env = "KAFKA_COORDINATOR_DOMAIN", default_value = "mesos")]
    kafka_coordinator_domain: String,

    #[arg(long, env = "KAFKA_REQUIRE_ALL_ACKS", help = "Require all in-sync replicas to commit outgoing data")]
    kafka_require_all_acks: bool,

    #[arg(long, env = "KAFKA_COMPRESS_SNAPPY", default_value_t = true, action = ArgAction::Set)]
    kafka_compress_snappy: bool,

    #[arg(long, env = "KAFKA_FLUSH_MS", default_value_t = 5000, help = "Milliseconds to wait between output flushes")]
    kafka_flush_ms: u64,

    #[arg(long, env = "KAFKA_VERBOSE", help = "Enable extra logging in the underlying Kafka client")]
    kafka_verbose: bool,

    #[arg(long, env = "KAFKA_CLIENT_ID", default_value = "kafka-relay")]
    kafka_client_id: String,

    #[arg(short, long, env = "KAFKA_TOPIC", help = "Topic that stdin records are published to")]
    topic: String,

    #[arg(long, default_value_t = 10_000)]
    connect_timeout_ms: u64,

    #[arg(long, default_value_t = 10_000)]
    discovery_timeout_ms: u64,

    #[arg(long, default_value_t = 5000)]
    close_timeout_ms: u64,

    #[arg(long, default_value_t = 100, help = "Delay after the first failed connection attempt")]
    retry_initial_ms: u64,

    #[arg(long, default_value_t = 30_000, help = "Upper bound for reconnect delays (0 retries immediately)")]
    retry_max_ms: u64,

    #[arg(long, default_value_t = 2.0)]
    retry_factor: f64,

    #[arg(long, default_value_t = 60, help = "Seconds between telemetry summaries")]
    stats_interval_secs: u64,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose, args.kafka_verbose);

    info!("Starting kafka-relay");

    let config = match build_config(&args) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    match &config.discovery {
        Discovery::Brokers(list) => info!(kafka_brokers = %list, topic = %args.topic, "Configuration summary"),
        Discovery::Framework(framework) => info!(
            kafka_framework = %framework.name,
            srv_name = %framework.srv_name(),
            topic = %args.topic,
            "Configuration summary"
        ),
    }
    info!(
        acks = config.kafka.acks(),
        compression = config.kafka.compression(),
        flush_ms = config.kafka.flush_ms,
        "Producer settings"
    );

    let (stats, events) = stats_channel(config.stats_capacity);
    let summary = tokio::spawn(summarize_stats(
        events,
        Duration::from_secs(args.stats_interval_secs.max(1)),
    ));

    let resolver = DiscoveryResolver::new(&config, stats.clone())?;
    let connector = KafkaConnector::new(&config.kafka, stats.clone());
    let publisher = Publisher::new(resolver, connector, config.backoff, stats);

    let shutdown = publisher.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    let (tx, rx) = mpsc::unbounded_channel();
    spawn_stdin_reader(args.topic.clone(), tx)?;

    publisher.run(rx).await?;

    // Every sink clone is gone once the publisher returns.
    let _ = summary.await;
    Ok(())
}

fn build_config(args: &Args) -> Result<Config> {
    let mut discovery =
        Discovery::from_options(args.kafka_brokers.clone(), args.kafka_framework.clone())?;
    if let Discovery::Framework(framework) = &mut discovery {
        framework.srv_domain = args.kafka_srv_domain.clone();
        framework.coordinator_domain = args.kafka_coordinator_domain.clone();
        framework.timeout_ms = args.discovery_timeout_ms;
    }

    let mut config = Config::new(discovery);
    config.kafka = KafkaConfig {
        require_all_acks: args.kafka_require_all_acks,
        compress_snappy: args.kafka_compress_snappy,
        flush_ms: args.kafka_flush_ms,
        verbose: args.kafka_verbose,
        client_id: args.kafka_client_id.clone(),
        connect_timeout_ms: args.connect_timeout_ms,
        close_timeout_ms: args.close_timeout_ms,
    };
    config.backoff = BackoffPolicy {
        initial_ms: args.retry_initial_ms,
        max_ms: args.retry_max_ms,
        factor: args.retry_factor,
    };

    config.validate()?;
    Ok(config)
}

// Tokio's stdin read cannot be cancelled, so a plain thread feeds the queue
// and is simply abandoned at exit.
fn spawn_stdin_reader(topic: String, tx: mpsc::UnboundedSender<OutboundMessage>) -> Result<()> {
    std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            let mut records: u64 = 0;
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin");
                        break;
                    }
                };
                if line.is_empty() {
                    continue;
                }
                if tx.send(OutboundMessage::new(topic.as_str(), line)).is_err() {
                    break;
                }
                records += 1;
            }
            info!(records, "Finished reading stdin");
        })?;
    Ok(())
}

async fn summarize_stats(mut events: mpsc::Receiver<StatsEvent>, every: Duration) {
    let mut counts: HashMap<StatsKind, u64> = HashMap::new();
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if event.kind != StatsKind::MessageSent {
                        debug!(kind = %event.kind, detail = %event.detail, "Lifecycle event");
                    }
                    *counts.entry(event.kind).or_default() += 1;
                }
                None => break,
            },
            _ = ticker.tick() => log_counts(&counts),
        }
    }

    log_counts(&counts);
}

fn log_counts(counts: &HashMap<StatsKind, u64>) {
    let get = |kind: StatsKind| counts.get(&kind).copied().unwrap_or(0);
    info!(
        sent = get(StatsKind::MessageSent),
        sessions_opened = get(StatsKind::SessionOpened),
        sessions_closed = get(StatsKind::SessionClosed),
        connection_failures = get(StatsKind::ConnectionFailed),
        discovery_failures = get(StatsKind::DiscoveryFailed),
        delivery_failures = get(StatsKind::DeliveryFailed),
        "Publisher stats"
    );
}

fn init_logging(json: bool, verbose: bool, kafka_verbose: bool) {
    let mut env_filter = if verbose {
        EnvFilter::new("kafka_relay=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("kafka_relay=info,warn"))
    };
    if kafka_verbose {
        if let Ok(directive) = "rdkafka=debug".parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

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
