//! Self-healing Kafka publisher.
//!
//! Records pushed onto an inbound channel are published to a Kafka cluster
//! by a [`Publisher`] that resolves brokers (statically or through framework
//! discovery), opens a producer session, and transparently re-resolves and
//! reconnects whenever that session fails. Lifecycle events are reported on
//! a non-blocking telemetry channel.
//!
//! ```rust,no_run
//! use kafka_relay::{
//!     stats_channel, Config, Discovery, DiscoveryResolver, KafkaConnector, OutboundMessage,
//!     Publisher,
//! };
//!
//! # async fn example() -> kafka_relay::Result<()> {
//! let config = Config::new(Discovery::Brokers("localhost:9092".to_string()));
//! config.validate()?;
//!
//! let (stats, _events) = stats_channel(config.stats_capacity);
//! let resolver = DiscoveryResolver::new(&config, stats.clone())?;
//! let connector = KafkaConnector::new(&config.kafka, stats.clone());
//! let publisher = Publisher::new(resolver, connector, config.backoff, stats);
//!
//! let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
//! tx.send(OutboundMessage::new("metrics", "cpu=0.42")).ok();
//! drop(tx);
//!
//! publisher.run(rx).await
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod discovery;
pub mod error;
pub mod publisher;
pub mod session;
pub mod stats;
pub mod types;

pub mod kafka;

pub use backoff::BackoffPolicy;
pub use config::{Config, Discovery, FrameworkConfig, KafkaConfig};
pub use discovery::{BrokerResolver, CoordinatorLookup, DiscoveryResolver, SrvCoordinatorLookup};
pub use error::{Error, Result};
pub use kafka::{KafkaConnector, KafkaSession};
pub use publisher::{Publisher, PublisherState};
pub use session::{Connector, Session};
pub use stats::{stats_channel, StatsEvent, StatsKind, StatsSink};
pub use types::{BrokerEndpoint, OutboundMessage};
