use crate::backoff::BackoffPolicy;
use crate::discovery::split_brokers;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Immutable configuration snapshot, resolved once at startup and handed to
/// the resolver and connector constructors.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub discovery: Discovery,
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub backoff: BackoffPolicy,
    #[serde(default = "default_stats_capacity")]
    pub stats_capacity: usize,
}

/// Where the broker list comes from.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Discovery {
    /// Comma separated `host:port` list.
    Brokers(String),
    /// Named framework resolved through DNS SRV and its HTTP endpoint.
    Framework(FrameworkConfig),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FrameworkConfig {
    pub name: String,
    #[serde(default = "default_srv_domain")]
    pub srv_domain: String,
    #[serde(default = "default_coordinator_domain")]
    pub coordinator_domain: String,
    #[serde(default = "default_discovery_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    #[serde(default)]
    pub require_all_acks: bool,
    #[serde(default = "default_compress_snappy")]
    pub compress_snappy: bool,
    #[serde(default = "default_flush_ms")]
    pub flush_ms: u64,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            require_all_acks: false,
            compress_snappy: default_compress_snappy(),
            flush_ms: default_flush_ms(),
            verbose: false,
            client_id: default_client_id(),
            connect_timeout_ms: default_connect_timeout_ms(),
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

impl Config {
    pub fn new(discovery: Discovery) -> Self {
        Self {
            discovery,
            kafka: KafkaConfig::default(),
            backoff: BackoffPolicy::default(),
            stats_capacity: default_stats_capacity(),
        }
    }

    /// Checks everything that can be checked without touching the network.
    pub fn validate(&self) -> Result<()> {
        match &self.discovery {
            Discovery::Brokers(list) => {
                split_brokers(list)?;
            }
            Discovery::Framework(framework) => {
                if framework.name.trim().is_empty() {
                    return Err(Error::Config("framework name must be non-empty".to_string()));
                }
            }
        }

        if self.stats_capacity == 0 {
            return Err(Error::Config(
                "stats channel capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

impl Discovery {
    /// Picks the discovery mode from the two mutually exclusive options.
    ///
    /// Blank values count as unset.
    pub fn from_options(brokers: Option<String>, framework: Option<String>) -> Result<Self> {
        let brokers = brokers.filter(|b| !b.trim().is_empty());
        let framework = framework.filter(|f| !f.trim().is_empty());

        match (brokers, framework) {
            (Some(list), None) => Ok(Discovery::Brokers(list)),
            (None, Some(name)) => Ok(Discovery::Framework(FrameworkConfig::new(name.trim()))),
            (Some(_), Some(_)) => Err(Error::Config(
                "specify either a broker list or a framework name, not both".to_string(),
            )),
            (None, None) => Err(Error::Config(
                "either a broker list or a framework name must be specified".to_string(),
            )),
        }
    }
}

impl FrameworkConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            srv_domain: default_srv_domain(),
            coordinator_domain: default_coordinator_domain(),
            timeout_ms: default_discovery_timeout_ms(),
        }
    }

    /// SRV record holding the coordinator's port, e.g. `_kafka._tcp.marathon.mesos`.
    pub fn srv_name(&self) -> String {
        format!("_{}._tcp.{}", self.name, self.srv_domain)
    }

    pub fn connection_url(&self, port: u16) -> String {
        format!(
            "http://{}.{}:{}/v1/connection",
            self.name, self.coordinator_domain, port
        )
    }
}

impl KafkaConfig {
    pub fn acks(&self) -> &'static str {
        if self.require_all_acks {
            "all"
        } else {
            "1"
        }
    }

    pub fn compression(&self) -> &'static str {
        if self.compress_snappy {
            "snappy"
        } else {
            "none"
        }
    }
}

fn default_srv_domain() -> String {
    "marathon.mesos".to_string()
}

fn default_coordinator_domain() -> String {
    "mesos".to_string()
}

fn default_discovery_timeout_ms() -> u64 {
    10_000
}

fn default_compress_snappy() -> bool {
    true
}

fn default_flush_ms() -> u64 {
    5000
}

fn default_client_id() -> String {
    "kafka-relay".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_close_timeout_ms() -> u64 {
    5000
}

fn default_stats_capacity() -> usize {
    1024
}
