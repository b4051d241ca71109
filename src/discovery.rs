//! Broker resolution.
//!
//! Turns the configured [`Discovery`] mode into a list of
//! [`BrokerEndpoint`]s. An explicit list is split locally; a framework name
//! is resolved through a DNS SRV lookup for the framework scheduler, whose
//! `/v1/connection` endpoint returns the live broker addresses:
//!
//! ```json
//! { "dns": ["broker-0.kafka.mesos:9092", "broker-1.kafka.mesos:9092"] }
//! ```
//!
//! Nothing is cached. Every call re-runs the lookup so that a reconnect
//! picks up replaced brokers.

use crate::config::{Config, Discovery, FrameworkConfig};
use crate::stats::{StatsKind, StatsSink};
use crate::types::{join_endpoints, BrokerEndpoint};
use crate::{Error, Result};
use bytes::Bytes;
use hickory_resolver::TokioAsyncResolver;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Produces the broker list for a new session.
pub trait BrokerResolver: Send + Sync {
    fn resolve(&self) -> impl Future<Output = Result<Vec<BrokerEndpoint>>> + Send;
}

/// Finds the HTTP endpoint that lists a framework's brokers.
pub trait CoordinatorLookup: Send + Sync {
    fn coordinator_url(
        &self,
        framework: &FrameworkConfig,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// Looks up `_<framework>._tcp.<srv_domain>` using the system resolver
/// configuration.
#[derive(Debug, Clone, Default)]
pub struct SrvCoordinatorLookup;

impl CoordinatorLookup for SrvCoordinatorLookup {
    async fn coordinator_url(&self, framework: &FrameworkConfig) -> Result<String> {
        let srv_name = framework.srv_name();

        // Built per lookup so resolv.conf changes are honoured as well.
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| Error::Discovery(format!("DNS resolver unavailable: {}", e)))?;

        let lookup = resolver
            .srv_lookup(srv_name.as_str())
            .await
            .map_err(|e| Error::Discovery(format!("SRV lookup for {} failed: {}", srv_name, e)))?;

        let record = lookup.iter().next().ok_or_else(|| {
            Error::Discovery(format!("Framework '{}' not found", framework.name))
        })?;

        debug!(srv = %srv_name, target = %record.target(), port = record.port(), "SRV record found");
        Ok(framework.connection_url(record.port()))
    }
}

/// [`BrokerResolver`] driven by the configured discovery mode.
pub struct DiscoveryResolver<L = SrvCoordinatorLookup> {
    discovery: Discovery,
    http: reqwest::Client,
    lookup: L,
    stats: StatsSink,
}

impl DiscoveryResolver<SrvCoordinatorLookup> {
    pub fn new(config: &Config, stats: StatsSink) -> Result<Self> {
        Self::with_lookup(config, stats, SrvCoordinatorLookup)
    }
}

impl<L: CoordinatorLookup> DiscoveryResolver<L> {
    pub fn with_lookup(config: &Config, stats: StatsSink, lookup: L) -> Result<Self> {
        let timeout_ms = match &config.discovery {
            Discovery::Framework(framework) => framework.timeout_ms,
            Discovery::Brokers(_) => 10_000,
        };

        // Coordinators live inside the cluster network; never route them through a proxy.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .no_proxy()
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            discovery: config.discovery.clone(),
            http,
            lookup,
            stats,
        })
    }

    #[instrument(skip(self, framework), fields(framework = %framework.name))]
    async fn lookup_brokers(&self, framework: &FrameworkConfig) -> Result<Vec<BrokerEndpoint>> {
        let url = self.lookup.coordinator_url(framework).await?;
        info!(%url, "Fetching broker list from framework");

        let body = self.fetch(&url).await?;
        extract_brokers(&body)
    }

    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Discovery(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Discovery(format!("GET {} returned {}", url, status)));
        }

        response
            .bytes()
            .await
            .map_err(|e| Error::Discovery(format!("reading body from {} failed: {}", url, e)))
    }
}

impl<L: CoordinatorLookup> BrokerResolver for DiscoveryResolver<L> {
    async fn resolve(&self) -> Result<Vec<BrokerEndpoint>> {
        let brokers = match &self.discovery {
            Discovery::Brokers(list) => split_brokers(list)?,
            Discovery::Framework(framework) => match self.lookup_brokers(framework).await {
                Ok(brokers) => brokers,
                Err(e) => {
                    self.stats.emit(StatsKind::DiscoveryFailed, framework.name.as_str());
                    warn!(framework = %framework.name, error = %e, "Broker lookup failed");
                    return Err(e);
                }
            },
        };

        info!(brokers = %join_endpoints(&brokers), "Kafka brokers resolved");
        Ok(brokers)
    }
}

/// Splits an explicit comma separated broker list, keeping its order.
///
/// Whitespace around entries and empty entries are ignored.
pub fn split_brokers(list: &str) -> Result<Vec<BrokerEndpoint>> {
    let brokers = list
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<BrokerEndpoint>()
                .map_err(|e| Error::Config(e.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;

    if brokers.is_empty() {
        return Err(Error::Config("broker list must be non-empty".to_string()));
    }
    Ok(brokers)
}

/// Reads the `dns` list out of a framework connection document.
pub fn extract_brokers(body: &[u8]) -> Result<Vec<BrokerEndpoint>> {
    let document: Value = serde_json::from_slice(body)
        .map_err(|e| Error::Parse(format!("connection info is not valid JSON: {}", e)))?;

    let entries = document
        .get("dns")
        .ok_or_else(|| Error::Parse("connection info has no `dns` field".to_string()))?
        .as_array()
        .ok_or_else(|| Error::Parse("`dns` field is not a list".to_string()))?;

    let brokers = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let entry = entry
                .as_str()
                .ok_or_else(|| Error::Parse(format!("`dns[{}]` is not a string: {}", i, entry)))?;
            entry
                .parse::<BrokerEndpoint>()
                .map_err(|e| Error::Parse(e.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;

    if brokers.is_empty() {
        return Err(Error::Parse("`dns` field lists no brokers".to_string()));
    }
    Ok(brokers)
}
