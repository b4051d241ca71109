use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A record waiting to be published. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub destination: String,
    pub payload: Bytes,
}

impl OutboundMessage {
    pub fn new(destination: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            destination: destination.into(),
            payload: payload.into(),
        }
    }
}

/// One cluster member's network address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
}

impl BrokerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidEndpoint(pub String);

impl fmt::Display for InvalidEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid broker endpoint '{}', expected host:port", self.0)
    }
}

impl std::error::Error for InvalidEndpoint {}

impl FromStr for BrokerEndpoint {
    type Err = InvalidEndpoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        // rsplit keeps bracketed IPv6 hosts intact: "[::1]:9092".
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| InvalidEndpoint(s.to_string()))?;
        if host.is_empty() {
            return Err(InvalidEndpoint(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| InvalidEndpoint(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for BrokerEndpoint {
    type Error = InvalidEndpoint;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BrokerEndpoint> for String {
    fn from(endpoint: BrokerEndpoint) -> Self {
        endpoint.to_string()
    }
}

/// Renders endpoints the way `bootstrap.servers` expects them.
pub fn join_endpoints(endpoints: &[BrokerEndpoint]) -> String {
    endpoints
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
