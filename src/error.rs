//! Error types and result handling for kafka-relay.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! Only [`Error::Config`] is fatal. Every other variant is absorbed by the
//! [`Publisher`](crate::Publisher) loop, reported as telemetry and retried.
//!
//! # Example
//!
//! ```rust
//! use kafka_relay::{Error, Result};
//!
//! fn connect_to_cluster() -> Result<()> {
//!     // Simulating a connection error
//!     Err(Error::Connection("all brokers refused".to_string()))
//! }
//!
//! match connect_to_cluster() {
//!     Ok(()) => println!("Connected"),
//!     Err(e) if e.is_retryable() => eprintln!("Will retry: {}", e),
//!     Err(e) => eprintln!("Fatal: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for kafka-relay operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad or missing required configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Service lookup or coordinator HTTP fetch failed.
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// The discovery response did not have the expected shape.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Opening the producer session failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Failure reported by an already open session.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The session refused one record for good (oversized, unknown
    /// partition, ...). The session itself is still usable.
    #[error("Record rejected: {0}")]
    Rejected(String),

    /// I/O error, typically from reading the record source.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Graceful shutdown was requested (e.g., via Ctrl+C).
    ///
    /// Used to unwind out of a connection attempt that was interrupted.
    #[error("Shutdown requested")]
    Shutdown,
}

impl Error {
    /// Whether the publisher loop answers this error with another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Discovery(_) | Error::Parse(_) | Error::Connection(_) | Error::Transport(_)
        )
    }
}

/// A convenient Result type alias for kafka-relay operations.
///
/// This is equivalent to `std::result::Result<T, kafka_relay::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
