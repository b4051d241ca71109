//! Lifecycle telemetry.
//!
//! Components push [`StatsEvent`]s through a [`StatsSink`]; the receiving end
//! is owned by whoever embeds the publisher. Emission never blocks: when the
//! channel is full (or the receiver is gone) the event is dropped and counted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsKind {
    ConnectionFailed,
    DiscoveryFailed,
    SessionOpened,
    SessionClosed,
    MessageSent,
    DeliveryFailed,
}

impl fmt::Display for StatsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatsKind::ConnectionFailed => "connection_failed",
            StatsKind::DiscoveryFailed => "discovery_failed",
            StatsKind::SessionOpened => "session_opened",
            StatsKind::SessionClosed => "session_closed",
            StatsKind::MessageSent => "message_sent",
            StatsKind::DeliveryFailed => "delivery_failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatsEvent {
    pub kind: StatsKind,
    /// Topic for `MessageSent`, framework for `DiscoveryFailed`, error text
    /// for `DeliveryFailed`, empty otherwise.
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl StatsEvent {
    pub fn new(kind: StatsKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            at: Utc::now(),
        }
    }
}

/// Non-blocking writer half of the telemetry channel.
#[derive(Debug, Clone)]
pub struct StatsSink {
    tx: mpsc::Sender<StatsEvent>,
    dropped: Arc<AtomicU64>,
}

/// Creates a bounded telemetry channel holding at most `capacity` events.
pub fn stats_channel(capacity: usize) -> (StatsSink, mpsc::Receiver<StatsEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        StatsSink {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

impl StatsSink {
    pub fn emit(&self, kind: StatsKind, detail: impl Into<String>) {
        match self.tx.try_send(StatsEvent::new(kind, detail)) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) | Err(TrySendError::Closed(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                trace!(kind = %event.kind, dropped, "Telemetry event dropped");
            }
        }
    }

    /// Number of events discarded so far across all clones of this sink.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_emission_order() {
        let (sink, mut rx) = stats_channel(8);

        sink.emit(StatsKind::SessionOpened, "");
        sink.emit(StatsKind::MessageSent, "t1");
        sink.emit(StatsKind::SessionClosed, "");

        let kinds: Vec<_> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .into_iter()
        .map(|e| (e.kind, e.detail))
        .collect();

        assert_eq!(
            kinds,
            vec![
                (StatsKind::SessionOpened, String::new()),
                (StatsKind::MessageSent, "t1".to_string()),
                (StatsKind::SessionClosed, String::new()),
            ]
        );
        assert_eq!(sink.dropped(), 0);
    }

    #[tokio::test]
    async fn test_full_channel_drops_instead_of_blocking() {
        let (sink, mut rx) = stats_channel(2);

        for _ in 0..5 {
            sink.emit(StatsKind::MessageSent, "t1");
        }

        assert_eq!(sink.dropped(), 3);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_receiver_is_counted_not_fatal() {
        let (sink, rx) = stats_channel(4);
        drop(rx);

        let clone = sink.clone();
        clone.emit(StatsKind::ConnectionFailed, "");
        assert_eq!(sink.dropped(), 1);
    }

    #[test]
    fn test_event_serializes_kind_in_snake_case() {
        let event = StatsEvent::new(StatsKind::DiscoveryFailed, "kafka");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "discovery_failed");
        assert_eq!(json["detail"], "kafka");
    }
}
