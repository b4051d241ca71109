//! The long-running publisher loop.
//!
//! ```text
//!   Disconnected ──resolve + open──▶ Connecting ──ok──▶ Active
//!        ▲                               │                │
//!        └────────── error, backoff ─────┘                │
//!        └────────────── session failed / submit error ───┘
//! ```
//!
//! Messages are taken from the inbound queue one at a time, in FIFO order,
//! and handed to the active session, which does its own batching. Nothing
//! is taken from the queue while no session is active, so records enqueued
//! during an outage are delivered once the next session opens. A message
//! whose submission fails is held and submitted first on the next session,
//! unless the session rejected that record alone, in which case it is
//! reported as `DeliveryFailed` and dropped.
//!
//! The backoff attempt counter carries across sessions. A session that
//! fails before delivering anything, and within ten seconds of opening, is
//! followed by the next backoff delay rather than an immediate reconnect.
//!
//! The loop only ends when its shutdown token is cancelled or every sender
//! of the inbound queue is gone and the queue is drained.

use crate::backoff::BackoffPolicy;
use crate::discovery::BrokerResolver;
use crate::session::{Connector, Session};
use crate::stats::{StatsKind, StatsSink};
use crate::types::OutboundMessage;
use crate::{Error, Result};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A session this old, or one that delivered anything, resets the backoff.
const STABLE_SESSION: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Disconnected,
    Connecting,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveExit {
    SessionFailed,
    InboundClosed,
    Shutdown,
}

pub struct Publisher<R, C> {
    resolver: R,
    connector: C,
    backoff: BackoffPolicy,
    stats: StatsSink,
    shutdown: CancellationToken,
    state: watch::Sender<PublisherState>,
}

impl<R: BrokerResolver, C: Connector> Publisher<R, C> {
    pub fn new(resolver: R, connector: C, backoff: BackoffPolicy, stats: StatsSink) -> Self {
        let (state, _) = watch::channel(PublisherState::Disconnected);
        Self {
            resolver,
            connector,
            backoff,
            stats,
            shutdown: CancellationToken::new(),
            state,
        }
    }

    /// Uses an externally owned token to stop the loop.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Observes state transitions; only the latest state is retained.
    pub fn state(&self) -> watch::Receiver<PublisherState> {
        self.state.subscribe()
    }

    /// Runs until shutdown or until the inbound queue is closed and drained.
    ///
    /// Only non-retryable errors (bad configuration) are returned.
    pub async fn run(self, mut inbound: mpsc::UnboundedReceiver<OutboundMessage>) -> Result<()> {
        let mut held: Option<OutboundMessage> = None;
        let mut attempt: u32 = 0;

        loop {
            let Some(mut session) = self.connect(&mut attempt).await? else {
                break;
            };

            self.state.send_replace(PublisherState::Active);
            self.stats.emit(StatsKind::SessionOpened, "");
            info!("Kafka session opened");
            let opened = Instant::now();

            let (exit, delivered) = self.pump(&mut session, &mut inbound, &mut held).await;

            self.state.send_replace(PublisherState::Disconnected);
            self.stats.emit(StatsKind::SessionClosed, "");
            session.close().await;

            match exit {
                ActiveExit::SessionFailed => {
                    if delivered > 0 || opened.elapsed() >= STABLE_SESSION {
                        attempt = 0;
                        warn!("Kafka session failed, reconnecting");
                        continue;
                    }
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        retry_in_ms = delay.as_millis() as u64,
                        "Kafka session failed right after opening"
                    );
                    if !self.back_off(&mut attempt).await {
                        break;
                    }
                }
                ActiveExit::InboundClosed => {
                    info!("Inbound queue closed and drained, publisher stopping");
                    return Ok(());
                }
                ActiveExit::Shutdown => break,
            }
        }

        let undelivered = inbound.len() + usize::from(held.is_some());
        if undelivered > 0 {
            warn!(undelivered, "Publisher stopped with messages still queued");
        } else {
            info!("Publisher stopped");
        }
        Ok(())
    }

    /// Disconnected → Connecting, retried until a session opens.
    ///
    /// Returns `None` if shutdown was requested first.
    async fn connect(&self, attempt: &mut u32) -> Result<Option<C::Session>> {
        loop {
            self.state.send_replace(PublisherState::Connecting);

            let result = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Err(Error::Shutdown),
                result = self.open_session() => result,
            };

            let err = match result {
                Ok(session) => return Ok(Some(session)),
                Err(Error::Shutdown) => {
                    self.state.send_replace(PublisherState::Disconnected);
                    return Ok(None);
                }
                Err(e) => e,
            };

            self.state.send_replace(PublisherState::Disconnected);

            if !err.is_retryable() {
                error!(error = %err, "Cannot open Kafka producer");
                return Err(err);
            }

            self.stats.emit(StatsKind::ConnectionFailed, "");
            let delay = self.backoff.delay(*attempt);
            warn!(
                error = %err,
                attempt = *attempt + 1,
                retry_in_ms = delay.as_millis() as u64,
                "Failed to open Kafka producer"
            );

            if !self.back_off(attempt).await {
                return Ok(None);
            }
        }
    }

    /// Sleeps the delay for `attempt` and advances it. Returns `false` if
    /// shutdown was requested meanwhile.
    async fn back_off(&self, attempt: &mut u32) -> bool {
        let delay = self.backoff.delay(*attempt);
        *attempt = attempt.saturating_add(1);

        if delay.is_zero() {
            tokio::task::yield_now().await;
            return !self.shutdown.is_cancelled();
        }

        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn open_session(&self) -> Result<C::Session> {
        let endpoints = self.resolver.resolve().await?;
        self.connector.open(&endpoints).await
    }

    /// The Active state: one message at a time from the queue into the session.
    ///
    /// Also returns how many messages this session accepted.
    async fn pump(
        &self,
        session: &mut C::Session,
        inbound: &mut mpsc::UnboundedReceiver<OutboundMessage>,
        held: &mut Option<OutboundMessage>,
    ) -> (ActiveExit, u64) {
        let mut delivered: u64 = 0;

        loop {
            let message = match held.take() {
                Some(message) => message,
                None => tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => return (ActiveExit::Shutdown, delivered),
                    _ = session.closed() => return (ActiveExit::SessionFailed, delivered),
                    next = inbound.recv() => match next {
                        Some(message) => message,
                        None => return (ActiveExit::InboundClosed, delivered),
                    },
                },
            };

            let submitted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => None,
                result = session.submit(&message) => Some(result),
            };

            match submitted {
                None => {
                    *held = Some(message);
                    return (ActiveExit::Shutdown, delivered);
                }
                Some(Ok(())) => {
                    delivered += 1;
                    debug!(topic = %message.destination, bytes = message.payload.len(), "Message submitted");
                    self.stats.emit(StatsKind::MessageSent, message.destination.as_str());
                }
                Some(Err(Error::Rejected(reason))) => {
                    warn!(topic = %message.destination, %reason, "Record rejected, dropping it");
                    self.stats.emit(StatsKind::DeliveryFailed, reason);
                }
                Some(Err(e)) => {
                    warn!(topic = %message.destination, error = %e, "Submit failed, holding message for the next session");
                    *held = Some(message);
                    return (ActiveExit::SessionFailed, delivered);
                }
            }
        }
    }
}
