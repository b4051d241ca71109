#![allow(dead_code)]

use kafka_relay::{
    BrokerEndpoint, BrokerResolver, Connector, Error, OutboundMessage, Result, Session,
    StatsEvent, StatsKind,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Shared record of everything the mock transport saw.
#[derive(Default)]
pub struct Harness {
    /// `(session id, message)` in submission order.
    pub submitted: Mutex<Vec<(usize, OutboundMessage)>>,
    pub open_attempts: Mutex<Vec<(Instant, Vec<BrokerEndpoint>)>>,
    pub sessions: Mutex<Vec<CancellationToken>>,
    /// Number of upcoming `open` calls that fail.
    pub open_failures: AtomicU32,
    /// Number of upcoming `submit` calls that fail.
    pub submit_failures: AtomicU32,
    /// Number of upcoming `submit` calls that reject only their record.
    pub submit_rejections: AtomicU32,
    /// While set, `submit` never completes.
    pub stalling: AtomicBool,
    pub stalled_submits: AtomicUsize,
    pub closed_sessions: AtomicUsize,
    /// Submissions made to a session after its failure signal fired.
    pub submits_after_failure: AtomicUsize,
}

impl Harness {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_opens(&self, count: u32) {
        self.open_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_submits(&self, count: u32) {
        self.submit_failures.store(count, Ordering::SeqCst);
    }

    pub fn reject_next_submits(&self, count: u32) {
        self.submit_rejections.store(count, Ordering::SeqCst);
    }

    pub fn stall_submits(&self) {
        self.stalling.store(true, Ordering::SeqCst);
    }

    /// Trips the failure signal of session `id` (0-based, in open order).
    pub fn kill_session(&self, id: usize) {
        self.sessions.lock().unwrap()[id].cancel();
    }

    pub fn submitted(&self) -> Vec<(usize, OutboundMessage)> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn submitted_payloads(&self) -> Vec<String> {
        self.submitted()
            .into_iter()
            .map(|(_, m)| String::from_utf8(m.payload.to_vec()).unwrap())
            .collect()
    }

    pub fn open_attempts(&self) -> usize {
        self.open_attempts.lock().unwrap().len()
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

pub struct MockResolver {
    brokers: Vec<BrokerEndpoint>,
    failures: AtomicU32,
}

impl MockResolver {
    pub fn new(brokers: &str) -> Self {
        Self {
            brokers: brokers.split(',').map(|b| b.parse().unwrap()).collect(),
            failures: AtomicU32::new(0),
        }
    }

    pub fn failing(brokers: &str, failures: u32) -> Self {
        let resolver = Self::new(brokers);
        resolver.failures.store(failures, Ordering::SeqCst);
        resolver
    }
}

impl BrokerResolver for MockResolver {
    fn resolve(&self) -> impl Future<Output = Result<Vec<BrokerEndpoint>>> + Send {
        let result = if take_one(&self.failures) {
            Err(Error::Discovery("Framework 'kafka' not found".to_string()))
        } else {
            Ok(self.brokers.clone())
        };
        async move { result }
    }
}

pub struct MockConnector {
    harness: Arc<Harness>,
}

impl MockConnector {
    pub fn new(harness: &Arc<Harness>) -> Self {
        Self {
            harness: Arc::clone(harness),
        }
    }
}

impl Connector for MockConnector {
    type Session = MockSession;

    async fn open(&self, endpoints: &[BrokerEndpoint]) -> Result<MockSession> {
        self.harness
            .open_attempts
            .lock()
            .unwrap()
            .push((Instant::now(), endpoints.to_vec()));

        if take_one(&self.harness.open_failures) {
            return Err(Error::Connection("connection refused".to_string()));
        }

        let failed = CancellationToken::new();
        let id = {
            let mut sessions = self.harness.sessions.lock().unwrap();
            sessions.push(failed.clone());
            sessions.len() - 1
        };

        Ok(MockSession {
            id,
            harness: Arc::clone(&self.harness),
            failed,
        })
    }
}

pub struct MockSession {
    id: usize,
    harness: Arc<Harness>,
    failed: CancellationToken,
}

impl Session for MockSession {
    async fn submit(&mut self, message: &OutboundMessage) -> Result<()> {
        if self.failed.is_cancelled() {
            self.harness
                .submits_after_failure
                .fetch_add(1, Ordering::SeqCst);
            return Err(Error::Transport("session has failed".to_string()));
        }
        if take_one(&self.harness.submit_failures) {
            self.failed.cancel();
            return Err(Error::Transport("local queue rejected record".to_string()));
        }
        if take_one(&self.harness.submit_rejections) {
            return Err(Error::Rejected(format!(
                "{} byte record for {}: message too large",
                message.payload.len(),
                message.destination
            )));
        }
        if self.harness.stalling.load(Ordering::SeqCst) {
            self.harness.stalled_submits.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
        }

        self.harness
            .submitted
            .lock()
            .unwrap()
            .push((self.id, message.clone()));
        Ok(())
    }

    fn closed(&self) -> impl Future<Output = ()> + Send + '_ {
        self.failed.cancelled()
    }

    async fn close(self) {
        self.harness.closed_sessions.fetch_add(1, Ordering::SeqCst);
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub fn message(topic: &str, payload: &str) -> OutboundMessage {
    OutboundMessage::new(topic, payload.to_string())
}

/// Collects every event once all sinks are dropped.
pub async fn collect_events(mut rx: mpsc::Receiver<StatsEvent>) -> Vec<StatsEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

pub fn kinds(events: &[StatsEvent]) -> Vec<StatsKind> {
    events.iter().map(|e| e.kind).collect()
}

/// Every `MessageSent` sits inside an open session and sessions never overlap.
pub fn assert_session_bracketing(events: &[StatsEvent]) {
    let mut open = false;
    for (i, event) in events.iter().enumerate() {
        match event.kind {
            StatsKind::SessionOpened => {
                assert!(!open, "second SessionOpened at {} without SessionClosed", i);
                open = true;
            }
            StatsKind::SessionClosed => {
                assert!(open, "SessionClosed at {} without SessionOpened", i);
                open = false;
            }
            StatsKind::MessageSent => {
                assert!(open, "MessageSent at {} outside of a session", i);
            }
            StatsKind::ConnectionFailed | StatsKind::DiscoveryFailed => {
                assert!(!open, "{} at {} while a session is open", event.kind, i);
            }
            StatsKind::DeliveryFailed => {}
        }
    }
    assert!(!open, "last session was never closed");
}

pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Serves one canned HTTP response per connection, in order, and returns
/// the URL to reach it.
pub async fn serve_bodies(bodies: Vec<&'static str>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        for body in bodies {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 2048];
            let _ = socket.read(&mut request).await;

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        }
    });

    format!("http://{}/v1/connection", addr)
}
