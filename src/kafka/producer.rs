use super::context::{is_session_ending, RelayContext};
use crate::config::KafkaConfig;
use crate::session::{Connector, Session};
use crate::stats::{StatsKind, StatsSink};
use crate::types::{join_endpoints, BrokerEndpoint, OutboundMessage};
use crate::{Error, Result};
use rdkafka::config::RDKafkaLogLevel;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{BaseRecord, Producer, ThreadedProducer};
use rdkafka::ClientConfig;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const QUEUE_FULL_WAIT: Duration = Duration::from_millis(50);

/// Opens [`KafkaSession`]s with a fixed producer configuration.
pub struct KafkaConnector {
    config: KafkaConfig,
    stats: StatsSink,
}

impl KafkaConnector {
    pub fn new(config: &KafkaConfig, stats: StatsSink) -> Self {
        Self {
            config: config.clone(),
            stats,
        }
    }

    /// Throughput-oriented settings: batches are compressed and held for
    /// `flush_ms` before being sent.
    pub fn client_config(&self, endpoints: &[BrokerEndpoint]) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", join_endpoints(endpoints))
            .set("client.id", &self.config.client_id)
            .set("acks", self.config.acks())
            .set("compression.type", self.config.compression())
            .set("linger.ms", self.config.flush_ms.to_string());

        if self.config.verbose {
            client_config
                .set("debug", "broker,topic,msg")
                .set_log_level(RDKafkaLogLevel::Debug);
        }

        client_config
    }
}

impl Connector for KafkaConnector {
    type Session = KafkaSession;

    #[instrument(skip_all, fields(brokers = %join_endpoints(endpoints)))]
    async fn open(&self, endpoints: &[BrokerEndpoint]) -> Result<KafkaSession> {
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let failed = CancellationToken::new();
        let context = RelayContext::new(errors_tx, failed.clone());

        let producer: ThreadedProducer<RelayContext> = self
            .client_config(endpoints)
            .create_with_context(context)
            .map_err(|e| Error::Connection(format!("producer creation failed: {}", e)))?;

        let drain = tokio::spawn(drain_errors(errors_rx, self.stats.clone()));

        // librdkafka connects lazily; a metadata round trip proves a broker answers.
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let producer = tokio::task::spawn_blocking(move || {
            let fetched = producer.client().fetch_metadata(None, timeout);
            fetched.map(|metadata| {
                debug!(brokers = metadata.brokers().len(), "Cluster metadata fetched");
                producer
            })
        })
        .await
        .map_err(|e| Error::Connection(format!("metadata task failed: {}", e)))?
        .map_err(|e| {
            Error::Connection(format!(
                "producer creation against brokers {} failed: {}",
                join_endpoints(endpoints),
                e
            ))
        })?;

        info!("Kafka session established");

        Ok(KafkaSession {
            producer,
            failed,
            drain,
            close_timeout: Duration::from_millis(self.config.close_timeout_ms),
        })
    }
}

/// One live producer. Dropping it without [`Session::close`] discards
/// whatever is still buffered.
pub struct KafkaSession {
    producer: ThreadedProducer<RelayContext>,
    failed: CancellationToken,
    drain: JoinHandle<()>,
    close_timeout: Duration,
}

impl Session for KafkaSession {
    async fn submit(&mut self, message: &OutboundMessage) -> Result<()> {
        loop {
            if self.failed.is_cancelled() {
                return Err(Error::Transport("session has failed".to_string()));
            }

            let record: BaseRecord<'_, (), [u8]> =
                BaseRecord::to(&message.destination).payload(&message.payload[..]);
            let result = self.producer.send(record).map_err(|(e, _)| e);

            match result {
                Ok(()) => return Ok(()),
                Err(KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull)) => {
                    debug!(topic = %message.destination, "Producer queue full, waiting for room");
                    tokio::time::sleep(QUEUE_FULL_WAIT).await;
                }
                Err(e) => {
                    let error = enqueue_error(e, message);
                    if matches!(error, Error::Transport(_)) {
                        self.failed.cancel();
                    }
                    return Err(error);
                }
            }
        }
    }

    fn closed(&self) -> impl Future<Output = ()> + Send + '_ {
        self.failed.cancelled()
    }

    async fn close(self) {
        let KafkaSession {
            producer,
            drain,
            close_timeout,
            ..
        } = self;

        let flushed = tokio::task::spawn_blocking(move || {
            let result = producer.flush(close_timeout);
            // Dropping joins the polling thread; keep it off the runtime.
            drop(producer);
            result
        })
        .await;

        match flushed {
            Ok(Ok(())) => info!("Kafka session closed"),
            Ok(Err(e)) => warn!(error = %e, "Failed to shut down producer cleanly"),
            Err(e) => warn!(error = %e, "Producer shutdown task failed"),
        }

        // The error stream ends once the producer context is gone.
        let _ = drain.await;
    }
}

/// Maps a synchronous produce failure other than `QueueFull`.
///
/// Size limits, unknown partitions and the like only concern this record and
/// become [`Error::Rejected`]; a fatal client state ends the session.
pub(crate) fn enqueue_error(error: KafkaError, message: &OutboundMessage) -> Error {
    if is_session_ending(&error) {
        Error::Transport(format!("enqueue to {} failed: {}", message.destination, error))
    } else {
        Error::Rejected(format!(
            "{} byte record for {}: {}",
            message.payload.len(),
            message.destination,
            error
        ))
    }
}

/// Logs every asynchronous transport failure of one session. These are
/// informational; they never fail an already accepted submit.
pub(crate) async fn drain_errors(mut errors: mpsc::UnboundedReceiver<Error>, stats: StatsSink) {
    while let Some(error) = errors.recv().await {
        warn!(error = %error, "Failed to write to Kafka");
        stats.emit(StatsKind::DeliveryFailed, error.to_string());
    }
    debug!("Session error stream closed");
}
