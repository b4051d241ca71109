use crate::Error;
use rdkafka::config::RDKafkaLogLevel;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{DeliveryResult, ProducerContext};
use rdkafka::{ClientContext, Message};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Producer context shared with librdkafka's background threads.
///
/// Delivery failures and client errors are forwarded into the session's
/// error stream. Errors that leave the client without a usable cluster
/// connection also trip `failed`, which ends the session.
pub struct RelayContext {
    errors: mpsc::UnboundedSender<Error>,
    failed: CancellationToken,
}

impl RelayContext {
    pub fn new(errors: mpsc::UnboundedSender<Error>, failed: CancellationToken) -> Self {
        Self { errors, failed }
    }

    fn forward(&self, error: Error) {
        // The drain task only goes away after the producer is dropped.
        let _ = self.errors.send(error);
    }
}

pub(crate) fn is_session_ending(error: &KafkaError) -> bool {
    matches!(
        error.rdkafka_error_code(),
        Some(RDKafkaErrorCode::AllBrokersDown) | Some(RDKafkaErrorCode::Fatal)
    )
}

impl ClientContext for RelayContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        match level {
            RDKafkaLogLevel::Emerg
            | RDKafkaLogLevel::Alert
            | RDKafkaLogLevel::Critical
            | RDKafkaLogLevel::Error => error!(target: "rdkafka", facility = fac, "{}", log_message),
            RDKafkaLogLevel::Warning => warn!(target: "rdkafka", facility = fac, "{}", log_message),
            RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => {
                info!(target: "rdkafka", facility = fac, "{}", log_message)
            }
            RDKafkaLogLevel::Debug => debug!(target: "rdkafka", facility = fac, "{}", log_message),
        }
    }

    fn error(&self, error: KafkaError, reason: &str) {
        if is_session_ending(&error) {
            warn!(error = %error, reason, "Kafka client lost the cluster, ending session");
            self.failed.cancel();
        }
        self.forward(Error::Transport(format!("{}: {}", error, reason)));
    }
}

impl ProducerContext for RelayContext {
    type DeliveryOpaque = ();

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, _delivery_opaque: Self::DeliveryOpaque) {
        if let Err((error, message)) = delivery_result {
            self.forward(Error::Transport(format!(
                "delivery to {} failed: {}",
                message.topic(),
                error
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_is_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let failed = CancellationToken::new();
        let context = RelayContext::new(tx, failed.clone());

        context.error(
            KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut),
            "timed out",
        );

        assert!(matches!(rx.try_recv(), Ok(Error::Transport(_))));
        assert!(!failed.is_cancelled());
    }

    #[test]
    fn test_all_brokers_down_ends_session() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let failed = CancellationToken::new();
        let context = RelayContext::new(tx, failed.clone());

        context.error(
            KafkaError::Global(RDKafkaErrorCode::AllBrokersDown),
            "3/3 brokers are down",
        );

        assert!(failed.is_cancelled());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_forward_after_drain_exit_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let context = RelayContext::new(tx, CancellationToken::new());

        context.error(KafkaError::Global(RDKafkaErrorCode::BrokerTransportFailure), "");
    }
}
