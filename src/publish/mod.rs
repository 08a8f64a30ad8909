//! Reliable batch publishing.
//!
//! [`PublishPipeline::publish`] serializes a batch and hands it to the
//! transport, retrying synchronous rejections immediately up to the attempt
//! budget. Delivery is confirmed later and out of band: the transport's ack
//! events flip the state of the [`OutboundMessage`] returned in the receipt.

mod correlation;

pub use correlation::{
    AckState, CorrelationId, CorrelationTracker, OutboundMessage, TrackerStats,
};

use crate::change::ChangeBatch;
use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::schema::SchemaProvider;
use crate::serializer::ChangeBatchSerializer;
use crate::transport::{SendOutcome, Transport};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// An accepted send. Acceptance is not delivery; watch
/// [`OutboundMessage::ack_state`] for that.
#[derive(Debug, Clone)]
pub struct PublishReceipt {
    pub message: Arc<OutboundMessage>,
    pub attempts: u32,
}

impl PublishReceipt {
    pub fn correlation_id(&self) -> CorrelationId {
        self.message.correlation_id()
    }

    pub fn ack_state(&self) -> AckState {
        self.message.ack_state()
    }
}

pub struct PublishPipeline {
    serializer: ChangeBatchSerializer,
    transport: Arc<dyn Transport>,
    tracker: Arc<CorrelationTracker>,
    destination: String,
    max_attempts: u32,
}

impl PublishPipeline {
    /// The transport must already be connected.
    pub fn new(
        serializer: ChangeBatchSerializer,
        transport: Arc<dyn Transport>,
        tracker: Arc<CorrelationTracker>,
        destination: impl Into<String>,
        max_attempts: u32,
    ) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::Config("max attempts must be at least 1".to_string()));
        }
        if !transport.is_connected() {
            return Err(Error::NotConnected);
        }
        Ok(Self {
            serializer,
            transport,
            tracker,
            destination: destination.into(),
            max_attempts,
        })
    }

    pub fn from_config(
        config: &RelayConfig,
        schemas: Arc<dyn SchemaProvider>,
        transport: Arc<dyn Transport>,
        tracker: Arc<CorrelationTracker>,
    ) -> Result<Self> {
        config.validate()?;
        Self::new(
            ChangeBatchSerializer::new(schemas),
            transport,
            tracker,
            config.queue_name(),
            config.max_attempts,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn tracker(&self) -> &Arc<CorrelationTracker> {
        &self.tracker
    }

    /// Publish the whole batch as one message.
    ///
    /// Every attempt re-serializes the full batch and sends it under a fresh
    /// correlation id. Serialization errors are returned at once since a
    /// retry would fail the same way. After `max_attempts` rejected sends
    /// the last rejection is returned inside [`Error::RetryExhausted`].
    pub fn publish(&self, batch: &ChangeBatch) -> Result<PublishReceipt> {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            let payload = match self.serializer.serialize(batch) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(items = batch.len(), error = %e, "can't serialize batch");
                    metrics::record_publish("serialization_error");
                    return Err(e);
                }
            };

            let message = self
                .tracker
                .register(OutboundMessage::new(&self.destination, payload, attempt));
            let correlation_id = message.correlation_id();

            match self
                .transport
                .send(&self.destination, message.payload(), correlation_id)
            {
                SendOutcome::Accepted => {
                    metrics::record_send_attempt("accepted");
                    metrics::record_publish("accepted");
                    debug!(
                        %correlation_id,
                        attempt,
                        items = batch.len(),
                        bytes = message.payload().len(),
                        "batch accepted for transmission"
                    );
                    return Ok(PublishReceipt {
                        message,
                        attempts: attempt,
                    });
                }
                SendOutcome::Rejected { reason } => {
                    self.tracker.discard(correlation_id);
                    metrics::record_send_attempt("rejected");
                    warn!(
                        %correlation_id,
                        attempt,
                        max_attempts = self.max_attempts,
                        %reason,
                        "message sending failed"
                    );
                    last_error = Some(Error::TransportSend { reason });
                }
            }
        }

        metrics::record_publish("retry_exhausted");
        error!(
            attempts = self.max_attempts,
            destination = %self.destination,
            "can't publish batch, attempts exhausted"
        );
        Err(Error::RetryExhausted {
            attempts: self.max_attempts,
            last: Box::new(last_error.unwrap_or(Error::TransportSend {
                reason: "no send attempted".to_string(),
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{ChangeItem, Operation};
    use crate::schema::{EntitySchema, FieldDescriptor, SchemaRegistry};
    use crate::transport::LoopbackTransport;

    fn serializer() -> ChangeBatchSerializer {
        let registry = SchemaRegistry::from_schemas([EntitySchema::new("Acme.Order", "Id")
            .field(FieldDescriptor::new("Id", "Int64"))])
        .unwrap();
        ChangeBatchSerializer::new(Arc::new(registry))
    }

    fn batch() -> ChangeBatch {
        (1..=2)
            .map(|id| ChangeItem::new(Operation::Write, "Acme.Order").with_field("Id", "Int64", id))
            .collect()
    }

    fn pipeline(transport: Arc<LoopbackTransport>, max_attempts: u32) -> PublishPipeline {
        PublishPipeline::new(
            serializer(),
            transport,
            Arc::new(CorrelationTracker::new()),
            "orders",
            max_attempts,
        )
        .unwrap()
    }

    #[test]
    fn test_accepted_first_time() {
        let transport = Arc::new(LoopbackTransport::connected());
        let receipt = pipeline(transport.clone(), 3).publish(&batch()).unwrap();

        assert_eq!(receipt.attempts, 1);
        assert_eq!(receipt.ack_state(), AckState::Pending);
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].destination, "orders");
        assert_eq!(sent[0].correlation_id, receipt.correlation_id());
    }

    #[test]
    fn test_rejections_then_success() {
        let transport = Arc::new(LoopbackTransport::connected().reject_first(2));
        let pipeline = pipeline(transport.clone(), 3);
        let receipt = pipeline.publish(&batch()).unwrap();

        assert_eq!(receipt.attempts, 3);
        assert_eq!(transport.send_attempts(), 3);
        let payloads = transport.attempted_payloads();
        assert!(payloads.windows(2).all(|w| w[0] == w[1]));
        // only the accepted attempt is still tracked
        assert_eq!(pipeline.tracker().in_flight(), 1);
    }

    #[test]
    fn test_retry_exhausted() {
        let transport = Arc::new(LoopbackTransport::connected().reject_all());
        let pipeline = pipeline(transport.clone(), 3);

        let err = pipeline.publish(&batch()).unwrap_err();
        assert!(matches!(err, Error::RetryExhausted { attempts: 3, .. }));
        assert!(matches!(err.root_cause(), Error::TransportSend { .. }));
        assert_eq!(transport.send_attempts(), 3);
        assert!(transport.sent().is_empty());
        assert_eq!(pipeline.tracker().in_flight(), 0);
    }

    #[test]
    fn test_serialization_error_not_retried() {
        let transport = Arc::new(LoopbackTransport::connected());
        let bad = ChangeBatch::new(vec![ChangeItem::new(Operation::Write, "Acme.Order")]);

        let err = pipeline(transport.clone(), 3).publish(&bad).unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
        assert_eq!(transport.send_attempts(), 0);
    }

    #[test]
    fn test_requires_connected_transport() {
        let result = PublishPipeline::new(
            serializer(),
            Arc::new(LoopbackTransport::new()),
            Arc::new(CorrelationTracker::new()),
            "orders",
            3,
        );
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let result = PublishPipeline::new(
            serializer(),
            Arc::new(LoopbackTransport::connected()),
            Arc::new(CorrelationTracker::new()),
            "orders",
            0,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
