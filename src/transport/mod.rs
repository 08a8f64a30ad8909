//! Durable queue transport seam.
//!
//! A transport accepts a payload synchronously and reports delivery later,
//! on a thread it owns, through a channel of [`AckEvent`]s.

mod loopback;

pub use loopback::{AckMode, LoopbackTransport, SentMessage};

use crate::config::ConnectRetries;
use crate::error::{Error, Result};
use crate::publish::{CorrelationId, CorrelationTracker};
use crate::retry::RetryPolicy;
use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

/// Synchronous result of handing a message to the transport. `Accepted`
/// only means accepted for transmission, not delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted,
    Rejected { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    Acked,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckEvent {
    pub correlation_id: CorrelationId,
    pub kind: AckKind,
    pub detail: Option<String>,
}

impl AckEvent {
    pub fn acked(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            kind: AckKind::Acked,
            detail: None,
        }
    }

    pub fn rejected(correlation_id: CorrelationId, detail: impl Into<String>) -> Self {
        Self {
            correlation_id,
            kind: AckKind::Rejected,
            detail: Some(detail.into()),
        }
    }
}

pub type AckSender = Sender<AckEvent>;
pub type AckReceiver = Receiver<AckEvent>;

pub fn ack_channel() -> (AckSender, AckReceiver) {
    channel::unbounded()
}

pub trait Transport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// One connection attempt.
    fn connect(&self) -> Result<()>;

    /// Hand a persistent message to the queue `destination`.
    fn send(&self, destination: &str, payload: &Bytes, correlation_id: CorrelationId)
        -> SendOutcome;
}

/// Connect, retrying according to `retries`. `ConnectRetries::Forever`
/// keeps trying until the transport comes up.
pub fn connect_with_policy(
    transport: &dyn Transport,
    retries: ConnectRetries,
    policy: RetryPolicy,
) -> Result<()> {
    if transport.is_connected() {
        return Ok(());
    }
    let policy = RetryPolicy {
        max_attempts: retries.max_attempts(),
        ..policy
    };
    policy.execute(|| transport.connect())?;
    info!("transport session connected");
    Ok(())
}

/// Applies acknowledgment events to a [`CorrelationTracker`] on a
/// dedicated thread until every sender is dropped.
pub struct AckListener {
    handle: JoinHandle<u64>,
}

impl AckListener {
    pub fn spawn(events: AckReceiver, tracker: Arc<CorrelationTracker>) -> Result<Self> {
        let handle = thread::Builder::new()
            .name("ack-listener".to_string())
            .spawn(move || {
                let mut applied = 0u64;
                for event in events.iter() {
                    if tracker.apply(&event) {
                        applied += 1;
                    }
                }
                debug!(applied, "ack channel closed");
                applied
            })?;
        Ok(Self { handle })
    }

    /// Wait for the channel to close. Returns the number of events that
    /// settled a message.
    pub fn join(self) -> Result<u64> {
        self.handle
            .join()
            .map_err(|_| Error::InvalidOperation {
                reason: "ack listener panicked".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::{AckState, OutboundMessage};
    use std::time::Duration;

    #[test]
    fn test_connect_with_bounded_retries() {
        let transport = LoopbackTransport::new().fail_connects(2);
        let policy = RetryPolicy::fixed(Duration::from_millis(1));

        connect_with_policy(&transport, ConnectRetries::Bounded(2), policy.clone()).unwrap();
        assert!(transport.is_connected());
        assert_eq!(transport.connect_attempts(), 3);
    }

    #[test]
    fn test_connect_gives_up() {
        let transport = LoopbackTransport::new().fail_connects(5);
        let policy = RetryPolicy::fixed(Duration::from_millis(1));

        let result = connect_with_policy(&transport, ConnectRetries::Bounded(1), policy);
        assert!(matches!(result, Err(Error::Connect(_))));
        assert_eq!(transport.connect_attempts(), 2);
    }

    #[test]
    fn test_connect_forever() {
        let transport = LoopbackTransport::new().fail_connects(4);
        let policy = RetryPolicy::fixed(Duration::from_millis(1));
        connect_with_policy(&transport, ConnectRetries::Forever, policy).unwrap();
        assert_eq!(transport.connect_attempts(), 5);
    }

    #[test]
    fn test_listener_applies_events() {
        let tracker = Arc::new(CorrelationTracker::new());
        let (tx, rx) = ack_channel();
        let listener = AckListener::spawn(rx, tracker.clone()).unwrap();

        let first = tracker.register(OutboundMessage::new("q", Bytes::new(), 1));
        let second = tracker.register(OutboundMessage::new("q", Bytes::new(), 1));
        tx.send(AckEvent::acked(first.correlation_id())).unwrap();
        tx.send(AckEvent::rejected(second.correlation_id(), "nope")).unwrap();
        drop(tx);

        assert_eq!(listener.join().unwrap(), 2);
        assert_eq!(first.ack_state(), AckState::Acked);
        assert_eq!(second.ack_state(), AckState::Rejected);
    }
}
