use crate::metrics;
use crate::transport::{AckEvent, AckKind};
use bytes::Bytes;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

static NEXT_CORRELATION_ID: AtomicU64 = AtomicU64::new(1);

/// Token linking a sent message to its later acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Process-wide unique id.
    pub fn next() -> Self {
        CorrelationId(NEXT_CORRELATION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        CorrelationId(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AckState {
    Pending = 0,
    Acked = 1,
    Rejected = 2,
}

impl AckState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => AckState::Acked,
            2 => AckState::Rejected,
            _ => AckState::Pending,
        }
    }
}

impl From<AckKind> for AckState {
    fn from(kind: AckKind) -> Self {
        match kind {
            AckKind::Acked => AckState::Acked,
            AckKind::Rejected => AckState::Rejected,
        }
    }
}

/// One send attempt of a serialized batch.
///
/// The ack state is written by the transport's thread and may be read from
/// any other thread.
#[derive(Debug)]
pub struct OutboundMessage {
    correlation_id: CorrelationId,
    destination: String,
    payload: Bytes,
    attempt: u32,
    created_at: Instant,
    state: AtomicU8,
}

impl OutboundMessage {
    pub fn new(destination: impl Into<String>, payload: Bytes, attempt: u32) -> Self {
        Self {
            correlation_id: CorrelationId::next(),
            destination: destination.into(),
            payload,
            attempt,
            created_at: Instant::now(),
            state: AtomicU8::new(AckState::Pending as u8),
        }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    pub fn ack_state(&self) -> AckState {
        AckState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_settled(&self) -> bool {
        self.ack_state() != AckState::Pending
    }

    /// Move out of `Pending`. Only the first settlement wins.
    fn settle(&self, state: AckState) -> bool {
        self.state
            .compare_exchange(
                AckState::Pending as u8,
                state as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub in_flight: usize,
    pub acked: u64,
    pub rejected: u64,
    pub unknown: u64,
}

/// In-flight messages by correlation id, consulted by the ack path.
///
/// Settled messages leave the map; holders of the message `Arc` keep
/// observing its final state. A rejected ack is logged and counted but
/// never resent.
///
/// A message the broker never answers stays in the map until
/// [`prune_older_than`](Self::prune_older_than) drops it, so long-running
/// publishers should prune periodically.
#[derive(Debug, Default)]
pub struct CorrelationTracker {
    in_flight: DashMap<CorrelationId, Arc<OutboundMessage>>,
    acked: AtomicU64,
    rejected: AtomicU64,
    unknown: AtomicU64,
}

impl CorrelationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, message: OutboundMessage) -> Arc<OutboundMessage> {
        let message = Arc::new(message);
        self.in_flight
            .insert(message.correlation_id(), message.clone());
        metrics::set_in_flight(self.in_flight.len());
        message
    }

    /// Forget a message that was never accepted for transmission.
    pub fn discard(&self, id: CorrelationId) -> Option<Arc<OutboundMessage>> {
        let removed = self.in_flight.remove(&id).map(|(_, message)| message);
        metrics::set_in_flight(self.in_flight.len());
        removed
    }

    pub fn get(&self, id: CorrelationId) -> Option<Arc<OutboundMessage>> {
        self.in_flight.get(&id).map(|entry| entry.value().clone())
    }

    /// Apply an acknowledgment event. Returns false when the id is unknown
    /// or the message was already settled.
    pub fn apply(&self, event: &AckEvent) -> bool {
        let Some((_, message)) = self.in_flight.remove(&event.correlation_id) else {
            self.unknown.fetch_add(1, Ordering::Relaxed);
            metrics::record_ack("unknown");
            warn!(correlation_id = %event.correlation_id, "ack for unknown message");
            return false;
        };
        metrics::set_in_flight(self.in_flight.len());

        if !message.settle(event.kind.into()) {
            warn!(correlation_id = %event.correlation_id, "message already settled");
            return false;
        }

        match event.kind {
            AckKind::Acked => {
                self.acked.fetch_add(1, Ordering::Relaxed);
                metrics::record_ack("acked");
                debug!(correlation_id = %event.correlation_id, "message acknowledged");
            }
            AckKind::Rejected => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                metrics::record_ack("rejected");
                error!(
                    correlation_id = %event.correlation_id,
                    destination = message.destination(),
                    detail = event.detail.as_deref().unwrap_or(""),
                    "message rejected by broker, not resent"
                );
            }
        }
        true
    }

    /// Drop pending messages at least `max_age` old and return them. A
    /// late ack for a pruned message counts as unknown.
    pub fn prune_older_than(&self, max_age: Duration) -> Vec<Arc<OutboundMessage>> {
        let mut pruned = Vec::new();
        self.in_flight.retain(|_, message| {
            if message.age() >= max_age {
                pruned.push(message.clone());
                false
            } else {
                true
            }
        });
        metrics::set_in_flight(self.in_flight.len());

        if !pruned.is_empty() {
            warn!(
                count = pruned.len(),
                max_age_ms = max_age.as_millis() as u64,
                "pruned unacknowledged messages"
            );
        }
        pruned
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            in_flight: self.in_flight.len(),
            acked: self.acked.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
        }
    }
}
