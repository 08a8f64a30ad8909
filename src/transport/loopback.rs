use super::{AckEvent, AckSender, SendOutcome, Transport};
use crate::error::{Error, Result};
use crate::publish::CorrelationId;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// What the loopback broker reports for accepted messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Ack,
    Reject,
    /// Never report; messages stay pending.
    Silent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub destination: String,
    pub payload: Bytes,
    pub correlation_id: CorrelationId,
}

/// In-process transport that records every accepted message.
///
/// Send rejections can be scripted, and acknowledgments are pushed onto the
/// ack channel when one is attached.
pub struct LoopbackTransport {
    connected: AtomicBool,
    connect_failures: AtomicU32,
    connect_attempts: AtomicU32,
    send_attempts: AtomicU32,
    reject_remaining: AtomicU32,
    reject_all: bool,
    ack_mode: AckMode,
    acks: Mutex<Option<AckSender>>,
    attempts: Mutex<Vec<Bytes>>,
    sent: Mutex<Vec<SentMessage>>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            connect_failures: AtomicU32::new(0),
            connect_attempts: AtomicU32::new(0),
            send_attempts: AtomicU32::new(0),
            reject_remaining: AtomicU32::new(0),
            reject_all: false,
            ack_mode: AckMode::Ack,
            acks: Mutex::new(None),
            attempts: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// A transport that is already connected.
    pub fn connected() -> Self {
        let transport = Self::new();
        transport.connected.store(true, Ordering::SeqCst);
        transport
    }

    pub fn fail_connects(self, failures: u32) -> Self {
        self.connect_failures.store(failures, Ordering::SeqCst);
        self
    }

    pub fn reject_first(self, sends: u32) -> Self {
        self.reject_remaining.store(sends, Ordering::SeqCst);
        self
    }

    pub fn reject_all(mut self) -> Self {
        self.reject_all = true;
        self
    }

    pub fn with_acks(mut self, sender: AckSender, mode: AckMode) -> Self {
        self.acks = Mutex::new(Some(sender));
        self.ack_mode = mode;
        self
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn send_attempts(&self) -> u32 {
        self.send_attempts.load(Ordering::SeqCst)
    }

    /// Payloads of every send attempt, accepted or not.
    pub fn attempted_payloads(&self) -> Vec<Bytes> {
        self.attempts.lock().clone()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    /// Drop the ack channel so a listener on the other end can finish.
    pub fn close_acks(&self) {
        self.acks.lock().take();
    }

    fn should_reject(&self) -> bool {
        if self.reject_all {
            return true;
        }
        self.reject_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Transport for LoopbackTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connect(&self) -> Result<()> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(Error::Connect("loopback broker unavailable".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn send(&self, destination: &str, payload: &Bytes, correlation_id: CorrelationId) -> SendOutcome {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        self.attempts.lock().push(payload.clone());

        if !self.is_connected() {
            return SendOutcome::Rejected {
                reason: "session not connected".to_string(),
            };
        }
        if self.should_reject() {
            return SendOutcome::Rejected {
                reason: "send window full".to_string(),
            };
        }

        self.sent.lock().push(SentMessage {
            destination: destination.to_string(),
            payload: payload.clone(),
            correlation_id,
        });

        if let Some(acks) = self.acks.lock().as_ref() {
            let event = match self.ack_mode {
                AckMode::Ack => Some(AckEvent::acked(correlation_id)),
                AckMode::Reject => Some(AckEvent::rejected(correlation_id, "rejected by loopback broker")),
                AckMode::Silent => None,
            };
            if let Some(event) = event {
                // a closed channel only means nobody is listening anymore
                let _ = acks.send(event);
            }
        }
        SendOutcome::Accepted
    }
}
