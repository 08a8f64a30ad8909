mod common;

use common::{order_batch, order_item, order_registry, ORDER_TYPE};
use space_relay::publish::{AckState, CorrelationTracker, PublishPipeline};
use space_relay::serializer::decode_payload;
use space_relay::transport::{ack_channel, AckListener, AckMode, LoopbackTransport};
use space_relay::{ChangeBatch, ChangeBatchSerializer, Error, Operation};
use std::sync::Arc;

fn pipeline(
    transport: Arc<LoopbackTransport>,
    tracker: Arc<CorrelationTracker>,
    max_attempts: u32,
) -> PublishPipeline {
    PublishPipeline::new(
        ChangeBatchSerializer::new(order_registry()),
        transport,
        tracker,
        "sales-space",
        max_attempts,
    )
    .unwrap()
}

#[test]
fn test_acknowledged_batches_settle() {
    let tracker = Arc::new(CorrelationTracker::new());
    let (acks, events) = ack_channel();
    let listener = AckListener::spawn(events, tracker.clone()).unwrap();
    let transport = Arc::new(LoopbackTransport::connected().with_acks(acks, AckMode::Ack));
    let pipeline = pipeline(transport.clone(), tracker.clone(), 3);

    let receipts: Vec<_> = (1..=5)
        .map(|n| pipeline.publish(&order_batch(n)).unwrap())
        .collect();

    transport.close_acks();
    assert_eq!(listener.join().unwrap(), 5);

    assert!(receipts.iter().all(|r| r.ack_state() == AckState::Acked));
    let stats = tracker.stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.acked, 5);
    assert_eq!(transport.sent().len(), 5);
}

#[test]
fn test_broker_rejection_is_not_resent() {
    let tracker = Arc::new(CorrelationTracker::new());
    let (acks, events) = ack_channel();
    let listener = AckListener::spawn(events, tracker.clone()).unwrap();
    let transport = Arc::new(LoopbackTransport::connected().with_acks(acks, AckMode::Reject));
    let pipeline = pipeline(transport.clone(), tracker.clone(), 3);

    // accepted for transmission, so publish itself succeeds
    let receipt = pipeline.publish(&order_batch(2)).unwrap();
    assert_eq!(receipt.attempts, 1);

    transport.close_acks();
    listener.join().unwrap();

    assert_eq!(receipt.ack_state(), AckState::Rejected);
    assert_eq!(transport.send_attempts(), 1);
    assert_eq!(tracker.stats().rejected, 1);
}

#[test]
fn test_silent_broker_leaves_message_pending() {
    let tracker = Arc::new(CorrelationTracker::new());
    let (acks, _events) = ack_channel();
    let transport = Arc::new(LoopbackTransport::connected().with_acks(acks, AckMode::Silent));
    let pipeline = pipeline(transport, tracker.clone(), 3);

    let receipt = pipeline.publish(&order_batch(1)).unwrap();
    assert_eq!(receipt.ack_state(), AckState::Pending);
    assert_eq!(tracker.in_flight(), 1);
    assert!(tracker.get(receipt.correlation_id()).is_some());
}

#[test]
fn test_retries_resend_identical_payload() {
    let tracker = Arc::new(CorrelationTracker::new());
    let transport = Arc::new(LoopbackTransport::connected().reject_first(2));
    let pipeline = pipeline(transport.clone(), tracker, 5);

    let batch = order_batch(3);
    let receipt = pipeline.publish(&batch).unwrap();
    assert_eq!(receipt.attempts, 3);
    assert_eq!(receipt.message.attempt(), 3);

    let payloads = transport.attempted_payloads();
    assert_eq!(payloads.len(), 3);
    assert!(payloads.iter().all(|p| *p == payloads[0]));

    let entries = decode_payload(&payloads[0]).unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.type_name == "Order" && e.op == "Write"));
}

#[test]
fn test_exhausted_attempts() {
    let tracker = Arc::new(CorrelationTracker::new());
    let transport = Arc::new(LoopbackTransport::connected().reject_all());
    let pipeline = pipeline(transport.clone(), tracker.clone(), 4);

    let err = pipeline.publish(&order_batch(2)).unwrap_err();
    match err {
        Error::RetryExhausted { attempts, last } => {
            assert_eq!(attempts, 4);
            assert!(matches!(*last, Error::TransportSend { .. }));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(transport.send_attempts(), 4);
    assert!(transport.sent().is_empty());
    assert_eq!(tracker.in_flight(), 0);
}

#[test]
fn test_partial_batch_is_all_or_nothing() {
    let tracker = Arc::new(CorrelationTracker::new());
    let transport = Arc::new(LoopbackTransport::connected());
    let pipeline = pipeline(transport.clone(), tracker, 3);

    let mut items = vec![order_item(Operation::Write, 1)];
    items.push(space_relay::ChangeItem::new(Operation::Remove, ORDER_TYPE).with_field("Id", "Int64", 2));
    let err = pipeline.publish(&ChangeBatch::new(items)).unwrap_err();

    assert!(matches!(err, Error::Serialization { .. }));
    assert_eq!(transport.send_attempts(), 0);
}

#[test]
fn test_empty_batch_published() {
    let tracker = Arc::new(CorrelationTracker::new());
    let transport = Arc::new(LoopbackTransport::connected());
    let pipeline = pipeline(transport.clone(), tracker, 3);

    pipeline.publish(&ChangeBatch::default()).unwrap();
    assert_eq!(&transport.sent()[0].payload[..], b"[]");
}
