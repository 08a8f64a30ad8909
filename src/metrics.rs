use crate::error::{Error, Result};
use prometheus::{
    register_counter_vec, register_int_counter, register_int_gauge, CounterVec, Encoder,
    IntCounter, IntGauge, TextEncoder,
};

lazy_static::lazy_static! {
    // Cursor windows by outcome
    static ref CURSOR_WINDOWS: CounterVec = register_counter_vec!(
        "space_relay_cursor_windows_total",
        "Total number of cursor window fetches",
        &["status"]
    ).unwrap();

    static ref CURSOR_RECORDS: IntCounter = register_int_counter!(
        "space_relay_cursor_records_total",
        "Total number of records emitted by cursors"
    ).unwrap();

    // One per transport send call
    static ref SEND_ATTEMPTS: CounterVec = register_counter_vec!(
        "space_relay_send_attempts_total",
        "Total number of transport send attempts",
        &["outcome"]
    ).unwrap();

    static ref PUBLISH_RESULTS: CounterVec = register_counter_vec!(
        "space_relay_publish_total",
        "Total number of batch publish calls",
        &["result"]
    ).unwrap();

    static ref ACK_EVENTS: CounterVec = register_counter_vec!(
        "space_relay_ack_events_total",
        "Acknowledgment events received from the transport",
        &["kind"]
    ).unwrap();

    static ref IN_FLIGHT: IntGauge = register_int_gauge!(
        "space_relay_in_flight_messages",
        "Messages accepted by the transport and awaiting acknowledgment"
    ).unwrap();
}

/// `status` is `ok`, `empty` or `error`.
pub fn record_window(status: &str) {
    CURSOR_WINDOWS.with_label_values(&[status]).inc();
}

pub fn record_emitted() {
    CURSOR_RECORDS.inc();
}

pub fn record_send_attempt(outcome: &str) {
    SEND_ATTEMPTS.with_label_values(&[outcome]).inc();
}

pub fn record_publish(result: &str) {
    PUBLISH_RESULTS.with_label_values(&[result]).inc();
}

pub fn record_ack(kind: &str) {
    ACK_EVENTS.with_label_values(&[kind]).inc();
}

pub fn set_in_flight(count: usize) {
    IN_FLIGHT.set(count as i64);
}

/// Export all metrics in Prometheus text format
pub fn gather_text() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| Error::InvalidOperation {
            reason: format!("Failed to encode metrics: {}", e),
        })?;

    String::from_utf8(buffer).map_err(|e| Error::InvalidOperation {
        reason: format!("Failed to convert metrics to string: {}", e),
    })
}
