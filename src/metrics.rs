use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{register_int_counter, opts, Encoder, IntCounter, TextEncoder};

pub static CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "courier_connections_total",
        "Total number of accepted WebSocket connections"
    ))
    .unwrap()
});

pub static HANDSHAKE_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "courier_handshake_failures_total",
        "Total number of rejected connection handshakes"
    ))
    .unwrap()
});

pub static MESSAGES_RELAYED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "courier_messages_relayed_total",
        "Total number of messages relayed to rooms"
    ))
    .unwrap()
});

pub static FANOUT_PUBLISHES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "courier_fanout_publishes_total",
        "Total number of events published to the fan-out broker"
    ))
    .unwrap()
});

pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
