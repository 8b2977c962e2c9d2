//! Process-wide Prometheus metrics

use crate::error::{AppError, AppResult};
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static::lazy_static! {
    /// Messages persisted through send (text and attachments)
    pub static ref MESSAGES_SENT: IntCounter = register_int_counter!(
        "messaging_messages_sent_total",
        "Messages persisted by the message store"
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Realtime frames by outcome (delivered/dropped)
    pub static ref REALTIME_FRAMES: IntCounterVec = register_int_counter_vec!(
        "messaging_realtime_frames_total",
        "Realtime frames handed to connections",
        &["outcome"]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Live websocket connections in this instance
    pub static ref WS_CONNECTIONS: IntGauge = register_int_gauge!(
        "messaging_ws_connections",
        "Live websocket connections"
    ).expect("Prometheus metrics registration should succeed at startup");
}

pub fn record_frames(delivered: usize, dropped: usize) {
    if delivered > 0 {
        REALTIME_FRAMES
            .with_label_values(&["delivered"])
            .inc_by(delivered as u64);
    }
    if dropped > 0 {
        REALTIME_FRAMES
            .with_label_values(&["dropped"])
            .inc_by(dropped as u64);
    }
}

/// Text exposition of the default registry
pub fn render() -> AppResult<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| AppError::Internal(format!("metrics encoding: {e}")))?;
    String::from_utf8(buffer).map_err(|e| AppError::Internal(format!("metrics encoding: {e}")))
}
