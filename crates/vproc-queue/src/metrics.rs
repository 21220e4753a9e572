//! Pub/Sub metrics collection.

use metrics::{counter, histogram};

pub mod names {
    /// Total Pub/Sub requests by operation and status.
    pub const REQUESTS_TOTAL: &str = "pubsub_requests_total";

    /// Request latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "pubsub_latency_seconds";

    /// Messages received from pull responses.
    pub const MESSAGES_RECEIVED_TOTAL: &str = "pubsub_messages_received_total";
}

/// Record metrics for a completed Pub/Sub request.
pub fn record_request(operation: &str, status: u16, latency_ms: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "operation" => operation.to_string()
    )
    .record(latency_ms / 1000.0);
}

pub fn record_messages_received(count: usize) {
    counter!(names::MESSAGES_RECEIVED_TOTAL).increment(count as u64);
}
