//! Firestore metrics collection.

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Total Firestore requests by operation and status.
    pub const REQUESTS_TOTAL: &str = "firestore_requests_total";

    /// Request latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "firestore_latency_seconds";

    /// Status writes that failed after retries, by status value.
    pub const STATUS_WRITE_FAILURES_TOTAL: &str = "firestore_status_write_failures_total";
}

/// Record metrics for a completed Firestore request.
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

/// Record a status write that could not be persisted.
pub fn record_status_write_failure(status: &str) {
    counter!(
        names::STATUS_WRITE_FAILURES_TOTAL,
        "status" => status.to_string()
    )
    .increment(1);
}
