//! Worker metrics and the Prometheus recorder.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_COMPLETED_TOTAL: &str = "vproc_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vproc_jobs_failed_total";
    pub const JOB_DURATION_SECONDS: &str = "vproc_job_duration_seconds";
    pub const STEP_DURATION_SECONDS: &str = "vproc_step_duration_seconds";
    pub const STEP_FAILURES_TOTAL: &str = "vproc_step_failures_total";
    pub const MESSAGES_ACKED_TOTAL: &str = "vproc_messages_acked_total";
    pub const MESSAGES_NACKED_TOTAL: &str = "vproc_messages_nacked_total";
    pub const LEASE_EXTENSIONS_TOTAL: &str = "vproc_lease_extensions_total";
}

/// Install the global Prometheus recorder.
pub fn init_metrics() -> WorkerResult<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| WorkerError::config(format!("failed to install metrics recorder: {}", e)))
}

pub fn record_job_completed(duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => "completed").record(duration_secs);
}

pub fn record_job_failed(step: &'static str, duration_secs: f64) {
    counter!(names::JOBS_FAILED_TOTAL, "step" => step).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => "failed").record(duration_secs);
}

pub fn record_step(step: &'static str, duration_secs: f64) {
    histogram!(names::STEP_DURATION_SECONDS, "step" => step).record(duration_secs);
}

pub fn record_step_failure(step: &'static str, severity: &'static str) {
    counter!(names::STEP_FAILURES_TOTAL, "step" => step, "severity" => severity).increment(1);
}

pub fn record_ack() {
    counter!(names::MESSAGES_ACKED_TOTAL).increment(1);
}

pub fn record_nack(reason: &'static str) {
    counter!(names::MESSAGES_NACKED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_lease_extension(ok: bool) {
    let result = if ok { "ok" } else { "error" };
    counter!(names::LEASE_EXTENSIONS_TOTAL, "result" => result).increment(1);
}
