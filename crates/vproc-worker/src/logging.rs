//! Structured job logging utilities.
//!
//! Keeps the processing id, video id and operation on every job log line.

use tracing::{error, info, warn, Span};
use vproc_models::JobDescriptor;

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    processing_id: String,
    video_id: String,
    operation: String,
}

impl JobLogger {
    /// Create a new job logger for a descriptor and operation.
    pub fn new(job: &JobDescriptor, operation: &str) -> Self {
        Self {
            processing_id: job.processing_id.clone(),
            video_id: job.video_id.clone(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            processing_id = %self.processing_id,
            video_id = %self.video_id,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            processing_id = %self.processing_id,
            video_id = %self.video_id,
            operation = %self.operation,
            "Job progress: {}", message
        );
    }

    /// Log a step failure that does not abort the job.
    pub fn log_warning(&self, step: &str, message: &str) {
        warn!(
            processing_id = %self.processing_id,
            video_id = %self.video_id,
            operation = %self.operation,
            step,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, step: &str, message: &str) {
        error!(
            processing_id = %self.processing_id,
            video_id = %self.video_id,
            operation = %self.operation,
            step,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            processing_id = %self.processing_id,
            video_id = %self.video_id,
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    pub fn processing_id(&self) -> &str {
        &self.processing_id
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            processing_id = %self.processing_id,
            video_id = %self.video_id,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let job = JobDescriptor::from_slice(
            br#"{"videoId":"v1","videoKey":"uploads/v1.mp4","processingId":"p1","uploaderId":"u1"}"#,
        )
        .unwrap();
        let logger = JobLogger::new(&job, "process_video");

        assert_eq!(logger.processing_id(), "p1");
        assert_eq!(logger.video_id(), "v1");
        assert_eq!(logger.operation(), "process_video");
    }
}
