//! Worker error types.

use thiserror::Error;
use vproc_models::DescriptorError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid job descriptor: {0}")]
    Deserialization(#[from] DescriptorError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A fatal pipeline step failed; `message` is what was recorded as FAILED.
    #[error("Step {step} failed: {message}")]
    StepFailed { step: &'static str, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] vproc_storage::StorageError),

    #[error("Firestore error: {0}")]
    Firestore(#[from] vproc_firestore::FirestoreError),

    #[error("Media error: {0}")]
    Media(#[from] vproc_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] vproc_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn step_failed(step: &'static str, message: impl Into<String>) -> Self {
        Self::StepFailed {
            step,
            message: message.into(),
        }
    }

    /// True if the job itself is unusable and redelivery cannot help.
    pub fn is_malformed_job(&self) -> bool {
        matches!(self, WorkerError::Deserialization(_))
    }
}
