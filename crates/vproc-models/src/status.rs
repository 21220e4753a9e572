//! Processing status models.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    /// Source uploaded, not yet picked up by a worker
    #[default]
    Uploaded,
    /// A worker is processing the video
    Processing,
    /// Outputs uploaded
    Completed,
    /// A fatal step failed
    Failed,
}

impl ProcessingStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Uploaded => "UPLOADED",
            ProcessingStatus::Processing => "PROCESSING",
            ProcessingStatus::Completed => "COMPLETED",
            ProcessingStatus::Failed => "FAILED",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One status write for a processing attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub processing_id: String,
    pub video_id: String,
    pub status: ProcessingStatus,
    /// Progress percentage (0-100)
    pub progress: u8,
    pub message: Option<String>,
}

impl StatusUpdate {
    /// Create a new update. Progress is clamped to 100.
    pub fn new(
        processing_id: impl Into<String>,
        video_id: impl Into<String>,
        status: ProcessingStatus,
        progress: u8,
    ) -> Self {
        Self {
            processing_id: processing_id.into(),
            video_id: video_id.into(),
            status,
            progress: progress.min(100),
            message: None,
        }
    }

    /// Attach a human-readable message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
