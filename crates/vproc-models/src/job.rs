//! Job descriptors delivered through the processing subscription.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for descriptor parsing.
pub type DescriptorResult<T> = Result<T, DescriptorError>;

/// Errors raised while turning a message payload into a [`JobDescriptor`].
///
/// Both variants are permanent for the delivery they came from.
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("Malformed job descriptor: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid job descriptor field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl DescriptorError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// One video to process.
///
/// Field names follow the publisher's camelCase wire format; the snake_case
/// spellings used by older publishers are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    /// Video document id, also the output key prefix
    #[serde(alias = "video_id")]
    pub video_id: String,
    /// Object key of the uploaded source file
    #[serde(alias = "video_key")]
    pub video_key: String,
    /// Processing attempt id, keys the status record
    #[serde(alias = "processing_id")]
    pub processing_id: String,
    #[serde(alias = "uploader_id")]
    pub uploader_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, alias = "is_private")]
    pub is_private: bool,
    #[serde(default, alias = "is_adult")]
    pub is_adult: bool,
    #[serde(default, alias = "is_external_cutout")]
    pub is_external_cutout: bool,
}

impl JobDescriptor {
    /// Parse and validate a raw message payload.
    pub fn from_slice(payload: &[u8]) -> DescriptorResult<Self> {
        let descriptor: Self = serde_json::from_slice(payload)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Validate the descriptor.
    ///
    /// `videoId` and `processingId` end up in local paths and object keys, so
    /// they must be a single safe path segment.
    pub fn validate(&self) -> DescriptorResult<()> {
        require_non_empty("videoId", &self.video_id)?;
        require_non_empty("videoKey", &self.video_key)?;
        require_non_empty("processingId", &self.processing_id)?;
        require_non_empty("uploaderId", &self.uploader_id)?;

        require_path_segment("videoId", &self.video_id)?;
        require_path_segment("processingId", &self.processing_id)?;

        if self.video_key.starts_with('/') {
            return Err(DescriptorError::invalid(
                "videoKey",
                "must be relative to the bucket root",
            ));
        }

        Ok(())
    }
}

fn require_non_empty(field: &'static str, value: &str) -> DescriptorResult<()> {
    if value.trim().is_empty() {
        return Err(DescriptorError::invalid(field, "must not be empty"));
    }
    Ok(())
}

fn require_path_segment(field: &'static str, value: &str) -> DescriptorResult<()> {
    if value == "." || value == ".." {
        return Err(DescriptorError::invalid(field, "must not be a relative path"));
    }
    if value
        .chars()
        .any(|c| c == '/' || c == '\\' || c.is_control())
    {
        return Err(DescriptorError::invalid(
            field,
            "must not contain path separators or control characters",
        ));
    }
    Ok(())
}
