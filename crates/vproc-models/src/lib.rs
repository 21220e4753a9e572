//! Shared data models for the video processing worker.
//!
//! This crate provides Serde-serializable types for:
//! - Job descriptors received from the queue
//! - Processing status records
//! - Object key layout and HLS encoding constants

pub mod job;
pub mod layout;
pub mod status;

// Re-export common types
pub use job::{DescriptorError, DescriptorResult, JobDescriptor};
pub use layout::{HlsEncoding, OutputLayout, INPUT_FILE_NAME, THUMBNAIL_FILE_NAME};
pub use status::{ProcessingStatus, StatusUpdate};
