//! Cloudflare R2 object store client.
//!
//! This crate provides:
//! - The [`ObjectStore`] seam used by the processing pipeline
//! - Streaming download/upload against R2 via the S3 API
//! - Bulk upload of a directory tree with content types inferred by extension

pub mod client;
pub mod error;
pub mod store;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use store::{content_type_for_path, ObjectStore, CONTENT_TYPE_JPEG};
