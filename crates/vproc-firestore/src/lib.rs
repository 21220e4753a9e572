//! Firestore REST API client.
//!
//! This crate provides:
//! - A REST client with token caching, retry and emulator support
//! - The [`StatusRecorder`] used by the processing pipeline
//! - Write planning for `video_processing` status records

pub mod client;
pub mod error;
pub mod metrics;
pub mod recorder;
pub mod types;

pub use client::{FirestoreClient, FirestoreConfig, Precondition};
pub use error::{FirestoreError, FirestoreResult};
pub use recorder::{
    plan_status_write, FirestoreStatusRecorder, StatusRecorder, StatusWrite,
    PROCESSING_COLLECTION, VIDEOS_COLLECTION,
};
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};
