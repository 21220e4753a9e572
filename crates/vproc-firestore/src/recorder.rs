//! Processing status bookkeeping.
//!
//! Status records live in `video_processing/{processingId}`. The first
//! PROCESSING write for an id creates the record; every later write merges onto
//! it so `created_at`, `video_id` and `id` survive repeated deliveries.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use vproc_models::{ProcessingStatus, StatusUpdate};

use crate::client::{FirestoreClient, Precondition};
use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_status_write_failure;
use crate::types::{Document, ToFirestoreValue, Value};

pub const PROCESSING_COLLECTION: &str = "video_processing";
pub const VIDEOS_COLLECTION: &str = "videos";

/// Status bookkeeping used by the processing pipeline.
#[async_trait]
pub trait StatusRecorder: Send + Sync {
    /// Upsert the processing status record for `update.processing_id`.
    async fn update_processing_status(&self, update: &StatusUpdate) -> FirestoreResult<()>;

    /// Set the public playlist URL on an existing video record.
    async fn update_video_public_url(&self, video_id: &str, url: &str) -> FirestoreResult<()>;
}

/// How a status update lands in the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusWrite {
    /// Create the full record; fails if another writer got there first.
    Create { fields: HashMap<String, Value> },
    /// Write only the masked fields, creating the document if needed.
    Merge {
        fields: HashMap<String, Value>,
        mask: Vec<String>,
    },
}

impl StatusWrite {
    pub fn fields(&self) -> &HashMap<String, Value> {
        match self {
            StatusWrite::Create { fields } | StatusWrite::Merge { fields, .. } => fields,
        }
    }
}

/// Decide how to write `update` given the current document, if any.
pub fn plan_status_write(
    existing: Option<&Document>,
    update: &StatusUpdate,
    now: DateTime<Utc>,
) -> StatusWrite {
    let mut fields = HashMap::new();
    fields.insert("status".to_string(), update.status.as_str().to_firestore_value());
    fields.insert("progress".to_string(), update.progress.to_firestore_value());
    fields.insert("updated_at".to_string(), now.to_firestore_value());
    if let Some(message) = &update.message {
        fields.insert("message".to_string(), message.to_firestore_value());
    }

    match existing {
        Some(doc) => {
            if !doc.has_field("video_id") {
                fields.insert("video_id".to_string(), update.video_id.to_firestore_value());
            }
            merge(fields)
        }
        None if update.status == ProcessingStatus::Processing => {
            fields.insert("id".to_string(), update.processing_id.to_firestore_value());
            fields.insert("video_id".to_string(), update.video_id.to_firestore_value());
            fields.insert("created_at".to_string(), now.to_firestore_value());
            StatusWrite::Create { fields }
        }
        None => {
            fields.insert("id".to_string(), update.processing_id.to_firestore_value());
            fields.insert("video_id".to_string(), update.video_id.to_firestore_value());
            merge(fields)
        }
    }
}

fn merge(fields: HashMap<String, Value>) -> StatusWrite {
    let mut mask: Vec<String> = fields.keys().cloned().collect();
    mask.sort();
    StatusWrite::Merge { fields, mask }
}

/// [`StatusRecorder`] backed by Firestore.
#[derive(Clone)]
pub struct FirestoreStatusRecorder {
    client: FirestoreClient,
}

impl FirestoreStatusRecorder {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    async fn apply(&self, processing_id: &str, write: StatusWrite) -> FirestoreResult<()> {
        match write {
            StatusWrite::Create { fields } => {
                self.client
                    .create_document(PROCESSING_COLLECTION, processing_id, fields)
                    .await?;
            }
            StatusWrite::Merge { fields, mask } => {
                self.client
                    .update_document(PROCESSING_COLLECTION, processing_id, fields, &mask, None)
                    .await?;
            }
        }
        Ok(())
    }

    async fn write_status(&self, update: &StatusUpdate) -> FirestoreResult<()> {
        // A failed read must not look like a missing record, or created_at
        // would be rewritten.
        let existing = self
            .client
            .get_document(PROCESSING_COLLECTION, &update.processing_id)
            .await?;

        let write = plan_status_write(existing.as_ref(), update, Utc::now());
        let created = matches!(write, StatusWrite::Create { .. });

        match self.apply(&update.processing_id, write).await {
            Err(FirestoreError::AlreadyExists(_)) if created => {
                debug!(
                    processing_id = %update.processing_id,
                    "Status record created concurrently, merging instead"
                );
                let existing = self
                    .client
                    .get_document(PROCESSING_COLLECTION, &update.processing_id)
                    .await?;
                let write = plan_status_write(existing.as_ref(), update, Utc::now());
                self.apply(&update.processing_id, write).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl StatusRecorder for FirestoreStatusRecorder {
    async fn update_processing_status(&self, update: &StatusUpdate) -> FirestoreResult<()> {
        match self.write_status(update).await {
            Ok(()) => {
                info!(
                    processing_id = %update.processing_id,
                    status = %update.status,
                    progress = update.progress,
                    "Updated processing status"
                );
                Ok(())
            }
            Err(e) => {
                record_status_write_failure(update.status.as_str());
                Err(e)
            }
        }
    }

    async fn update_video_public_url(&self, video_id: &str, url: &str) -> FirestoreResult<()> {
        let mut fields = HashMap::new();
        fields.insert("video_url".to_string(), url.to_firestore_value());
        fields.insert("updated_at".to_string(), Utc::now().to_firestore_value());
        let mask = vec!["updated_at".to_string(), "video_url".to_string()];

        self.client
            .update_document(
                VIDEOS_COLLECTION,
                video_id,
                fields,
                &mask,
                Some(Precondition::Exists(true)),
            )
            .await
            .inspect_err(|e| warn!(video_id, "Failed to update video URL: {}", e))?;

        info!(video_id, url, "Updated video public URL");
        Ok(())
    }
}
