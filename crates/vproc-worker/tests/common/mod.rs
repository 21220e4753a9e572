//! In-memory collaborators shared by the worker integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use vproc_firestore::{FirestoreError, FirestoreResult, StatusRecorder};
use vproc_media::{MediaResult, PlaceholderTranscoder, TranscodeCapability};
use vproc_models::{JobDescriptor, StatusUpdate};
use vproc_queue::{QueueResult, ReceivedMessage, Subscription, SubscriptionConfig};
use vproc_storage::{ObjectStore, StorageError, StorageResult};
use vproc_worker::{VideoPipeline, WorkerConfig};

pub const SOURCE_KEY: &str = "uploads/v1.mp4";

pub fn descriptor() -> JobDescriptor {
    JobDescriptor::from_slice(&payload()).unwrap()
}

pub fn payload() -> Vec<u8> {
    br#"{"videoId":"v1","videoKey":"uploads/v1.mp4","processingId":"p1","uploaderId":"u1"}"#
        .to_vec()
}

/// Stored object: bytes and content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Bucket kept in memory.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    /// Uploads to keys containing this fail
    fail_put_containing: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn with_source() -> Self {
        let store = Self::default();
        store.insert(SOURCE_KEY, b"source video bytes", "video/mp4");
        store
    }

    pub fn insert(&self, key: &str, bytes: &[u8], content_type: &str) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
    }

    pub fn fail_puts_containing(&self, needle: &str) {
        *self.fail_put_containing.lock().unwrap() = Some(needle.to_string());
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Keys except the source upload.
    pub fn output_keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|key| key.as_str() != SOURCE_KEY)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str, dest: &Path) -> StorageResult<()> {
        let object = self.object(key).ok_or_else(|| StorageError::not_found(key))?;
        tokio::fs::write(dest, &object.bytes).await?;
        Ok(())
    }

    async fn put(&self, src: &Path, key: &str, content_type: &str) -> StorageResult<()> {
        let failing = self.fail_put_containing.lock().unwrap().clone();
        if failing.is_some_and(|needle| key.contains(&needle)) {
            return Err(StorageError::upload_failed(format!("rejected {}", key)));
        }
        let bytes = tokio::fs::read(src).await?;
        self.insert(key, &bytes, content_type);
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://media.acct.r2.cloudflarestorage.com/{}", key)
    }
}

/// Status recorder keeping every write in order.
#[derive(Default)]
pub struct RecordingRecorder {
    updates: Mutex<Vec<StatusUpdate>>,
    urls: Mutex<Vec<(String, String)>>,
    fail_status_writes: bool,
    fail_url_writes: bool,
}

impl RecordingRecorder {
    pub fn failing_status_writes() -> Self {
        Self {
            fail_status_writes: true,
            ..Default::default()
        }
    }

    pub fn failing_url_writes() -> Self {
        Self {
            fail_url_writes: true,
            ..Default::default()
        }
    }

    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates.lock().unwrap().clone()
    }

    /// (status, progress) pairs in write order.
    pub fn trail(&self) -> Vec<(String, u8)> {
        self.updates()
            .iter()
            .map(|u| (u.status.as_str().to_string(), u.progress))
            .collect()
    }

    pub fn urls(&self) -> Vec<(String, String)> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusRecorder for RecordingRecorder {
    async fn update_processing_status(&self, update: &StatusUpdate) -> FirestoreResult<()> {
        self.updates.lock().unwrap().push(update.clone());
        if self.fail_status_writes {
            return Err(FirestoreError::request_failed("status store unavailable"));
        }
        Ok(())
    }

    async fn update_video_public_url(&self, video_id: &str, url: &str) -> FirestoreResult<()> {
        if self.fail_url_writes {
            return Err(FirestoreError::not_found(format!("videos/{}", video_id)));
        }
        self.urls
            .lock()
            .unwrap()
            .push((video_id.to_string(), url.to_string()));
        Ok(())
    }
}

/// Transcoder that panics mid-conversion, after writing a partial segment.
pub struct PanicTranscoder;

#[async_trait]
impl TranscodeCapability for PanicTranscoder {
    async fn convert_to_hls(&self, _input: &Path, output_dir: &Path) -> MediaResult<()> {
        tokio::fs::write(output_dir.join("segment000.ts"), b"partial").await?;
        panic!("encoder crashed");
    }

    async fn generate_thumbnail(&self, _input: &Path, _output: &Path) -> MediaResult<()> {
        Ok(())
    }
}

/// Transcoder that never finishes, for shutdown tests.
pub struct StuckTranscoder;

#[async_trait]
impl TranscodeCapability for StuckTranscoder {
    async fn convert_to_hls(&self, _input: &Path, _output_dir: &Path) -> MediaResult<()> {
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn generate_thumbnail(&self, _input: &Path, _output: &Path) -> MediaResult<()> {
        Ok(())
    }
}

/// Pipeline wiring over the given fakes, with a scratch work root.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub recorder: Arc<RecordingRecorder>,
    pub pipeline: Arc<VideoPipeline>,
    pub work_root: tempfile::TempDir,
}

impl Harness {
    pub fn new(
        store: MemoryStore,
        transcoder: Arc<dyn TranscodeCapability>,
        recorder: RecordingRecorder,
    ) -> Self {
        let work_root = tempfile::tempdir().unwrap();
        let store = Arc::new(store);
        let recorder = Arc::new(recorder);
        let pipeline = Arc::new(VideoPipeline::new(
            store.clone(),
            transcoder,
            recorder.clone(),
            work_root.path(),
        ));

        Self {
            store,
            recorder,
            pipeline,
            work_root,
        }
    }

    pub fn placeholder() -> Self {
        Self::new(
            MemoryStore::with_source(),
            Arc::new(PlaceholderTranscoder::new()),
            RecordingRecorder::default(),
        )
    }

    /// Entries left under the work root.
    pub fn work_root_entries(&self) -> Vec<String> {
        std::fs::read_dir(self.work_root.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect()
    }
}

/// Subscription fed from a local queue.
#[derive(Default)]
pub struct FakeSubscription {
    pub config: SubscriptionConfig,
    pending: Mutex<VecDeque<ReceivedMessage>>,
    acks: Mutex<Vec<String>>,
    nacks: Mutex<Vec<String>>,
    extensions: Mutex<Vec<(String, u32)>>,
}

impl FakeSubscription {
    pub fn with_messages(messages: Vec<ReceivedMessage>) -> Self {
        Self {
            pending: Mutex::new(messages.into()),
            ..Default::default()
        }
    }

    pub fn push(endpoint: &str) -> Self {
        Self {
            config: SubscriptionConfig {
                push_endpoint: Some(endpoint.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_ack_deadline(seconds: u32) -> Self {
        Self {
            config: SubscriptionConfig {
                ack_deadline_seconds: Some(seconds),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn acks(&self) -> Vec<String> {
        self.acks.lock().unwrap().clone()
    }

    pub fn nacks(&self) -> Vec<String> {
        self.nacks.lock().unwrap().clone()
    }

    pub fn extensions(&self) -> Vec<(String, u32)> {
        self.extensions.lock().unwrap().clone()
    }

    pub fn settled(&self) -> usize {
        self.acks().len() + self.nacks().len()
    }
}

#[async_trait]
impl Subscription for FakeSubscription {
    fn name(&self) -> &str {
        "projects/test/subscriptions/video-jobs"
    }

    async fn fetch_config(&self) -> QueueResult<SubscriptionConfig> {
        Ok(self.config.clone())
    }

    async fn pull(&self, max_messages: u32) -> QueueResult<Vec<ReceivedMessage>> {
        let pulled: Vec<ReceivedMessage> = {
            let mut pending = self.pending.lock().unwrap();
            let count = pending.len().min(max_messages as usize);
            pending.drain(..count).collect()
        };

        if pulled.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(pulled)
    }

    async fn ack(&self, ack_id: &str) -> QueueResult<()> {
        self.acks.lock().unwrap().push(ack_id.to_string());
        Ok(())
    }

    async fn nack(&self, ack_id: &str) -> QueueResult<()> {
        self.nacks.lock().unwrap().push(ack_id.to_string());
        Ok(())
    }

    async fn extend_deadline(&self, ack_id: &str, seconds: u32) -> QueueResult<()> {
        self.extensions
            .lock()
            .unwrap()
            .push((ack_id.to_string(), seconds));
        Ok(())
    }
}

/// Config with short lease timings for listener tests.
pub fn test_config(work_root: &Path) -> WorkerConfig {
    WorkerConfig {
        work_dir: work_root.to_path_buf(),
        lease_extension: Duration::from_secs(60),
        lease_heartbeat: Duration::from_millis(20),
        max_lease: Duration::from_secs(3600),
        pull_backoff: Duration::from_millis(10),
        ..Default::default()
    }
}
