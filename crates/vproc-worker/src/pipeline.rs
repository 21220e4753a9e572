//! Processing pipeline for one job descriptor.
//!
//! Steps run strictly in sequence. Each step settles into a [`StepOutcome`]:
//! fatal failures record FAILED with the step's progress snapshot and abort,
//! soft failures are logged and processing continues. Status writes are
//! best effort and never change the result.

use std::fmt::Display;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, Instrument};
use vproc_firestore::StatusRecorder;
use vproc_media::TranscodeCapability;
use vproc_models::{JobDescriptor, OutputLayout, ProcessingStatus, StatusUpdate};
use vproc_storage::{ObjectStore, CONTENT_TYPE_JPEG};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::workdir::WorkDir;

/// Message recorded with the final COMPLETED status.
pub const COMPLETED_MESSAGE: &str = "Video processing completed successfully";

/// The steps of one processing attempt, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    CreateWorkDir,
    Download,
    CreateOutputDir,
    ConvertToHls,
    GenerateThumbnail,
    UploadHls,
    UploadThumbnail,
    UpdateVideoUrl,
}

impl PipelineStep {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineStep::CreateWorkDir => "create_work_dir",
            PipelineStep::Download => "download",
            PipelineStep::CreateOutputDir => "create_output_dir",
            PipelineStep::ConvertToHls => "convert_to_hls",
            PipelineStep::GenerateThumbnail => "generate_thumbnail",
            PipelineStep::UploadHls => "upload_hls",
            PipelineStep::UploadThumbnail => "upload_thumbnail",
            PipelineStep::UpdateVideoUrl => "update_video_url",
        }
    }

    /// Whether a failure of this step aborts the job.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PipelineStep::GenerateThumbnail
                | PipelineStep::UploadThumbnail
                | PipelineStep::UpdateVideoUrl
        )
    }

    /// Progress recorded with FAILED when this step fails.
    pub fn failure_progress(&self) -> u8 {
        match self {
            PipelineStep::CreateWorkDir => 0,
            PipelineStep::Download => 10,
            PipelineStep::CreateOutputDir => 25,
            PipelineStep::ConvertToHls => 40,
            PipelineStep::GenerateThumbnail => 70,
            PipelineStep::UploadHls
            | PipelineStep::UploadThumbnail
            | PipelineStep::UpdateVideoUrl => 80,
        }
    }

    /// Prefix of the failure message; the error text follows after `": "`.
    pub fn failure_description(&self) -> &'static str {
        match self {
            PipelineStep::CreateWorkDir => "Failed to create temp directory",
            PipelineStep::Download => "Failed to download video",
            PipelineStep::CreateOutputDir => "Failed to create output directory",
            PipelineStep::ConvertToHls => "Failed to convert to HLS",
            PipelineStep::GenerateThumbnail => "Failed to generate thumbnail",
            PipelineStep::UploadHls => "Failed to upload HLS files",
            PipelineStep::UploadThumbnail => "Failed to upload thumbnail",
            PipelineStep::UpdateVideoUrl => "Failed to update video URL",
        }
    }

    fn severity(&self) -> &'static str {
        if self.is_fatal() {
            "fatal"
        } else {
            "soft"
        }
    }
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How a step settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome<T> {
    Success(T),
    /// Failure that aborts the job
    Fatal(String),
    /// Failure that is logged and skipped
    Soft(String),
}

impl<T> StepOutcome<T> {
    /// Classify a step's result by the step's severity.
    pub fn from_result<E: Display>(step: PipelineStep, result: Result<T, E>) -> Self {
        match result {
            Ok(value) => StepOutcome::Success(value),
            Err(e) if step.is_fatal() => StepOutcome::Fatal(e.to_string()),
            Err(e) => StepOutcome::Soft(e.to_string()),
        }
    }
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingSummary {
    /// Playlist and segment keys, in upload order
    pub hls_keys: Vec<String>,
    /// Set only if the thumbnail was generated and uploaded
    pub thumbnail_key: Option<String>,
    pub playlist_url: String,
}

/// Runs one job descriptor through download, transcode and upload.
pub struct VideoPipeline {
    store: Arc<dyn ObjectStore>,
    transcoder: Arc<dyn TranscodeCapability>,
    recorder: Arc<dyn StatusRecorder>,
    work_root: PathBuf,
}

impl VideoPipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        transcoder: Arc<dyn TranscodeCapability>,
        recorder: Arc<dyn StatusRecorder>,
        work_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            transcoder,
            recorder,
            work_root: work_root.into(),
        }
    }

    pub fn work_root(&self) -> &std::path::Path {
        &self.work_root
    }

    /// Process one job. `Err` means a fatal step failed and FAILED was recorded.
    pub async fn process(&self, job: &JobDescriptor) -> WorkerResult<ProcessingSummary> {
        let logger = JobLogger::new(job, "process_video");
        let span = logger.create_span();
        let started = Instant::now();

        let result = self.run(job, &logger).instrument(span).await;

        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(_) => metrics::record_job_completed(elapsed),
            Err(WorkerError::StepFailed { step, .. }) => metrics::record_job_failed(*step, elapsed),
            Err(_) => metrics::record_job_failed("unknown", elapsed),
        }
        result
    }

    async fn run(&self, job: &JobDescriptor, logger: &JobLogger) -> WorkerResult<ProcessingSummary> {
        logger.log_start(&format!("source {}", job.video_key));

        self.record(job, ProcessingStatus::Processing, 10, None).await;

        let work_dir = self
            .run_step(job, logger, PipelineStep::CreateWorkDir, async {
                WorkDir::create(&self.work_root, &job.processing_id).await
            })
            .await
            .and_then(|dir| required(PipelineStep::CreateWorkDir, dir))?;

        let result = self.run_in(job, logger, &work_dir).await;
        work_dir.remove().await;
        result
    }

    /// Steps that run inside the work dir, from download on.
    async fn run_in(
        &self,
        job: &JobDescriptor,
        logger: &JobLogger,
        work_dir: &WorkDir,
    ) -> WorkerResult<ProcessingSummary> {
        let layout = OutputLayout::new(&job.video_id);
        let input = work_dir.input_path();
        self.run_step(job, logger, PipelineStep::Download, async {
            self.store.get(&job.video_key, &input).await
        })
        .await?;

        self.record(job, ProcessingStatus::Processing, 25, None).await;

        let hls_dir = work_dir.hls_dir();
        self.run_step(job, logger, PipelineStep::CreateOutputDir, async {
            tokio::fs::create_dir_all(&hls_dir).await
        })
        .await?;

        self.run_step(job, logger, PipelineStep::ConvertToHls, async {
            self.transcoder.convert_to_hls(&input, &hls_dir).await
        })
        .await?;

        self.record(job, ProcessingStatus::Processing, 70, None).await;

        let thumbnail = work_dir.thumbnail_path();
        let thumbnail_generated = self
            .run_step(job, logger, PipelineStep::GenerateThumbnail, async {
                self.transcoder.generate_thumbnail(&input, &thumbnail).await
            })
            .await?
            .is_some();

        self.record(job, ProcessingStatus::Processing, 80, None).await;

        let hls_keys = self
            .run_step(job, logger, PipelineStep::UploadHls, async {
                self.store.put_dir(&hls_dir, &layout.hls_prefix()).await
            })
            .await
            .and_then(|keys| required(PipelineStep::UploadHls, keys))?;

        let thumbnail_key = if thumbnail_generated {
            let key = layout.thumbnail_key();
            let uploaded = self
                .run_step(job, logger, PipelineStep::UploadThumbnail, async {
                    self.store.put(&thumbnail, &key, CONTENT_TYPE_JPEG).await
                })
                .await?;
            uploaded.map(|()| key)
        } else {
            None
        };

        let playlist_url = self.store.public_url(&layout.playlist_key());
        self.run_step(job, logger, PipelineStep::UpdateVideoUrl, async {
            self.recorder
                .update_video_public_url(&job.video_id, &playlist_url)
                .await
        })
        .await?;

        self.record(job, ProcessingStatus::Completed, 100, Some(COMPLETED_MESSAGE.to_string()))
            .await;
        logger.log_completion(&format!("{} objects uploaded", hls_keys.len()));

        Ok(ProcessingSummary {
            hls_keys,
            thumbnail_key,
            playlist_url,
        })
    }

    /// Run one step and settle its outcome.
    ///
    /// `Ok(None)` is a soft failure; fatal failures come back as
    /// [`WorkerError::StepFailed`] after FAILED has been recorded.
    async fn run_step<T, E, F>(
        &self,
        job: &JobDescriptor,
        logger: &JobLogger,
        step: PipelineStep,
        fut: F,
    ) -> WorkerResult<Option<T>>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let started = Instant::now();
        let outcome = StepOutcome::from_result(step, fut.await);
        metrics::record_step(step.name(), started.elapsed().as_secs_f64());

        match outcome {
            StepOutcome::Success(value) => {
                logger.log_progress(&format!("{} done", step));
                Ok(Some(value))
            }
            StepOutcome::Soft(reason) => {
                metrics::record_step_failure(step.name(), step.severity());
                logger.log_warning(step.name(), &format!("{}: {}", step.failure_description(), reason));
                Ok(None)
            }
            StepOutcome::Fatal(reason) => {
                metrics::record_step_failure(step.name(), step.severity());
                let message = format!("{}: {}", step.failure_description(), reason);
                logger.log_error(step.name(), &message);
                self.record(
                    job,
                    ProcessingStatus::Failed,
                    step.failure_progress(),
                    Some(message.clone()),
                )
                .await;
                Err(WorkerError::step_failed(step.name(), message))
            }
        }
    }

    /// Write a status update; failures are logged and swallowed.
    async fn record(
        &self,
        job: &JobDescriptor,
        status: ProcessingStatus,
        progress: u8,
        message: Option<String>,
    ) {
        let mut update = StatusUpdate::new(&job.processing_id, &job.video_id, status, progress);
        if let Some(message) = message {
            update = update.with_message(message);
        }

        if let Err(e) = self.recorder.update_processing_status(&update).await {
            error!(
                processing_id = %job.processing_id,
                status = %status,
                progress,
                "Failed to record status: {}", e
            );
        }
    }
}

/// Fatal steps only settle as `Some`; this turns the shared runner's
/// `Option` back into the value.
fn required<T>(step: PipelineStep, value: Option<T>) -> WorkerResult<T> {
    value.ok_or_else(|| WorkerError::step_failed(step.name(), "step settled without output"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failure_snapshots() {
        assert_eq!(PipelineStep::CreateWorkDir.failure_progress(), 0);
        assert_eq!(PipelineStep::Download.failure_progress(), 10);
        assert_eq!(PipelineStep::CreateOutputDir.failure_progress(), 25);
        assert_eq!(PipelineStep::ConvertToHls.failure_progress(), 40);
        assert_eq!(PipelineStep::UploadHls.failure_progress(), 80);
    }

    #[test]
    fn test_severity_by_step() {
        let fatal = [
            PipelineStep::CreateWorkDir,
            PipelineStep::Download,
            PipelineStep::CreateOutputDir,
            PipelineStep::ConvertToHls,
            PipelineStep::UploadHls,
        ];
        assert!(fatal.iter().all(PipelineStep::is_fatal));
        assert!(!PipelineStep::GenerateThumbnail.is_fatal());
        assert!(!PipelineStep::UploadThumbnail.is_fatal());
        assert!(!PipelineStep::UpdateVideoUrl.is_fatal());
    }

    #[test]
    fn test_outcome_classification() {
        let ok: Result<u8, String> = Ok(1);
        assert_eq!(StepOutcome::from_result(PipelineStep::Download, ok), StepOutcome::Success(1));

        let err: Result<(), &str> = Err("boom");
        assert_eq!(
            StepOutcome::from_result(PipelineStep::Download, err),
            StepOutcome::Fatal("boom".to_string())
        );
        assert_eq!(
            StepOutcome::from_result(PipelineStep::GenerateThumbnail, err),
            StepOutcome::Soft("boom".to_string())
        );
    }

    #[test]
    fn test_failure_descriptions() {
        assert_eq!(
            PipelineStep::CreateWorkDir.failure_description(),
            "Failed to create temp directory"
        );
        assert_eq!(PipelineStep::UploadHls.failure_description(), "Failed to upload HLS files");
    }
}
