//! HLS transcoding worker.
//!
//! Pulls job descriptors from a Pub/Sub subscription, converts the source
//! video to a VOD HLS playlist with a thumbnail, uploads the outputs to R2 and
//! records progress in Firestore.

pub mod config;
pub mod error;
pub mod health;
pub mod listener;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod workdir;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use listener::{MessageDisposition, QueueListener};
pub use logging::JobLogger;
pub use pipeline::{PipelineStep, ProcessingSummary, StepOutcome, VideoPipeline};
pub use workdir::WorkDir;
