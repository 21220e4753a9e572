//! FFmpeg CLI wrapper for HLS transcoding.
//!
//! This crate provides:
//! - FFmpeg command builder and runner with stderr capture
//! - The [`TranscodeCapability`] seam used by the processing pipeline
//! - An ffmpeg-backed implementation and a placeholder for tests

pub mod command;
pub mod error;
pub mod progress;
pub mod transcode;

pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use progress::FfmpegProgress;
pub use transcode::{
    hls_command, thumbnail_command, FfmpegTranscoder, PlaceholderTranscoder, TranscodeCapability,
};
