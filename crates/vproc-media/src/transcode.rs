//! HLS conversion and thumbnail extraction.

use std::path::Path;

use async_trait::async_trait;
use tracing::info;
use vproc_models::HlsEncoding;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// The two media operations the pipeline needs.
#[async_trait]
pub trait TranscodeCapability: Send + Sync {
    /// Write `playlist.m3u8` and numbered `.ts` segments into `output_dir`.
    ///
    /// `output_dir` must already exist.
    async fn convert_to_hls(&self, input: &Path, output_dir: &Path) -> MediaResult<()>;

    /// Write one JPEG frame taken one second into `input`.
    async fn generate_thumbnail(&self, input: &Path, output: &Path) -> MediaResult<()>;
}

async fn ensure_input(input: &Path) -> MediaResult<()> {
    match tokio::fs::metadata(input).await {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(MediaError::InputNotFound(input.to_path_buf())),
    }
}

/// Build the single-rendition VOD HLS command.
pub fn hls_command(input: &Path, output_dir: &Path) -> FfmpegCommand {
    let segment_pattern = output_dir.join(HlsEncoding::SEGMENT_FILE_PATTERN);

    FfmpegCommand::new(input, output_dir.join(HlsEncoding::PLAYLIST_FILE_NAME))
        .video_codec(HlsEncoding::VIDEO_CODEC)
        .audio_codec(HlsEncoding::AUDIO_CODEC)
        .output_args([
            "-hls_time".to_string(),
            HlsEncoding::SEGMENT_SECONDS.to_string(),
            "-hls_playlist_type".to_string(),
            HlsEncoding::PLAYLIST_TYPE.to_string(),
            "-hls_segment_filename".to_string(),
            segment_pattern.to_string_lossy().to_string(),
        ])
}

/// Build the thumbnail command.
pub fn thumbnail_command(input: &Path, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .output_seek(HlsEncoding::THUMBNAIL_TIMESTAMP)
        .single_frame()
}

/// Transcoder backed by the ffmpeg CLI.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTranscoder {
    runner: FfmpegRunner,
}

impl FfmpegTranscoder {
    pub fn new(runner: FfmpegRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl TranscodeCapability for FfmpegTranscoder {
    async fn convert_to_hls(&self, input: &Path, output_dir: &Path) -> MediaResult<()> {
        ensure_input(input).await?;
        info!("Converting {} to HLS in {}", input.display(), output_dir.display());
        self.runner.run(&hls_command(input, output_dir)).await
    }

    async fn generate_thumbnail(&self, input: &Path, output: &Path) -> MediaResult<()> {
        ensure_input(input).await?;
        info!("Generating thumbnail {}", output.display());
        self.runner.run(&thumbnail_command(input, output)).await
    }
}

/// Transcoder that writes fixed files without invoking ffmpeg.
///
/// Deterministic double for pipeline tests.
#[derive(Debug, Clone)]
pub struct PlaceholderTranscoder {
    segment_count: u32,
    fail_hls: bool,
    fail_thumbnail: bool,
}

impl Default for PlaceholderTranscoder {
    fn default() -> Self {
        Self {
            segment_count: 2,
            fail_hls: false,
            fail_thumbnail: false,
        }
    }
}

impl PlaceholderTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_segments(mut self, count: u32) -> Self {
        self.segment_count = count;
        self
    }

    /// Make `convert_to_hls` fail after checking its input.
    pub fn failing_hls(mut self) -> Self {
        self.fail_hls = true;
        self
    }

    /// Make `generate_thumbnail` fail after checking its input.
    pub fn failing_thumbnail(mut self) -> Self {
        self.fail_thumbnail = true;
        self
    }

    fn playlist(&self) -> String {
        let mut playlist = format!(
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:{}\n#EXT-X-MEDIA-SEQUENCE:0\n#EXT-X-PLAYLIST-TYPE:VOD\n",
            HlsEncoding::SEGMENT_SECONDS
        );
        for index in 0..self.segment_count {
            playlist.push_str(&format!(
                "#EXTINF:{}.000000,\n{}\n",
                HlsEncoding::SEGMENT_SECONDS,
                HlsEncoding::segment_file_name(index)
            ));
        }
        playlist.push_str("#EXT-X-ENDLIST\n");
        playlist
    }
}

#[async_trait]
impl TranscodeCapability for PlaceholderTranscoder {
    async fn convert_to_hls(&self, input: &Path, output_dir: &Path) -> MediaResult<()> {
        ensure_input(input).await?;
        if self.fail_hls {
            return Err(MediaError::ffmpeg_failed(
                "placeholder HLS conversion failure",
                None,
                Some(1),
            ));
        }

        for index in 0..self.segment_count {
            let path = output_dir.join(HlsEncoding::segment_file_name(index));
            tokio::fs::write(&path, [0x47u8; 188]).await?;
        }
        tokio::fs::write(
            output_dir.join(HlsEncoding::PLAYLIST_FILE_NAME),
            self.playlist(),
        )
        .await?;

        Ok(())
    }

    async fn generate_thumbnail(&self, input: &Path, output: &Path) -> MediaResult<()> {
        ensure_input(input).await?;
        if self.fail_thumbnail {
            return Err(MediaError::ffmpeg_failed(
                "placeholder thumbnail failure",
                None,
                Some(1),
            ));
        }

        // SOI and EOI markers
        tokio::fs::write(output, [0xFFu8, 0xD8, 0xFF, 0xD9]).await?;
        Ok(())
    }
}
