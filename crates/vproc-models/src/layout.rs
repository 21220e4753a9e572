//! Object key layout and fixed HLS encoding parameters.

/// Local file name of the downloaded source inside a working directory.
pub const INPUT_FILE_NAME: &str = "input.mp4";

/// Thumbnail file name, both locally and in the bucket.
pub const THUMBNAIL_FILE_NAME: &str = "thumbnail.jpg";

/// Fixed HLS output parameters.
pub struct HlsEncoding;

impl HlsEncoding {
    pub const VIDEO_CODEC: &'static str = "libx264";
    pub const AUDIO_CODEC: &'static str = "aac";
    /// Target segment duration in seconds
    pub const SEGMENT_SECONDS: u32 = 10;
    /// Static, complete playlist
    pub const PLAYLIST_TYPE: &'static str = "vod";
    pub const PLAYLIST_FILE_NAME: &'static str = "playlist.m3u8";
    pub const SEGMENT_FILE_PATTERN: &'static str = "segment%03d.ts";
    /// Local directory holding the playlist and segments
    pub const OUTPUT_DIR_NAME: &'static str = "hls";
    /// Thumbnail frame position
    pub const THUMBNAIL_TIMESTAMP: &'static str = "00:00:01.000";

    /// Segment file name for a zero-based index.
    pub fn segment_file_name(index: u32) -> String {
        format!("segment{:03}.ts", index)
    }
}

/// Bucket key layout for one video's outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    video_id: String,
}

impl OutputLayout {
    pub fn new(video_id: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
        }
    }

    /// Prefix for the playlist and segments, with trailing slash.
    pub fn hls_prefix(&self) -> String {
        format!("videos/{}/hls/", self.video_id)
    }

    pub fn playlist_key(&self) -> String {
        format!("{}{}", self.hls_prefix(), HlsEncoding::PLAYLIST_FILE_NAME)
    }

    pub fn thumbnail_key(&self) -> String {
        format!("videos/{}/{}", self.video_id, THUMBNAIL_FILE_NAME)
    }
}
