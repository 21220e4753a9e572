//! Per-job working directory.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use vproc_models::{HlsEncoding, INPUT_FILE_NAME, THUMBNAIL_FILE_NAME};

/// Working directory owned by one processing attempt.
///
/// [`WorkDir::remove`] deletes it off the async threads. If that never runs
/// (a panic or an aborted task), dropping the guard removes it in place.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    removed: bool,
}

impl WorkDir {
    /// Directory name for a processing id.
    pub fn dir_name(processing_id: &str) -> String {
        format!("video_{}", processing_id)
    }

    /// Create a fresh `video_<processingId>` directory under `root`.
    ///
    /// Leftovers from an earlier attempt with the same id are removed first.
    pub async fn create(root: &Path, processing_id: &str) -> io::Result<Self> {
        let path = root.join(Self::dir_name(processing_id));

        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => debug!("Removed stale work dir {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        tokio::fs::create_dir_all(&path).await?;

        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Local path of the downloaded source.
    pub fn input_path(&self) -> PathBuf {
        self.path.join(INPUT_FILE_NAME)
    }

    /// Directory receiving the playlist and segments.
    pub fn hls_dir(&self) -> PathBuf {
        self.path.join(HlsEncoding::OUTPUT_DIR_NAME)
    }

    pub fn thumbnail_path(&self) -> PathBuf {
        self.path.join(THUMBNAIL_FILE_NAME)
    }

    /// Remove the directory on the blocking pool.
    pub async fn remove(mut self) {
        self.removed = true;
        log_removal(&self.path, tokio::fs::remove_dir_all(&self.path).await);
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if !self.removed {
            log_removal(&self.path, std::fs::remove_dir_all(&self.path));
        }
    }
}

fn log_removal(path: &Path, result: io::Result<()>) {
    match result {
        Ok(()) => debug!("Removed work dir {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove work dir {}: {}", path.display(), e),
    }
}
