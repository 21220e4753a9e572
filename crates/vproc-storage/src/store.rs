//! Object store seam and bulk directory upload.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};

pub const CONTENT_TYPE_M3U8: &str = "application/x-mpegURL";
pub const CONTENT_TYPE_TS: &str = "video/MP2T";
pub const CONTENT_TYPE_JPEG: &str = "image/jpeg";
pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";

/// Content type used for bulk uploads, inferred from the file extension.
pub fn content_type_for_path(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("m3u8") => CONTENT_TYPE_M3U8,
        Some("ts") => CONTENT_TYPE_TS,
        _ => CONTENT_TYPE_OCTET_STREAM,
    }
}

/// Byte-for-byte object transfer between local files and a bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream the object at `key` into `dest`, replacing any existing file.
    async fn get(&self, key: &str, dest: &Path) -> StorageResult<()>;

    /// Stream `src` to `key`, overwriting any existing object.
    async fn put(&self, src: &Path, key: &str, content_type: &str) -> StorageResult<()>;

    /// Public URL of an object.
    fn public_url(&self, key: &str) -> String;

    /// Upload every file below `root` to `prefix` + relative path.
    ///
    /// Files go up in sorted path order. The first failure aborts the walk;
    /// objects uploaded before it stay in the bucket. Returns the uploaded keys.
    async fn put_dir(&self, root: &Path, prefix: &str) -> StorageResult<Vec<String>> {
        let files = list_files(root).await?;
        let mut uploaded = Vec::with_capacity(files.len());

        for file in files {
            let relative = relative_key(root, &file)?;
            let key = format!("{}{}", prefix, relative);

            self.put(&file, &key, content_type_for_path(&file))
                .await
                .map_err(|e| StorageError::upload_failed(format!("{}: {}", relative, e)))?;
            uploaded.push(key);
        }

        info!(count = uploaded.len(), prefix, "Uploaded directory");
        Ok(uploaded)
    }
}

/// All regular files below `root`, sorted by path.
pub async fn list_files(root: &Path) -> StorageResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    debug!(root = %root.display(), count = files.len(), "Listed files");
    Ok(files)
}

/// Relative path of `file` under `root`, joined with `/` whatever the platform.
fn relative_key(root: &Path, file: &Path) -> StorageResult<String> {
    let relative = file
        .strip_prefix(root)
        .map_err(|_| StorageError::InvalidKey(file.display().to_string()))?;

    let mut parts = Vec::new();
    for component in relative.components() {
        let part = component
            .as_os_str()
            .to_str()
            .ok_or_else(|| StorageError::InvalidKey(relative.display().to_string()))?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Records puts; fails on the configured file name.
    #[derive(Default)]
    struct RecordingStore {
        puts: Mutex<Vec<(String, String)>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn get(&self, key: &str, _dest: &Path) -> StorageResult<()> {
            Err(StorageError::not_found(key))
        }

        async fn put(&self, src: &Path, key: &str, content_type: &str) -> StorageResult<()> {
            if self.fail_on.is_some_and(|name| src.ends_with(name)) {
                return Err(StorageError::upload_failed("connection reset"));
            }
            self.puts
                .lock()
                .unwrap()
                .push((key.to_string(), content_type.to_string()));
            Ok(())
        }

        fn public_url(&self, key: &str) -> String {
            format!("https://example.test/{}", key)
        }
    }

    fn write_hls_tree(root: &Path) {
        std::fs::write(root.join("playlist.m3u8"), "#EXTM3U\n").unwrap();
        std::fs::write(root.join("segment000.ts"), b"ts0").unwrap();
        std::fs::write(root.join("segment001.ts"), b"ts1").unwrap();
        std::fs::create_dir(root.join("extra")).unwrap();
        std::fs::write(root.join("extra").join("notes.txt"), "x").unwrap();
    }

    #[test]
    fn test_content_type_for_path() {
        assert_eq!(content_type_for_path(Path::new("a/playlist.m3u8")), "application/x-mpegURL");
        assert_eq!(content_type_for_path(Path::new("segment000.ts")), "video/MP2T");
        assert_eq!(content_type_for_path(Path::new("thumb.jpg")), "application/octet-stream");
        assert_eq!(content_type_for_path(Path::new("no_extension")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_put_dir_derives_keys_and_content_types() {
        let dir = tempfile::tempdir().unwrap();
        write_hls_tree(dir.path());

        let store = RecordingStore::default();
        let keys = store.put_dir(dir.path(), "videos/v1/hls/").await.unwrap();

        assert_eq!(
            keys,
            vec![
                "videos/v1/hls/extra/notes.txt",
                "videos/v1/hls/playlist.m3u8",
                "videos/v1/hls/segment000.ts",
                "videos/v1/hls/segment001.ts",
            ]
        );

        let puts = store.puts.lock().unwrap();
        let content_type = |key: &str| {
            puts.iter()
                .find(|(k, _)| k == key)
                .map(|(_, ct)| ct.clone())
                .unwrap()
        };
        assert_eq!(content_type("videos/v1/hls/playlist.m3u8"), "application/x-mpegURL");
        assert_eq!(content_type("videos/v1/hls/segment000.ts"), "video/MP2T");
        assert_eq!(content_type("videos/v1/hls/extra/notes.txt"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_put_dir_aborts_on_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        write_hls_tree(dir.path());

        let store = RecordingStore {
            fail_on: Some("segment000.ts"),
            ..Default::default()
        };
        let err = store.put_dir(dir.path(), "videos/v1/hls/").await.unwrap_err();

        assert!(matches!(err, StorageError::UploadFailed(ref msg) if msg.contains("segment000.ts")));
        let puts = store.puts.lock().unwrap();
        let keys: Vec<&str> = puts.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["videos/v1/hls/extra/notes.txt", "videos/v1/hls/playlist.m3u8"]);
    }

    #[tokio::test]
    async fn test_put_dir_missing_root_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordingStore::default();
        let err = store
            .put_dir(&dir.path().join("missing"), "videos/v1/hls/")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
    }
}
