//! R2 client implementation.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;

const DEFAULT_STORAGE_HOST: &str = "r2.cloudflarestorage.com";

/// Configuration for R2 client.
#[derive(Debug, Clone)]
pub struct R2Config {
    /// Cloudflare account ID
    pub account_id: String,
    /// R2 endpoint URL (S3 API endpoint)
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Region (usually "auto" for R2)
    pub region: String,
    /// Host used when building public object URLs
    pub storage_host: String,
}

impl R2Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let account_id = required_env("R2_ACCOUNT_ID")?;
        let storage_host = optional_env("R2_STORAGE_HOST")
            .unwrap_or_else(|| DEFAULT_STORAGE_HOST.to_string());
        let endpoint_url = optional_env("R2_ENDPOINT_URL")
            .unwrap_or_else(|| format!("https://{}.{}", account_id, DEFAULT_STORAGE_HOST));

        Ok(Self {
            endpoint_url,
            access_key_id: required_env("R2_ACCESS_KEY_ID")?,
            secret_access_key: required_env("R2_SECRET_ACCESS_KEY")?,
            bucket_name: required_env("R2_BUCKET_NAME")?,
            region: optional_env("R2_REGION").unwrap_or_else(|| "auto".to_string()),
            storage_host,
            account_id,
        })
    }

    /// Public URL of `key`: `https://{bucket}.{account}.{host}/{key}`.
    pub fn public_url(&self, key: &str) -> String {
        format!(
            "https://{}.{}.{}/{}",
            self.bucket_name, self.account_id, self.storage_host, key
        )
    }
}

fn required_env(name: &str) -> StorageResult<String> {
    optional_env(name).ok_or_else(|| StorageError::config_error(format!("{} not set", name)))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Cloudflare R2 storage client.
#[derive(Clone)]
pub struct R2Client {
    client: Client,
    config: R2Config,
}

impl R2Client {
    /// Create a new R2 client from configuration.
    pub fn new(config: R2Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "r2",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            config,
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(R2Config::from_env()?))
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket_name
    }

    /// Upload a file to R2.
    pub async fn upload_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()> {
        debug!("Uploading {} to {}", path.display(), key);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", path.display(), e)))?;

        self.client
            .put_object()
            .bucket(&self.config.bucket_name)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(DisplayErrorContext(&e).to_string()))?;

        info!("Uploaded {} to {}", path.display(), key);
        Ok(())
    }

    /// Download object to a file, chunk by chunk.
    ///
    /// A partially written file is removed on failure.
    pub async fn download_file(&self, key: &str, path: &Path) -> StorageResult<()> {
        debug!("Downloading {} to {}", key, path.display());

        let result = self.stream_to_file(key, path).await;
        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove partial download {}: {}", path.display(), e);
                }
            }
        }
        let bytes = result?;

        info!(bytes, "Downloaded {} to {}", key, path.display());
        Ok(())
    }

    async fn stream_to_file(&self, key: &str, path: &Path) -> StorageResult<u64> {
        let response = self
            .client
            .get_object()
            .bucket(&self.config.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|err| err.is_no_such_key()) {
                    StorageError::not_found(key)
                } else {
                    StorageError::download_failed(DisplayErrorContext(&e).to_string())
                }
            })?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(path).await?;
        let mut body = response.body;
        let mut written = 0u64;

        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| StorageError::download_failed(format!("{}: {}", key, e)))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }

    /// Check connectivity to R2 by performing a head bucket operation.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.config.bucket_name)
            .send()
            .await
            .map_err(|e| {
                StorageError::AwsSdk(format!(
                    "R2 connectivity check failed: {}",
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for R2Client {
    async fn get(&self, key: &str, dest: &Path) -> StorageResult<()> {
        self.download_file(key, dest).await
    }

    async fn put(&self, src: &Path, key: &str, content_type: &str) -> StorageResult<()> {
        self.upload_file(src, key, content_type).await
    }

    fn public_url(&self, key: &str) -> String {
        self.config.public_url(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn set_required_env() {
        std::env::set_var("R2_ACCOUNT_ID", "acct");
        std::env::set_var("R2_ACCESS_KEY_ID", "key");
        std::env::set_var("R2_SECRET_ACCESS_KEY", "secret");
        std::env::set_var("R2_BUCKET_NAME", "media");
        std::env::remove_var("R2_ENDPOINT_URL");
        std::env::remove_var("R2_STORAGE_HOST");
        std::env::remove_var("R2_REGION");
    }

    #[test]
    #[serial]
    fn test_config_defaults_from_account_id() {
        set_required_env();
        let config = R2Config::from_env().unwrap();

        assert_eq!(config.endpoint_url, "https://acct.r2.cloudflarestorage.com");
        assert_eq!(config.region, "auto");
        assert_eq!(config.storage_host, "r2.cloudflarestorage.com");
    }

    #[test]
    #[serial]
    fn test_config_missing_bucket_is_error() {
        set_required_env();
        std::env::set_var("R2_BUCKET_NAME", "");
        let err = R2Config::from_env().unwrap_err();
        assert!(matches!(err, StorageError::ConfigError(ref msg) if msg.contains("R2_BUCKET_NAME")));
    }

    #[test]
    #[serial]
    fn test_config_endpoint_override() {
        set_required_env();
        std::env::set_var("R2_ENDPOINT_URL", "http://localhost:9000");
        let config = R2Config::from_env().unwrap();
        assert_eq!(config.endpoint_url, "http://localhost:9000");
        std::env::remove_var("R2_ENDPOINT_URL");
    }

    #[test]
    #[serial]
    fn test_public_playlist_url() {
        set_required_env();
        let config = R2Config::from_env().unwrap();
        assert_eq!(
            config.public_url("videos/v1/hls/playlist.m3u8"),
            "https://media.acct.r2.cloudflarestorage.com/videos/v1/hls/playlist.m3u8"
        );
    }
}
