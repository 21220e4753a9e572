//! Firestore REST API client.
//!
//! Production-grade client with:
//! - Token caching with refresh margin
//! - HTTP client tuning (pooling, timeouts)
//! - Exponential backoff with jitter
//! - Observability (tracing spans, metrics)
//! - Firestore emulator support via `FIRESTORE_EMULATOR_HOST`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, info, info_span, Instrument};
use vproc_gcp::{with_retry, AccessTokenSource, RetryConfig, StaticToken, TokenCache, DATASTORE_SCOPE};

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_request;
use crate::types::{Document, Value};

const PRODUCTION_HOST: &str = "https://firestore.googleapis.com";

/// Firestore client configuration.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    /// GCP project ID
    pub project_id: String,
    /// Database ID (usually "(default)")
    pub database_id: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Retry configuration
    pub retry: RetryConfig,
    /// `host:port` of a local emulator; requests go over plain HTTP without auth
    pub emulator_host: Option<String>,
}

impl FirestoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> FirestoreResult<Self> {
        let project_id = std::env::var("GOOGLE_CLOUD_PROJECT_ID")
            .or_else(|_| std::env::var("GCP_PROJECT_ID"))
            .map_err(|_| {
                FirestoreError::config(
                    "GOOGLE_CLOUD_PROJECT_ID or GCP_PROJECT_ID must be set to access Firestore",
                )
            })?;

        if project_id.trim().is_empty() {
            return Err(FirestoreError::config(
                "GOOGLE_CLOUD_PROJECT_ID or GCP_PROJECT_ID cannot be empty",
            ));
        }

        let connect_timeout_secs: u64 = std::env::var("FIRESTORE_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            project_id,
            database_id: std::env::var("FIRESTORE_DATABASE_ID")
                .unwrap_or_else(|_| "(default)".to_string()),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            retry: RetryConfig::from_env("FIRESTORE"),
            emulator_host: std::env::var("FIRESTORE_EMULATOR_HOST")
                .ok()
                .filter(|h| !h.is_empty()),
        })
    }

    /// Config pointing at an emulator, used in tests.
    pub fn emulator(project_id: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database_id: "(default)".to_string(),
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(1),
            retry: RetryConfig::disabled(),
            emulator_host: Some(host.into()),
        }
    }

    fn documents_url(&self) -> String {
        let host = match &self.emulator_host {
            Some(host) => format!("http://{}", host),
            None => PRODUCTION_HOST.to_string(),
        };
        format!(
            "{}/v1/projects/{}/databases/{}/documents",
            host, self.project_id, self.database_id
        )
    }
}

/// Precondition on the target document of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// The document must (or must not) already exist.
    Exists(bool),
}

impl Precondition {
    fn query_param(&self) -> String {
        match self {
            Precondition::Exists(exists) => format!("currentDocument.exists={}", exists),
        }
    }
}

/// Firestore REST API client.
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    config: FirestoreConfig,
    base_url: String,
    tokens: Arc<dyn AccessTokenSource>,
}

impl FirestoreClient {
    /// Create a new Firestore client.
    ///
    /// Against an emulator the client uses a static token; otherwise tokens
    /// come from the ambient service account credentials.
    pub async fn new(config: FirestoreConfig) -> FirestoreResult<Self> {
        let tokens: Arc<dyn AccessTokenSource> = if config.emulator_host.is_some() {
            info!("Using Firestore emulator at {}", config.documents_url());
            Arc::new(StaticToken::emulator())
        } else {
            Arc::new(TokenCache::from_environment(DATASTORE_SCOPE).await?)
        };
        Self::with_token_source(config, tokens)
    }

    /// Create a client with an explicit token source.
    pub fn with_token_source(
        config: FirestoreConfig,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> FirestoreResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("vproc-firestore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FirestoreError::Network)?;

        Ok(Self {
            http,
            base_url: config.documents_url(),
            config,
            tokens,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> FirestoreResult<Self> {
        let config = FirestoreConfig::from_env()?;
        Self::new(config).await
    }

    fn is_access_token_expired(body: &str) -> bool {
        body.contains("ACCESS_TOKEN_EXPIRED") || body.contains("\"UNAUTHENTICATED\"")
    }

    /// Build document path.
    fn document_path(&self, collection: &str, doc_id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            collection,
            urlencoding::encode(doc_id)
        )
    }

    /// Send an authorized request, re-authenticating once on an expired token.
    async fn send_authorized<F>(&self, url: &str, build: F) -> FirestoreResult<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.tokens.access_token().await?;
        let response = build(&token).send().await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if !Self::is_access_token_expired(&body) {
            return Err(FirestoreError::from_http_status(
                StatusCode::UNAUTHORIZED.as_u16(),
                format!("{} failed: {}", url, body),
            ));
        }

        debug!("Access token expired, refreshing");
        self.tokens.invalidate().await;
        let token = self.tokens.access_token().await?;
        Ok(build(&token).send().await?)
    }

    /// Get a document; `None` if it does not exist.
    pub async fn get_document(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> FirestoreResult<Option<Document>> {
        let url = &self.document_path(collection, doc_id);

        with_retry(&self.config.retry, "firestore", "get_document", move || {
            self.execute_request("get_document", collection, doc_id, async move {
                let response = self
                    .send_authorized(url, |token| self.http.get(url).bearer_auth(token))
                    .await?;

                match response.status() {
                    StatusCode::OK => Ok(Some(response.json::<Document>().await?)),
                    StatusCode::NOT_FOUND => Ok(None),
                    status => Err(Self::handle_error_response(status, url, response).await),
                }
            })
        })
        .await
    }

    /// Create a document; fails with `AlreadyExists` if the id is taken.
    pub async fn create_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
    ) -> FirestoreResult<Document> {
        let url = format!(
            "{}/{}?documentId={}",
            self.base_url,
            collection,
            urlencoding::encode(doc_id)
        );
        let url = &url;
        let body = &Document::new(fields);

        with_retry(&self.config.retry, "firestore", "create_document", move || {
            self.execute_request("create_document", collection, doc_id, async move {
                let response = self
                    .send_authorized(url, |token| {
                        self.http.post(url).bearer_auth(token).json(body)
                    })
                    .await?;

                match response.status() {
                    StatusCode::OK | StatusCode::CREATED => Ok(response.json::<Document>().await?),
                    StatusCode::CONFLICT => Err(FirestoreError::AlreadyExists(format!(
                        "{}/{}",
                        collection, doc_id
                    ))),
                    status => Err(Self::handle_error_response(status, url, response).await),
                }
            })
        })
        .await
    }

    /// Write the masked fields of a document.
    ///
    /// Without a precondition this upserts. Fields named in `update_mask` but
    /// absent from `fields` are deleted, so the mask should list exactly the
    /// fields being written.
    pub async fn update_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
        update_mask: &[String],
        precondition: Option<Precondition>,
    ) -> FirestoreResult<Document> {
        let mut params: Vec<String> = update_mask
            .iter()
            .map(|f| format!("updateMask.fieldPaths={}", urlencoding::encode(f)))
            .collect();
        if let Some(precondition) = precondition {
            params.push(precondition.query_param());
        }

        let mut url = self.document_path(collection, doc_id);
        if !params.is_empty() {
            url = format!("{}?{}", url, params.join("&"));
        }
        let url = &url;
        let body = &Document::new(fields);

        with_retry(&self.config.retry, "firestore", "update_document", move || {
            self.execute_request("update_document", collection, doc_id, async move {
                let response = self
                    .send_authorized(url, |token| {
                        self.http.patch(url).bearer_auth(token).json(body)
                    })
                    .await?;

                match response.status() {
                    StatusCode::OK => Ok(response.json::<Document>().await?),
                    StatusCode::NOT_FOUND => {
                        Err(FirestoreError::not_found(format!("{}/{}", collection, doc_id)))
                    }
                    status => Err(Self::handle_error_response(status, url, response).await),
                }
            })
        })
        .await
    }

    async fn execute_request<T, F>(
        &self,
        operation: &str,
        collection: &str,
        doc_id: &str,
        fut: F,
    ) -> FirestoreResult<T>
    where
        F: std::future::Future<Output = FirestoreResult<T>>,
    {
        let span = info_span!("firestore_request", operation = %operation, collection = %collection, doc_id = %doc_id);

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let latency_ms = start.elapsed().as_millis() as f64;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, latency_ms);

        result
    }

    async fn handle_error_response(status: StatusCode, url: &str, response: Response) -> FirestoreError {
        let body = response.text().await.unwrap_or_default();
        FirestoreError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToFirestoreValue;
    use serial_test::serial;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DOC_PATH: &str = "/v1/projects/test-project/databases/(default)/documents/video_processing/p1";

    async fn emulator_client(server: &MockServer) -> FirestoreClient {
        let config = FirestoreConfig::emulator("test-project", server.address().to_string());
        FirestoreClient::new(config).await.unwrap()
    }

    #[test]
    #[serial]
    fn test_config_from_env_validates_project_id() {
        std::env::remove_var("GOOGLE_CLOUD_PROJECT_ID");
        std::env::remove_var("GCP_PROJECT_ID");
        let result = FirestoreConfig::from_env();
        assert!(matches!(result, Err(FirestoreError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_config_default_values() {
        std::env::set_var("GOOGLE_CLOUD_PROJECT_ID", "test-project");
        std::env::remove_var("FIRESTORE_CONNECT_TIMEOUT_SECS");
        std::env::remove_var("FIRESTORE_EMULATOR_HOST");
        let config = FirestoreConfig::from_env().unwrap();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.database_id, "(default)");
        assert_eq!(config.emulator_host, None);
        assert_eq!(
            config.documents_url(),
            "https://firestore.googleapis.com/v1/projects/test-project/databases/(default)/documents"
        );
        std::env::remove_var("GOOGLE_CLOUD_PROJECT_ID");
    }

    #[tokio::test]
    async fn test_get_missing_document_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DOC_PATH))
            .and(header("authorization", "Bearer owner"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = emulator_client(&server).await;
        let doc = client.get_document("video_processing", "p1").await.unwrap();
        assert!(doc.is_none());
    }

    #[tokio::test]
    async fn test_create_conflict_is_already_exists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/test-project/databases/(default)/documents/video_processing"))
            .and(query_param("documentId", "p1"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let client = emulator_client(&server).await;
        let mut fields = HashMap::new();
        fields.insert("id".to_string(), "p1".to_firestore_value());
        let err = client
            .create_document("video_processing", "p1", fields)
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_update_sends_mask_and_precondition() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/v1/projects/test-project/databases/(default)/documents/videos/v1"))
            .and(query_param("updateMask.fieldPaths", "video_url"))
            .and(query_param("currentDocument.exists", "true"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = emulator_client(&server).await;
        let mut fields = HashMap::new();
        fields.insert("video_url".to_string(), "https://x".to_firestore_value());
        let err = client
            .update_document(
                "videos",
                "v1",
                fields,
                &["video_url".to_string()],
                Some(Precondition::Exists(true)),
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DOC_PATH))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(DOC_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "projects/test-project/databases/(default)/documents/video_processing/p1",
                "fields": {"video_id": {"stringValue": "v1"}}
            })))
            .mount(&server)
            .await;

        let mut config = FirestoreConfig::emulator("test-project", server.address().to_string());
        config.retry = RetryConfig {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };
        let client = FirestoreClient::new(config).await.unwrap();

        let doc = client.get_document("video_processing", "p1").await.unwrap().unwrap();
        assert_eq!(doc.get::<String>("video_id").as_deref(), Some("v1"));
    }
}
