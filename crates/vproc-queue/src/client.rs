//! Pub/Sub REST client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, info_span, Instrument};
use vproc_gcp::{with_retry, AccessTokenSource, RetryConfig, StaticToken, TokenCache, PUBSUB_SCOPE};

use crate::error::{QueueError, QueueResult};
use crate::metrics::{record_messages_received, record_request};
use crate::subscription::{ReceivedMessage, Subscription, SubscriptionConfig};
use crate::types::{
    AcknowledgeRequest, ModifyAckDeadlineRequest, PullRequest, PullResponse, SubscriptionResource,
};

const PRODUCTION_HOST: &str = "https://pubsub.googleapis.com";

/// Pub/Sub client configuration.
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    /// GCP project ID
    pub project_id: String,
    /// Subscription ID or full `projects/{p}/subscriptions/{s}` name
    pub subscription_id: String,
    /// Timeout for ack/config requests
    pub timeout: Duration,
    /// Timeout for a pull, which the server may hold open
    pub pull_timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
    /// `host:port` of a local emulator
    pub emulator_host: Option<String>,
}

impl PubSubConfig {
    /// Create config from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        let project_id = non_empty_env("GOOGLE_CLOUD_PROJECT_ID")
            .or_else(|| non_empty_env("GCP_PROJECT_ID"))
            .ok_or_else(|| QueueError::config("GOOGLE_CLOUD_PROJECT_ID not set"))?;
        let subscription_id = non_empty_env("PUBSUB_SUBSCRIPTION_ID")
            .ok_or_else(|| QueueError::config("PUBSUB_SUBSCRIPTION_ID not set"))?;

        Ok(Self {
            project_id,
            subscription_id,
            timeout: Duration::from_secs(30),
            pull_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(5),
            retry: RetryConfig::from_env("PUBSUB"),
            emulator_host: non_empty_env("PUBSUB_EMULATOR_HOST"),
        })
    }

    /// Config pointing at an emulator, used in tests.
    pub fn emulator(
        project_id: impl Into<String>,
        subscription_id: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            subscription_id: subscription_id.into(),
            timeout: Duration::from_secs(5),
            pull_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(1),
            retry: RetryConfig::disabled(),
            emulator_host: Some(host.into()),
        }
    }

    /// Fully-qualified subscription name.
    pub fn subscription_name(&self) -> String {
        if self.subscription_id.starts_with("projects/") {
            self.subscription_id.clone()
        } else {
            format!(
                "projects/{}/subscriptions/{}",
                self.project_id, self.subscription_id
            )
        }
    }

    fn subscription_url(&self) -> String {
        let host = match &self.emulator_host {
            Some(host) => format!("http://{}", host),
            None => PRODUCTION_HOST.to_string(),
        };
        format!("{}/v1/{}", host, self.subscription_name())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Pub/Sub REST client bound to one subscription.
#[derive(Clone)]
pub struct PubSubClient {
    http: Client,
    config: PubSubConfig,
    name: String,
    subscription_url: String,
    tokens: Arc<dyn AccessTokenSource>,
}

impl PubSubClient {
    /// Create a new client. Uses a static token against an emulator.
    pub async fn new(config: PubSubConfig) -> QueueResult<Self> {
        let tokens: Arc<dyn AccessTokenSource> = if config.emulator_host.is_some() {
            info!("Using Pub/Sub emulator at {}", config.subscription_url());
            Arc::new(StaticToken::emulator())
        } else {
            Arc::new(TokenCache::from_environment(PUBSUB_SCOPE).await?)
        };
        Self::with_token_source(config, tokens)
    }

    /// Create a client with an explicit token source.
    pub fn with_token_source(
        config: PubSubConfig,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> QueueResult<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("vproc-queue/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(QueueError::Network)?;

        Ok(Self {
            http,
            name: config.subscription_name(),
            subscription_url: config.subscription_url(),
            config,
            tokens,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> QueueResult<Self> {
        Self::new(PubSubConfig::from_env()?).await
    }

    async fn send_authorized<F>(&self, build: F) -> QueueResult<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.tokens.access_token().await?;
        let response = build(&token).send().await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!("Pub/Sub rejected token, refreshing once");
        self.tokens.invalidate().await;
        let token = self.tokens.access_token().await?;
        Ok(build(&token).send().await?)
    }

    /// POST `{subscription}:{action}` with a JSON body.
    async fn post_action<B, T>(&self, action: &str, body: &B, timeout: Duration) -> QueueResult<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}:{}", self.subscription_url, action);

        let operation = action;
        let url = &url;
        with_retry(&self.config.retry, "pubsub", operation, move || {
            self.execute_request(operation, async move {
                let response = self
                    .send_authorized(|token| {
                        self.http
                            .post(url)
                            .timeout(timeout)
                            .bearer_auth(token)
                            .json(body)
                    })
                    .await?;
                Self::parse_response(url, response).await
            })
        })
        .await
    }

    async fn parse_response<T: DeserializeOwned>(url: &str, response: Response) -> QueueResult<T> {
        let status = response.status();
        if status.is_success() {
            let text = response.text().await?;
            // Acknowledge and modifyAckDeadline answer with an empty body.
            let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
            return Ok(serde_json::from_str(text)?);
        }
        let body = response.text().await.unwrap_or_default();
        Err(QueueError::from_http_status(
            status.as_u16(),
            format!("{} failed: {}", url, body),
        ))
    }

    async fn modify_ack_deadline(&self, ack_id: &str, seconds: u32) -> QueueResult<()> {
        let body = ModifyAckDeadlineRequest {
            ack_ids: vec![ack_id.to_string()],
            ack_deadline_seconds: seconds,
        };
        let _: serde_json::Value = self
            .post_action("modifyAckDeadline", &body, self.config.timeout)
            .await?;
        Ok(())
    }

    async fn execute_request<T, F>(&self, operation: &str, fut: F) -> QueueResult<T>
    where
        F: std::future::Future<Output = QueueResult<T>>,
    {
        let span = info_span!("pubsub_request", operation = %operation, subscription = %self.name);

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
}

#[async_trait]
impl Subscription for PubSubClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_config(&self) -> QueueResult<SubscriptionConfig> {
        let url = &self.subscription_url;
        let resource: SubscriptionResource =
            with_retry(&self.config.retry, "pubsub", "get_subscription", move || {
                self.execute_request("get_subscription", async move {
                    let response = self
                        .send_authorized(|token| {
                            self.http
                                .get(url)
                                .timeout(self.config.timeout)
                                .bearer_auth(token)
                        })
                        .await?;
                    Self::parse_response(url, response).await
                })
            })
            .await?;

        Ok(resource.into())
    }

    async fn pull(&self, max_messages: u32) -> QueueResult<Vec<ReceivedMessage>> {
        let response: PullResponse = self
            .post_action(
                "pull",
                &PullRequest { max_messages },
                self.config.pull_timeout,
            )
            .await?;

        let messages: Vec<ReceivedMessage> = response
            .received_messages
            .into_iter()
            .map(ReceivedMessage::from)
            .collect();

        if !messages.is_empty() {
            record_messages_received(messages.len());
        }
        Ok(messages)
    }

    async fn ack(&self, ack_id: &str) -> QueueResult<()> {
        let body = AcknowledgeRequest {
            ack_ids: vec![ack_id.to_string()],
        };
        let _: serde_json::Value = self
            .post_action("acknowledge", &body, self.config.timeout)
            .await?;
        Ok(())
    }

    async fn nack(&self, ack_id: &str) -> QueueResult<()> {
        self.modify_ack_deadline(ack_id, 0).await
    }

    async fn extend_deadline(&self, ack_id: &str, seconds: u32) -> QueueResult<()> {
        self.modify_ack_deadline(ack_id, seconds).await
    }
}
