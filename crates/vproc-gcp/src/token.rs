//! Access token sources.
//!
//! [`TokenCache`] wraps a `gcp_auth` provider with:
//! - Refresh margin to avoid token expiry during requests
//! - Single-flight refresh so concurrent callers share one token request
//! - Fallback to the existing token when a refresh fails but it is still usable

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{AuthError, AuthResult};

/// Refresh margin: refresh token 60 seconds before expiry.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Conservative token TTL when expiry is unknown (50 minutes).
const TOKEN_DEFAULT_TTL: Duration = Duration::from_secs(50 * 60);

/// OAuth scope for the Firestore REST API.
pub const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

/// OAuth scope for the Pub/Sub REST API.
pub const PUBSUB_SCOPE: &str = "https://www.googleapis.com/auth/pubsub";

/// Something that hands out bearer tokens.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    /// Get a token valid for at least the refresh margin.
    async fn access_token(&self) -> AuthResult<String>;

    /// Drop any cached token so the next call fetches a fresh one.
    async fn invalidate(&self) {}
}

/// Fixed token, used against local emulators.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Token accepted by the Firestore and Pub/Sub emulators.
    pub fn emulator() -> Self {
        Self::new("owner")
    }
}

#[async_trait]
impl AccessTokenSource for StaticToken {
    async fn access_token(&self) -> AuthResult<String> {
        Ok(self.0.clone())
    }
}

/// Cached token with expiration tracking.
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() + TOKEN_REFRESH_MARGIN < self.expires_at
    }

    /// Still accepted by the server even if a refresh is due.
    fn is_usable(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Thread-safe token cache with single-flight refresh.
pub struct TokenCache {
    auth: Arc<dyn TokenProvider>,
    scope: &'static str,
    cache: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(auth: Arc<dyn TokenProvider>, scope: &'static str) -> Self {
        Self {
            auth,
            scope,
            cache: RwLock::new(None),
        }
    }

    /// Build a cache from ambient credentials.
    ///
    /// Uses the service account named by `GOOGLE_APPLICATION_CREDENTIALS` when
    /// set, otherwise falls back to the default `gcp_auth` provider chain
    /// (metadata server, gcloud).
    pub async fn from_environment(scope: &'static str) -> AuthResult<Self> {
        let service_account = CustomServiceAccount::from_env()
            .map_err(|e| AuthError::credentials(format!("Failed to load service account: {}", e)))?;

        let auth: Arc<dyn TokenProvider> = match service_account {
            Some(sa) => {
                info!("Using service account from GOOGLE_APPLICATION_CREDENTIALS");
                Arc::new(sa)
            }
            None => gcp_auth::provider()
                .await
                .map_err(|e| AuthError::credentials(e.to_string()))?,
        };

        Ok(Self::new(auth, scope))
    }

    async fn refresh_token(&self, cache: &mut Option<CachedToken>) -> AuthResult<String> {
        match self.auth.token(&[self.scope]).await {
            Ok(token) => {
                let access_token = token.as_str().to_string();

                let now = Utc::now();
                let exp = token.expires_at();
                let expires_at = if exp > now {
                    match (exp - now).to_std() {
                        Ok(ttl) => Instant::now() + ttl,
                        Err(_) => Instant::now() + TOKEN_DEFAULT_TTL,
                    }
                } else {
                    // Already expired: force a refresh on the next request.
                    Instant::now()
                };

                *cache = Some(CachedToken {
                    access_token: access_token.clone(),
                    expires_at,
                });

                debug!(scope = self.scope, "Refreshed auth token");
                Ok(access_token)
            }
            Err(e) => {
                if let Some(cached) = cache.as_ref() {
                    if cached.is_usable() {
                        warn!("Token refresh failed, using existing token: {}", e);
                        return Ok(cached.access_token.clone());
                    }
                }
                Err(AuthError::token(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl AccessTokenSource for TokenCache {
    async fn access_token(&self) -> AuthResult<String> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;

        // Another task may have refreshed while we waited for the lock.
        if let Some(cached) = cache.as_ref() {
            if cached.is_valid() {
                return Ok(cached.access_token.clone());
            }
        }

        self.refresh_token(&mut cache).await
    }

    async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        *cache = None;
    }
}
