//! Queue error types.

use thiserror::Error;
use vproc_gcp::{AuthError, Retryable};

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid message {message_id}: {reason}")]
    InvalidMessage { message_id: String, reason: String },

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Rate limited, retry after {0}ms")]
    RateLimited(u64),

    #[error("Server error ({0}): {1}")]
    ServerError(u16, String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

const RATE_LIMIT_DELAY_MS: u64 = 1000;

impl QueueError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_message(message_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidMessage {
            message_id: message_id.into(),
            reason: reason.into(),
        }
    }

    /// Map a non-success HTTP status to an error.
    pub fn from_http_status(status: u16, message: String) -> Self {
        match status {
            401 => Self::AuthError(message),
            403 => Self::PermissionDenied(message),
            404 => Self::SubscriptionNotFound(message),
            429 => Self::RateLimited(RATE_LIMIT_DELAY_MS),
            500..=599 => Self::ServerError(status, message),
            _ => Self::RequestFailed(format!("HTTP {}: {}", status, message)),
        }
    }

    /// HTTP status this error corresponds to, for metrics.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::AuthError(_) => Some(401),
            Self::PermissionDenied(_) => Some(403),
            Self::SubscriptionNotFound(_) => Some(404),
            Self::RateLimited(_) => Some(429),
            Self::ServerError(status, _) => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl Retryable for QueueError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited(_) | Self::ServerError(_, _)
        )
    }

    fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited(ms) => Some(*ms),
            _ => None,
        }
    }
}

impl From<AuthError> for QueueError {
    fn from(e: AuthError) -> Self {
        Self::AuthError(e.to_string())
    }
}
