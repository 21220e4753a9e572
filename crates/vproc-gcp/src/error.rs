//! Auth error types.

use thiserror::Error;

/// Result type for token operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors that can occur while obtaining an access token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Failed to load credentials: {0}")]
    Credentials(String),

    #[error("Failed to obtain auth token: {0}")]
    Token(String),
}

impl AuthError {
    pub fn credentials(msg: impl Into<String>) -> Self {
        Self::Credentials(msg.into())
    }

    pub fn token(msg: impl Into<String>) -> Self {
        Self::Token(msg.into())
    }
}
