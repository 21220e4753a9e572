//! Google Cloud plumbing shared by the Firestore and Pub/Sub REST clients.
//!
//! This crate provides:
//! - Cached OAuth access tokens with single-flight refresh
//! - A static token source for emulators and tests
//! - Retry with exponential backoff and jitter

pub mod error;
pub mod retry;
pub mod token;

pub use error::{AuthError, AuthResult};
pub use retry::{with_retry, RetryConfig, Retryable};
pub use token::{AccessTokenSource, StaticToken, TokenCache, DATASTORE_SCOPE, PUBSUB_SCOPE};
