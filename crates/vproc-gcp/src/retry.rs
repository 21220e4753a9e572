//! Retry policy with exponential backoff and jitter.
//!
//! - Exponential backoff with full jitter
//! - Honors a server-provided retry delay on 429
//! - Configurable base and max delays

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use metrics::counter;
use tracing::{info_span, warn, Instrument};

/// Total retry attempts by service and operation.
pub const RETRIES_TOTAL: &str = "gcp_retries_total";

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Delay requested by the server, if any.
    fn retry_after_ms(&self) -> Option<u64> {
        None
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay for exponential backoff (in milliseconds).
    pub base_delay_ms: u64,
    /// Maximum delay cap (in milliseconds).
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
        }
    }
}

impl RetryConfig {
    /// Read `{PREFIX}_RETRY_BASE_MS` and `{PREFIX}_RETRY_MAX_MS`.
    pub fn from_env(prefix: &str) -> Self {
        let defaults = Self::default();

        let base_delay_ms: u64 = std::env::var(format!("{}_RETRY_BASE_MS", prefix))
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.base_delay_ms);

        let max_delay_ms: u64 = std::env::var(format!("{}_RETRY_MAX_MS", prefix))
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_delay_ms);

        Self {
            max_retries: defaults.max_retries,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// No retries, used by tests that assert on a single request.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Execute an async operation, retrying retryable failures.
///
/// `service` and `operation` label the span, the warning and the retry counter.
pub async fn with_retry<T, E, F, Fut>(
    config: &RetryConfig,
    service: &'static str,
    operation: &str,
    op: F,
) -> Result<T, E>
where
    E: Retryable + Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;

    loop {
        let span = info_span!("gcp_retry", service, operation = %operation, attempt = attempt + 1);

        match op().instrument(span).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                let delay = calculate_delay(config, attempt, e.retry_after_ms());

                warn!(
                    service,
                    operation = %operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Request failed, retrying: {}",
                    e
                );

                counter!(
                    RETRIES_TOTAL,
                    "service" => service,
                    "operation" => operation.to_string()
                )
                .increment(1);

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Calculate retry delay with exponential backoff and full jitter.
fn calculate_delay(config: &RetryConfig, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
    if let Some(after) = retry_after_ms {
        return Duration::from_millis(after);
    }

    let exp_delay = config
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    let capped_delay = exp_delay.min(config.max_delay_ms);

    // Time-based pseudo-randomization keeps the rand crate out of the tree.
    let jittered = if capped_delay > 0 {
        use std::time::SystemTime;
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let random_factor = (nanos % 1000) as f64 / 1000.0;
        ((capped_delay as f64) * random_factor) as u64
    } else {
        0
    };

    Duration::from_millis(jittered.max(config.base_delay_ms))
}
