//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

/// Variables the worker cannot start without. Alternatives are listed as
/// `primary|alias`.
pub const REQUIRED_ENV: &[&str] = &[
    "GOOGLE_CLOUD_PROJECT_ID|GCP_PROJECT_ID",
    "PUBSUB_SUBSCRIPTION_ID",
    "R2_ACCOUNT_ID",
    "R2_ACCESS_KEY_ID",
    "R2_SECRET_ACCESS_KEY",
    "R2_BUCKET_NAME",
];

/// Largest ack deadline Pub/Sub accepts in `modifyAckDeadline`.
pub const MAX_ACK_DEADLINE_SECS: u64 = 600;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root for per-job working directories
    pub work_dir: PathBuf,
    /// Health and metrics server port
    pub port: u16,
    /// How far each lease extension pushes the ack deadline, at most
    /// [`MAX_ACK_DEADLINE_SECS`]
    pub lease_extension: Duration,
    /// Interval between lease extensions while a job runs
    pub lease_heartbeat: Duration,
    /// Total time a message's lease is kept alive
    pub max_lease: Duration,
    /// Sleep after a failed pull
    pub pull_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/vproc"),
            port: 8080,
            lease_extension: Duration::from_secs(60),
            lease_heartbeat: Duration::from_secs(30),
            max_lease: Duration::from_secs(3600),
            pull_backoff: Duration::from_secs(5),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    ///
    /// Fails naming the first missing required variable.
    pub fn from_env() -> WorkerResult<Self> {
        if let Some(missing) = first_missing_env() {
            return Err(WorkerError::config(format!("{} not set", missing)));
        }

        let defaults = Self::default();
        Ok(Self {
            work_dir: non_empty_env("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            port: parse_env("PORT").unwrap_or(defaults.port),
            lease_extension: parse_env("WORKER_LEASE_EXTENSION_SECS")
                // A zero deadline would release the message instead.
                .filter(|secs: &u64| *secs > 0)
                .map(|secs| Duration::from_secs(secs.min(MAX_ACK_DEADLINE_SECS)))
                .unwrap_or(defaults.lease_extension),
            lease_heartbeat: parse_env("WORKER_LEASE_HEARTBEAT_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.lease_heartbeat),
            max_lease: parse_env("WORKER_MAX_LEASE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_lease),
            pull_backoff: defaults.pull_backoff,
        })
    }
}

/// First entry of [`REQUIRED_ENV`] with no non-empty value.
pub fn first_missing_env() -> Option<&'static str> {
    REQUIRED_ENV.iter().copied().find(|entry| {
        entry
            .split('|')
            .all(|name| non_empty_env(name).is_none())
    })
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    non_empty_env(name).and_then(|v| v.trim().parse().ok())
}
