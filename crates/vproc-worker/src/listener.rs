//! Pull loop over the job subscription.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vproc_models::JobDescriptor;
use vproc_queue::{ReceivedMessage, Subscription};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::pipeline::VideoPipeline;

/// What to tell the subscription about a handled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    Ack,
    /// Redeliver; `reason` labels the nack metric
    Nack { reason: &'static str },
}

/// Ack deadline Pub/Sub applies when a subscription does not set one.
pub const DEFAULT_ACK_DEADLINE_SECS: u32 = 10;

/// Floor for the heartbeat period.
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Lease settings for in-flight messages.
#[derive(Debug, Clone, Copy)]
struct Lease {
    extension: Duration,
    heartbeat: Duration,
    max: Duration,
}

/// Pulls one message at a time and runs it through the pipeline.
pub struct QueueListener {
    subscription: Arc<dyn Subscription>,
    pipeline: Arc<VideoPipeline>,
    lease: Lease,
    pull_backoff: Duration,
    /// Subscription ack deadline in seconds, 0 until fetched
    ack_deadline_secs: AtomicU32,
    listener_id: String,
}

impl QueueListener {
    pub fn new(
        subscription: Arc<dyn Subscription>,
        pipeline: Arc<VideoPipeline>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            subscription,
            pipeline,
            lease: Lease {
                extension: config.lease_extension,
                heartbeat: config.lease_heartbeat,
                max: config.max_lease,
            },
            pull_backoff: config.pull_backoff,
            ack_deadline_secs: AtomicU32::new(0),
            listener_id: format!("worker-{}", Uuid::new_v4()),
        }
    }

    /// Refuse subscriptions that push to an endpoint; pulling from them
    /// would compete with the push delivery.
    ///
    /// Also remembers the subscription's ack deadline for the lease heartbeat.
    pub async fn ensure_pull_subscription(&self) -> WorkerResult<()> {
        let config = self.subscription.fetch_config().await?;
        self.ack_deadline_secs.store(
            config.ack_deadline_seconds.unwrap_or(DEFAULT_ACK_DEADLINE_SECS),
            Ordering::Relaxed,
        );

        if let Some(endpoint) = config.push_endpoint.as_deref() {
            return Err(WorkerError::config(format!(
                "subscription {} is configured for push delivery to {}; a pull subscription is required",
                self.subscription.name(),
                endpoint
            )));
        }

        Ok(())
    }

    /// Run until `shutdown` turns true (or its sender is dropped).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
        self.ensure_pull_subscription().await?;

        info!(
            listener_id = %self.listener_id,
            subscription = %self.subscription.name(),
            "Listening for jobs"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let pulled = tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                pulled = self.subscription.pull(1) => pulled,
            };

            match pulled {
                Ok(messages) => {
                    for message in messages {
                        let disposition = self.handle_message(&message, &mut shutdown).await;
                        self.settle(&message, disposition).await;
                    }
                }
                Err(e) => {
                    error!("Error pulling messages: {}", e);
                    tokio::select! {
                        _ = wait_for_shutdown(&mut shutdown) => break,
                        _ = tokio::time::sleep(self.pull_backoff) => {}
                    }
                }
            }
        }

        info!(listener_id = %self.listener_id, "Listener stopped");
        Ok(())
    }

    /// Decode and process one message.
    ///
    /// The pipeline runs in its own task so a panic is contained, and so
    /// shutdown can abort it while the lease heartbeat keeps ticking here.
    pub async fn handle_message(
        &self,
        message: &ReceivedMessage,
        shutdown: &mut watch::Receiver<bool>,
    ) -> MessageDisposition {
        let job = match decode(message) {
            Ok(job) => job,
            Err(e) => {
                warn!(message_id = %message.message_id, "Rejecting message: {}", e);
                return MessageDisposition::Nack { reason: "invalid" };
            }
        };

        info!(
            message_id = %message.message_id,
            video_id = %job.video_id,
            processing_id = %job.processing_id,
            delivery_attempt = message.delivery_attempt,
            "Received job"
        );

        let pipeline = Arc::clone(&self.pipeline);
        let mut task = tokio::spawn(async move { pipeline.process(&job).await });

        // The first tick fires at once, before the initial deadline can lapse.
        let started = Instant::now();
        let mut heartbeat = tokio::time::interval_at(started, self.heartbeat_period());

        loop {
            tokio::select! {
                joined = &mut task => {
                    return match joined {
                        Ok(Ok(summary)) => {
                            info!(
                                message_id = %message.message_id,
                                objects = summary.hls_keys.len(),
                                "Job completed"
                            );
                            MessageDisposition::Ack
                        }
                        Ok(Err(e)) => {
                            warn!(message_id = %message.message_id, "Job failed: {}", e);
                            MessageDisposition::Nack { reason: "failed" }
                        }
                        Err(e) if e.is_panic() => {
                            error!(message_id = %message.message_id, "Job panicked");
                            MessageDisposition::Nack { reason: "panic" }
                        }
                        Err(e) => {
                            error!(message_id = %message.message_id, "Job task failed: {}", e);
                            MessageDisposition::Nack { reason: "failed" }
                        }
                    };
                }
                _ = heartbeat.tick() => {
                    self.extend_lease(message, started.elapsed()).await;
                }
                _ = wait_for_shutdown(shutdown) => {
                    info!(message_id = %message.message_id, "Shutdown during job, aborting");
                    task.abort();
                    // Wait for the aborted task so its work dir is gone before we return.
                    let _ = (&mut task).await;
                    return MessageDisposition::Nack { reason: "shutdown" };
                }
            }
        }
    }

    /// Heartbeat period: the configured one, capped at half the ack deadline.
    pub fn heartbeat_period(&self) -> Duration {
        let ack_deadline = match self.ack_deadline_secs.load(Ordering::Relaxed) {
            0 => DEFAULT_ACK_DEADLINE_SECS,
            secs => secs,
        };
        heartbeat_period(self.lease.heartbeat, ack_deadline)
    }

    async fn extend_lease(&self, message: &ReceivedMessage, held: Duration) {
        if held >= self.lease.max {
            debug!(message_id = %message.message_id, "Lease at maximum, leaving it to redelivery");
            return;
        }

        let seconds = u32::try_from(self.lease.extension.as_secs()).unwrap_or(u32::MAX);
        match self.subscription.extend_deadline(&message.ack_id, seconds).await {
            Ok(()) => {
                metrics::record_lease_extension(true);
                debug!(message_id = %message.message_id, seconds, "Extended lease");
            }
            Err(e) => {
                metrics::record_lease_extension(false);
                warn!(message_id = %message.message_id, "Failed to extend lease: {}", e);
            }
        }
    }

    /// Ack or nack; failures here are logged and left to redelivery.
    pub async fn settle(&self, message: &ReceivedMessage, disposition: MessageDisposition) {
        match disposition {
            MessageDisposition::Ack => match self.subscription.ack(&message.ack_id).await {
                Ok(()) => metrics::record_ack(),
                Err(e) => error!(message_id = %message.message_id, "Failed to ack: {}", e),
            },
            MessageDisposition::Nack { reason } => {
                match self.subscription.nack(&message.ack_id).await {
                    Ok(()) => metrics::record_nack(reason),
                    Err(e) => error!(message_id = %message.message_id, "Failed to nack: {}", e),
                }
            }
        }
    }
}

fn heartbeat_period(configured: Duration, ack_deadline_secs: u32) -> Duration {
    configured
        .min(Duration::from_secs(u64::from(ack_deadline_secs)) / 2)
        .max(MIN_HEARTBEAT)
}

fn decode(message: &ReceivedMessage) -> WorkerResult<JobDescriptor> {
    let payload = message.payload()?;
    Ok(JobDescriptor::from_slice(&payload)?)
}

/// Resolves once shutdown is requested or the sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
