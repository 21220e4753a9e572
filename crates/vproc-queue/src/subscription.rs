//! Subscription seam consumed by the queue listener.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{QueueError, QueueResult};
use crate::types::{SubscriptionResource, WireReceivedMessage};

/// Delivery settings of a subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionConfig {
    pub topic: Option<String>,
    /// Set when the subscription pushes to a callback endpoint
    pub push_endpoint: Option<String>,
    pub ack_deadline_seconds: Option<u32>,
}

impl From<SubscriptionResource> for SubscriptionConfig {
    fn from(resource: SubscriptionResource) -> Self {
        Self {
            topic: resource.topic,
            push_endpoint: resource
                .push_config
                .and_then(|p| p.push_endpoint)
                .filter(|endpoint| !endpoint.is_empty()),
            ack_deadline_seconds: resource.ack_deadline_seconds,
        }
    }
}

/// A pulled message awaiting ack or nack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message_id: String,
    /// Base64-encoded payload as delivered
    pub data: Option<String>,
    pub attributes: HashMap<String, String>,
    pub publish_time: Option<String>,
    pub delivery_attempt: Option<u32>,
}

impl ReceivedMessage {
    /// Build a message around a raw payload.
    pub fn new(ack_id: impl Into<String>, message_id: impl Into<String>, payload: &[u8]) -> Self {
        Self {
            ack_id: ack_id.into(),
            message_id: message_id.into(),
            data: Some(STANDARD.encode(payload)),
            attributes: HashMap::new(),
            publish_time: None,
            delivery_attempt: None,
        }
    }

    /// Decoded payload. A message without data has an empty payload.
    pub fn payload(&self) -> QueueResult<Vec<u8>> {
        match self.data.as_deref() {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map_err(|e| QueueError::invalid_message(&self.message_id, e.to_string())),
            None => Ok(Vec::new()),
        }
    }
}

impl From<WireReceivedMessage> for ReceivedMessage {
    fn from(wire: WireReceivedMessage) -> Self {
        Self {
            ack_id: wire.ack_id,
            message_id: wire.message.message_id,
            data: wire.message.data,
            attributes: wire.message.attributes,
            publish_time: wire.message.publish_time,
            delivery_attempt: wire.delivery_attempt,
        }
    }
}

/// A pull subscription.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Subscription name, for logging.
    fn name(&self) -> &str;

    /// Fetch the subscription's delivery settings.
    async fn fetch_config(&self) -> QueueResult<SubscriptionConfig>;

    /// Pull up to `max_messages`; an empty vec means nothing was available.
    async fn pull(&self, max_messages: u32) -> QueueResult<Vec<ReceivedMessage>>;

    /// Remove the message from the subscription.
    async fn ack(&self, ack_id: &str) -> QueueResult<()>;

    /// Make the message immediately eligible for redelivery.
    async fn nack(&self, ack_id: &str) -> QueueResult<()>;

    /// Push the message's ack deadline `seconds` into the future.
    async fn extend_deadline(&self, ack_id: &str, seconds: u32) -> QueueResult<()>;
}
