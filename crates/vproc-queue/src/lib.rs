//! Pub/Sub pull subscription client.
//!
//! This crate provides:
//! - The [`Subscription`] seam consumed by the queue listener
//! - A REST client for pull, acknowledge and ack-deadline changes
//! - Push-delivery detection so a misconfigured subscription fails at startup

pub mod client;
pub mod error;
pub mod metrics;
pub mod subscription;
pub mod types;

pub use client::{PubSubClient, PubSubConfig};
pub use error::{QueueError, QueueResult};
pub use subscription::{ReceivedMessage, Subscription, SubscriptionConfig};
