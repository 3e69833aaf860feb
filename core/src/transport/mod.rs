//! Publish/subscribe transport between regions
//!
//! The core only assumes at-least-once delivery: messages may arrive duplicated
//! or reordered. Subscriptions are bounded channels, so a slow subscriber applies
//! backpressure to publishers instead of growing an unbounded queue.

pub mod gossip_metrics;
pub mod memory;

pub use gossip_metrics::{ChannelMetrics, GossipMetrics};
pub use memory::InMemoryBroker;

use crate::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Message broker contract shared by all regions
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish a message to every current subscriber of `channel`
    async fn publish(&self, channel: &str, message: String) -> Result<()>;

    /// Subscribe to `channel`; dropping the subscription unsubscribes
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}

/// Receiving end of a channel subscription
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    rx: mpsc::Receiver<String>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, rx: mpsc::Receiver<String>) -> Self {
        Self {
            channel: channel.into(),
            rx,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next message, or `None` once the broker side is gone
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Stop receiving; messages already queued are discarded
    pub fn close(&mut self) {
        self.rx.close();
    }
}
