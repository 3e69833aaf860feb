//! In-process broker used for tests, simulations and single-host deployments

use super::{MessageBroker, Subscription};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Default per-subscriber queue depth
pub const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out broker keeping one bounded queue per subscriber
#[derive(Clone)]
pub struct InMemoryBroker {
    channels: Arc<Mutex<HashMap<String, Vec<mpsc::Sender<String>>>>>,
    capacity: usize,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Number of live subscribers on a channel
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        let channels = self.channels.lock().await;
        channels
            .get(channel)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, channel: &str, message: String) -> Result<()> {
        // Snapshot senders so a full queue never blocks other channels
        let senders: Vec<mpsc::Sender<String>> = {
            let mut channels = self.channels.lock().await;
            match channels.get_mut(channel) {
                Some(subs) => {
                    subs.retain(|tx| !tx.is_closed());
                    subs.clone()
                }
                None => Vec::new(),
            }
        };

        for tx in senders {
            // A subscriber that went away between snapshot and send is not an error
            if tx.send(message.clone()).await.is_err() {
                tracing::debug!(channel = %channel, "Subscriber closed during publish");
            }
        }

        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        if channel.is_empty() {
            return Err(Error::Transport("channel name must not be empty".to_string()));
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        let mut channels = self.channels.lock().await;
        channels.entry(channel.to_string()).or_default().push(tx);

        Ok(Subscription::new(channel, rx))
    }
}
