//! Gossip metrics and monitoring
//!
//! Tracks snapshot propagation per channel: publishes, receipts, echo
//! suppression, dropped payloads and applied merges.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Metrics for a specific channel
#[derive(Debug, Clone)]
pub struct ChannelMetrics {
    /// Channel name
    pub channel: String,

    /// Number of snapshots published
    pub messages_published: u64,

    /// Number of messages received from other regions
    pub messages_received: u64,

    /// Own messages discarded on receipt (loop prevention)
    pub echoes_suppressed: u64,

    /// Messages dropped as malformed, unknown key or unknown type
    pub messages_dropped: u64,

    /// Merges applied to local replicas
    pub merges_applied: u64,

    /// Last activity timestamp
    pub last_activity: Instant,
}

impl ChannelMetrics {
    pub fn new(channel: String) -> Self {
        Self {
            channel,
            messages_published: 0,
            messages_received: 0,
            echoes_suppressed: 0,
            messages_dropped: 0,
            merges_applied: 0,
            last_activity: Instant::now(),
        }
    }
}

/// Gossip monitoring and statistics
#[derive(Debug, Clone)]
pub struct GossipMetrics {
    metrics: Arc<RwLock<HashMap<String, ChannelMetrics>>>,
}

impl GossipMetrics {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn update(&self, channel: &str, f: impl FnOnce(&mut ChannelMetrics)) {
        let mut metrics = self.metrics.write().await;
        let entry = metrics
            .entry(channel.to_string())
            .or_insert_with(|| ChannelMetrics::new(channel.to_string()));
        f(entry);
        entry.last_activity = Instant::now();
    }

    /// Record a snapshot published
    pub async fn record_publish(&self, channel: &str) {
        self.update(channel, |m| m.messages_published += 1).await;
    }

    /// Record a message received from another region
    pub async fn record_receive(&self, channel: &str) {
        self.update(channel, |m| m.messages_received += 1).await;
    }

    /// Record an own message discarded on receipt
    pub async fn record_echo(&self, channel: &str) {
        self.update(channel, |m| m.echoes_suppressed += 1).await;
    }

    /// Record a message dropped before merge
    pub async fn record_drop(&self, channel: &str) {
        self.update(channel, |m| m.messages_dropped += 1).await;
    }

    /// Record a merge applied to a local replica
    pub async fn record_merge(&self, channel: &str) {
        self.update(channel, |m| m.merges_applied += 1).await;
    }

    /// Get metrics for a specific channel
    pub async fn get_channel_metrics(&self, channel: &str) -> Option<ChannelMetrics> {
        let metrics = self.metrics.read().await;
        metrics.get(channel).cloned()
    }

    /// Get all channel metrics
    pub async fn get_all_metrics(&self) -> Vec<ChannelMetrics> {
        let metrics = self.metrics.read().await;
        metrics.values().cloned().collect()
    }

    /// Emit a summary of every channel at info level
    pub async fn log_summary(&self) {
        let metrics = self.metrics.read().await;

        for (channel, stats) in metrics.iter() {
            tracing::info!(
                channel = %channel,
                published = stats.messages_published,
                received = stats.messages_received,
                echoes = stats.echoes_suppressed,
                dropped = stats.messages_dropped,
                merges = stats.merges_applied,
                idle_ms = stats.last_activity.elapsed().as_millis() as u64,
                "Gossip channel summary"
            );
        }
    }

    /// Clear old channel metrics (cleanup)
    pub async fn cleanup_old_metrics(&self, max_age: Duration) {
        let mut metrics = self.metrics.write().await;
        let now = Instant::now();

        metrics.retain(|_, stats| now.duration_since(stats.last_activity) < max_age);
    }
}

impl Default for GossipMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters_per_channel() {
        let metrics = GossipMetrics::new();
        metrics.record_publish("sync").await;
        metrics.record_receive("sync").await;
        metrics.record_receive("sync").await;
        metrics.record_echo("sync").await;
        metrics.record_drop("other").await;

        let sync = metrics.get_channel_metrics("sync").await.unwrap();
        assert_eq!(sync.messages_published, 1);
        assert_eq!(sync.messages_received, 2);
        assert_eq!(sync.echoes_suppressed, 1);
        assert_eq!(sync.messages_dropped, 0);
        assert_eq!(metrics.get_all_metrics().await.len(), 2);
    }

    #[tokio::test]
    async fn test_cleanup_old_metrics() {
        let metrics = GossipMetrics::new();
        metrics.record_publish("sync").await;

        metrics.cleanup_old_metrics(Duration::ZERO).await;
        assert!(metrics.get_channel_metrics("sync").await.is_none());
    }
}
