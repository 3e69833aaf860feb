//! Cross-region sync service
//!
//! One instance per region. Owns the region's named replicas, publishes their
//! snapshots on a shared channel and merges snapshots published by other
//! regions. Merges are serialized per key; because merge is commutative and
//! idempotent, duplicated or reordered deliveries are harmless and no causal
//! ordering is tracked.

pub mod message;

pub use message::{MergeOutcome, SyncEvent, SyncMessage};

use crate::config::SyncSettings;
use crate::crdt::{CrdtFactory, CrdtOp, LocalWriter, ReplicaDigest, ReplicaState, ReplicaValue};
use crate::transport::{GossipMetrics, MessageBroker, Subscription};
use crate::types::RegionId;
use crate::{Error, Result};
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

/// A registered replica and the factory able to decode its remote snapshots
struct ReplicaSlot {
    state: ReplicaState,
    factory: Arc<CrdtFactory>,
}

/// Per-region replica owner and gossip endpoint
pub struct SyncService {
    region: RegionId,
    writer: LocalWriter,
    channel: String,
    broker: Arc<dyn MessageBroker>,

    /// Key -> slot; each slot has its own lock so merges are serialized per key
    replicas: RwLock<HashMap<String, Arc<Mutex<ReplicaSlot>>>>,

    events: broadcast::Sender<SyncEvent>,
    metrics: GossipMetrics,

    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncService {
    pub fn new(region: RegionId, broker: Arc<dyn MessageBroker>, settings: &SyncSettings) -> Arc<Self> {
        // Lagging event subscribers lose the oldest events past this depth
        let (events, _) = broadcast::channel(settings.channel_capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            writer: LocalWriter::new(region.clone()),
            region,
            channel: settings.channel.clone(),
            broker,
            replicas: RwLock::new(HashMap::new()),
            events,
            metrics: GossipMetrics::new(),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn region(&self) -> &RegionId {
        &self.region
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn metrics(&self) -> &GossipMetrics {
        &self.metrics
    }

    /// Receive a `SyncEvent` for every merge applied after this call
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Register a replica with its reconstruction factory
    ///
    /// Re-registering a key replaces the previous instance: last registration wins.
    pub async fn register_crdt(
        &self,
        key: impl Into<String>,
        initial: impl Into<ReplicaState>,
        factory: Arc<CrdtFactory>,
    ) {
        let key = key.into();
        let state = initial.into();

        tracing::debug!(
            region = %self.region,
            key = %key,
            crdt = state.type_tag(),
            "Registered replica"
        );

        let slot = Arc::new(Mutex::new(ReplicaSlot { state, factory }));
        self.replicas.write().await.insert(key, slot);
    }

    async fn slot(&self, key: &str) -> Option<Arc<Mutex<ReplicaSlot>>> {
        self.replicas.read().await.get(key).cloned()
    }

    async fn slot_or_err(&self, key: &str) -> Result<Arc<Mutex<ReplicaSlot>>> {
        self.slot(key)
            .await
            .ok_or_else(|| Error::UnknownKey(key.to_string()))
    }

    /// Apply a local operation to a replica, returning its new value
    pub async fn apply(&self, key: &str, op: CrdtOp) -> Result<ReplicaValue> {
        let slot = self.slot_or_err(key).await?;
        let mut slot = slot.lock().await;
        slot.state.apply(op, &self.writer)?;
        Ok(slot.state.value())
    }

    pub async fn value(&self, key: &str) -> Result<ReplicaValue> {
        let slot = self.slot_or_err(key).await?;
        let value = slot.lock().await.state.value();
        Ok(value)
    }

    /// Copy of a replica's current state
    pub async fn state(&self, key: &str) -> Result<ReplicaState> {
        let slot = self.slot_or_err(key).await?;
        let state = slot.lock().await.state.clone();
        Ok(state)
    }

    /// Registered keys, sorted
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.replicas.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// State digest of every replica, for divergence checks against other regions
    pub async fn digests(&self) -> BTreeMap<String, ReplicaDigest> {
        let slots: Vec<(String, Arc<Mutex<ReplicaSlot>>)> = self
            .replicas
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut digests = BTreeMap::new();
        for (key, slot) in slots {
            digests.insert(key, slot.lock().await.state.digest());
        }
        digests
    }

    /// Publish the current snapshot of `key`
    pub async fn sync(&self, key: &str) -> Result<()> {
        if self.is_shut_down() {
            return Err(Error::Shutdown);
        }

        let slot = self.slot_or_err(key).await?;
        let message = {
            let slot = slot.lock().await;
            SyncMessage::snapshot(self.region.clone(), key, &slot.state)
        };

        self.broker.publish(&self.channel, message.encode()?).await?;
        self.metrics.record_publish(&self.channel).await;

        tracing::debug!(region = %self.region, key = %key, "Published snapshot");
        Ok(())
    }

    /// Publish every registered replica (one anti-entropy round)
    ///
    /// A key that fails to publish is logged and skipped; the rest of the round
    /// still goes out. Returns the number of snapshots published.
    pub async fn sync_all(&self) -> Result<usize> {
        let mut published = 0;
        for key in self.keys().await {
            match self.sync(&key).await {
                Ok(()) => published += 1,
                Err(Error::Shutdown) => return Err(Error::Shutdown),
                Err(e) => tracing::warn!(
                    region = %self.region,
                    key = %key,
                    error = %e,
                    "Failed to publish snapshot"
                ),
            }
        }
        Ok(published)
    }

    /// Handle one inbound payload from the shared channel
    ///
    /// Never fails: every remote-input problem is logged and the message dropped.
    pub async fn handle_message(&self, raw: &str) -> MergeOutcome {
        if self.is_shut_down() {
            return MergeOutcome::ShutDown;
        }

        let message = match SyncMessage::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(region = %self.region, error = %e, "Dropping malformed sync message");
                self.metrics.record_drop(&self.channel).await;
                return MergeOutcome::Malformed(e);
            }
        };

        if message.origin_region == self.region {
            self.metrics.record_echo(&self.channel).await;
            return MergeOutcome::EchoSuppressed;
        }

        self.metrics.record_receive(&self.channel).await;

        let outcome = self.merge_remote(message).await;
        if outcome.is_merged() {
            self.metrics.record_merge(&self.channel).await;
        } else {
            self.metrics.record_drop(&self.channel).await;
        }
        outcome
    }

    async fn merge_remote(&self, message: SyncMessage) -> MergeOutcome {
        let SyncMessage {
            origin_region,
            key,
            state,
            type_tag,
        } = message;

        let Some(slot) = self.slot(&key).await else {
            tracing::warn!(
                region = %self.region,
                origin = %origin_region,
                key = %key,
                "Dropping snapshot for unregistered key"
            );
            return MergeOutcome::UnknownKey(key);
        };

        // Decode, merge and replace under the key's lock so concurrent
        // snapshots for the same key cannot lose each other's updates
        let mut slot = slot.lock().await;

        if !slot.factory.supports(&type_tag) {
            tracing::warn!(
                region = %self.region,
                origin = %origin_region,
                key = %key,
                crdt = %type_tag,
                "Dropping snapshot with unknown type tag"
            );
            return MergeOutcome::UnknownType { key, type_tag };
        }

        let remote = match slot.factory.decode(&type_tag, &state) {
            Ok(remote) => remote,
            Err(e) => {
                tracing::warn!(
                    region = %self.region,
                    origin = %origin_region,
                    key = %key,
                    error = %e,
                    "Dropping invalid snapshot state"
                );
                return MergeOutcome::Malformed(e);
            }
        };

        let merged = match slot.state.merge(&remote) {
            Ok(merged) => merged,
            Err(_) => {
                let expected = slot.state.type_tag().to_string();
                tracing::warn!(
                    region = %self.region,
                    origin = %origin_region,
                    key = %key,
                    expected = %expected,
                    actual = %type_tag,
                    "Dropping snapshot of mismatched type"
                );
                return MergeOutcome::TypeMismatch {
                    key,
                    expected,
                    actual: type_tag,
                };
            }
        };

        slot.state = merged;
        let value = slot.state.value();
        drop(slot);

        tracing::debug!(region = %self.region, origin = %origin_region, key = %key, "Merged remote snapshot");

        // No event subscribers is fine
        let _ = self.events.send(SyncEvent::Merged {
            key: key.clone(),
            value: value.clone(),
            origin_region,
        });

        MergeOutcome::Merged { key, value }
    }

    /// Subscribe to the shared channel and merge inbound snapshots in the background
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.is_shut_down() {
            return Err(Error::Shutdown);
        }

        let subscription = self.broker.subscribe(&self.channel).await?;
        let handle = tokio::spawn(Arc::clone(self).run(subscription));
        self.tasks.lock().await.push(handle);

        tracing::info!(region = %self.region, channel = %self.channel, "Sync service started");
        Ok(())
    }

    async fn run(self: Arc<Self>, mut subscription: Subscription) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => break,

                message = subscription.recv() => match message {
                    Some(raw) => {
                        self.handle_message(&raw).await;
                    }
                    None => {
                        tracing::warn!(region = %self.region, "Sync subscription closed by broker");
                        break;
                    }
                },
            }
        }

        subscription.close();
        tracing::debug!(region = %self.region, "Sync subscription stopped");
    }

    /// Publish every replica periodically, with random jitter per round
    pub async fn spawn_anti_entropy(self: &Arc<Self>, interval: Duration, jitter: Duration) {
        let this = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                let jitter_ms = if jitter.is_zero() {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=jitter.as_millis() as u64)
                };
                let delay = interval + Duration::from_millis(jitter_ms);

                tokio::select! {
                    biased;

                    _ = shutdown_rx.changed() => break,

                    _ = tokio::time::sleep(delay) => {
                        match this.sync_all().await {
                            Ok(published) => tracing::debug!(
                                region = %this.region,
                                published,
                                "Anti-entropy round complete"
                            ),
                            Err(Error::Shutdown) => break,
                            Err(e) => tracing::warn!(
                                region = %this.region,
                                error = %e,
                                "Anti-entropy round failed"
                            ),
                        }
                    }
                }
            }
        });

        self.tasks.lock().await.push(handle);
    }

    /// Stop background tasks and wait for them
    ///
    /// Once this returns no further inbound message is processed.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(region = %self.region, error = %e, "Sync task ended abnormally");
            }
        }

        self.metrics.log_summary().await;
        tracing::info!(region = %self.region, "Sync service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::{GCounter, OrSet, PnCounter};
    use crate::transport::InMemoryBroker;
    use async_trait::async_trait;
    use serde_json::json;

    /// Broker that refuses snapshots of keys named `flaky`
    struct FlakyBroker(InMemoryBroker);

    #[async_trait]
    impl MessageBroker for FlakyBroker {
        async fn publish(&self, channel: &str, message: String) -> Result<()> {
            if message.contains("flaky") {
                return Err(Error::Transport("publish refused".to_string()));
            }
            self.0.publish(channel, message).await
        }

        async fn subscribe(&self, channel: &str) -> Result<Subscription> {
            self.0.subscribe(channel).await
        }
    }

    fn service(region: &str, broker: &InMemoryBroker) -> Arc<SyncService> {
        SyncService::new(
            RegionId::from(region),
            Arc::new(broker.clone()),
            &SyncSettings::default(),
        )
    }

    fn counter_message(origin: &str, key: &str, counts: serde_json::Value) -> String {
        json!({"originRegion": origin, "key": key, "state": counts, "type": "g-counter"}).to_string()
    }

    #[tokio::test]
    async fn test_merge_remote_snapshot() {
        let broker = InMemoryBroker::new();
        let svc = service("us-east-1", &broker);
        let factory = Arc::new(CrdtFactory::standard());
        svc.register_crdt("views", GCounter::from_counts([("us-east-1", 3)]), factory)
            .await;

        let mut events = svc.subscribe_events();
        let outcome = svc
            .handle_message(&counter_message("us-west-2", "views", json!({"us-east-1": 1, "us-west-2": 2})))
            .await;

        assert_eq!(
            outcome,
            MergeOutcome::Merged {
                key: "views".to_string(),
                value: ReplicaValue::Count(5)
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            SyncEvent::Merged {
                key: "views".to_string(),
                value: ReplicaValue::Count(5),
                origin_region: RegionId::from("us-west-2"),
            }
        );
        assert_eq!(
            svc.state("views").await.unwrap(),
            ReplicaState::from(GCounter::from_counts([("us-east-1", 3), ("us-west-2", 2)]))
        );
    }

    #[tokio::test]
    async fn test_echo_is_suppressed() {
        let broker = InMemoryBroker::new();
        let svc = service("us-east-1", &broker);
        svc.register_crdt("views", GCounter::new(), Arc::new(CrdtFactory::standard()))
            .await;
        let mut events = svc.subscribe_events();

        let outcome = svc
            .handle_message(&counter_message("us-east-1", "views", json!({"us-east-1": 99})))
            .await;

        assert_eq!(outcome, MergeOutcome::EchoSuppressed);
        assert_eq!(svc.value("views").await.unwrap(), ReplicaValue::Count(0));
        assert!(events.try_recv().is_err());

        let metrics = svc.metrics().get_channel_metrics(svc.channel()).await.unwrap();
        assert_eq!(metrics.echoes_suppressed, 1);
        assert_eq!(metrics.merges_applied, 0);
    }

    #[tokio::test]
    async fn test_bad_input_is_dropped() {
        let broker = InMemoryBroker::new();
        let svc = service("us-east-1", &broker);
        svc.register_crdt("views", GCounter::new(), Arc::new(CrdtFactory::new().with::<GCounter>()))
            .await;

        assert!(matches!(svc.handle_message("{{garbage").await, MergeOutcome::Malformed(_)));
        assert_eq!(
            svc.handle_message(&counter_message("eu-west-1", "unknown", json!({}))).await,
            MergeOutcome::UnknownKey("unknown".to_string())
        );

        let set_snapshot = json!({
            "originRegion": "eu-west-1",
            "key": "views",
            "state": {"addTags": [], "removeTags": []},
            "type": "or-set"
        })
        .to_string();
        assert!(matches!(
            svc.handle_message(&set_snapshot).await,
            MergeOutcome::UnknownType { .. }
        ));

        assert!(matches!(
            svc.handle_message(&counter_message("eu-west-1", "views", json!({"a": -4}))).await,
            MergeOutcome::Malformed(_)
        ));

        assert_eq!(svc.value("views").await.unwrap(), ReplicaValue::Count(0));
    }

    #[tokio::test]
    async fn test_type_mismatch_is_dropped() {
        let broker = InMemoryBroker::new();
        let svc = service("us-east-1", &broker);
        svc.register_crdt("tags", OrSet::new(), Arc::new(CrdtFactory::standard()))
            .await;

        let outcome = svc
            .handle_message(&counter_message("eu-west-1", "tags", json!({"eu-west-1": 1})))
            .await;
        assert!(matches!(outcome, MergeOutcome::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_sync_unknown_key() {
        let broker = InMemoryBroker::new();
        let svc = service("us-east-1", &broker);

        assert!(matches!(svc.sync("missing").await, Err(Error::UnknownKey(_))));
    }

    #[tokio::test]
    async fn test_reregistration_overwrites() {
        let broker = InMemoryBroker::new();
        let svc = service("us-east-1", &broker);
        let factory = Arc::new(CrdtFactory::standard());

        svc.register_crdt("k", GCounter::from_counts([("us-east-1", 7)]), factory.clone())
            .await;
        svc.register_crdt("k", PnCounter::new(), factory).await;

        assert_eq!(svc.value("k").await.unwrap(), ReplicaValue::Signed(0));
        assert_eq!(svc.keys().await, vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_merges_do_not_lose_updates() {
        let broker = InMemoryBroker::new();
        let svc = service("hub", &broker);
        svc.register_crdt("views", GCounter::new(), Arc::new(CrdtFactory::standard()))
            .await;

        let mut handles = Vec::new();
        for i in 0..16 {
            let svc = Arc::clone(&svc);
            handles.push(tokio::spawn(async move {
                let region = format!("region-{i}");
                let mut counts = serde_json::Map::new();
                counts.insert(region.clone(), json!(i as u64 + 1));
                let message = counter_message(&region, "views", serde_json::Value::Object(counts));
                svc.handle_message(&message).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_merged());
        }

        // 1 + 2 + ... + 16
        assert_eq!(svc.value("views").await.unwrap(), ReplicaValue::Count(136));
    }

    #[tokio::test]
    async fn test_no_processing_after_shutdown() {
        let broker = InMemoryBroker::new();
        let svc = service("us-east-1", &broker);
        svc.register_crdt("views", GCounter::new(), Arc::new(CrdtFactory::standard()))
            .await;
        svc.start().await.unwrap();
        svc.shutdown().await;

        assert_eq!(
            svc.handle_message(&counter_message("us-west-2", "views", json!({"us-west-2": 1}))).await,
            MergeOutcome::ShutDown
        );
        assert!(matches!(svc.sync("views").await, Err(Error::Shutdown)));
        assert_eq!(svc.value("views").await.unwrap(), ReplicaValue::Count(0));
    }

    #[tokio::test]
    async fn test_sync_all_continues_past_failed_key() {
        let broker = InMemoryBroker::new();
        let mut subscription = broker.subscribe(&SyncSettings::default().channel).await.unwrap();
        let svc = SyncService::new(
            RegionId::from("us-east-1"),
            Arc::new(FlakyBroker(broker.clone())),
            &SyncSettings::default(),
        );
        let factory = Arc::new(CrdtFactory::standard());
        svc.register_crdt("alpha", GCounter::new(), Arc::clone(&factory)).await;
        svc.register_crdt("flaky", GCounter::new(), Arc::clone(&factory)).await;
        svc.register_crdt("omega", GCounter::new(), factory).await;

        assert_eq!(svc.sync_all().await.unwrap(), 2);

        let mut keys = Vec::new();
        for _ in 0..2 {
            let raw = subscription.recv().await.unwrap();
            keys.push(SyncMessage::decode(&raw).unwrap().key);
        }
        keys.sort();
        assert_eq!(keys, vec!["alpha", "omega"]);
    }

    #[tokio::test]
    async fn test_event_queue_depth_follows_channel_capacity() {
        let broker = InMemoryBroker::new();
        let settings = SyncSettings {
            channel_capacity: 2,
            ..SyncSettings::default()
        };
        let svc = SyncService::new(RegionId::from("us-east-1"), Arc::new(broker), &settings);
        svc.register_crdt("views", GCounter::new(), Arc::new(CrdtFactory::standard()))
            .await;
        let mut events = svc.subscribe_events();

        for count in 1..=3 {
            let outcome = svc
                .handle_message(&counter_message("us-west-2", "views", json!({"us-west-2": count})))
                .await;
            assert!(matches!(outcome, MergeOutcome::Merged { .. }));
        }

        assert!(matches!(
            events.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
    }
}
