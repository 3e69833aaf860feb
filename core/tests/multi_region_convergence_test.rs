//! Integration tests for multi-region convergence over a shared broker
//!
//! Every region runs a full `RegionContext` on one `InMemoryBroker`. Regions
//! write locally, publish snapshots, and must converge to identical replicas
//! regardless of delivery order or duplication.

use georeplica_core::crdt::{divergent_keys, CrdtFactory, CrdtOp, OrSet, PnCounter, ReplicaValue};
use georeplica_core::sync::SyncMessage;
use georeplica_core::transport::{InMemoryBroker, MessageBroker};
use georeplica_core::{RegionConfig, RegionContext, RegionId};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

const REGIONS: [&str; 3] = ["us-east-1", "us-west-2", "eu-west-1"];

async fn start_regions(broker: &InMemoryBroker) -> anyhow::Result<Vec<RegionContext>> {
    let factory = Arc::new(CrdtFactory::standard());
    let mut regions = Vec::new();

    for region in REGIONS {
        let mut config = RegionConfig::default();
        config.region_id = RegionId::from(region);
        let ctx = RegionContext::build(config, Arc::new(broker.clone())).await?;

        ctx.sync()
            .register_crdt("views", PnCounter::new(), Arc::clone(&factory))
            .await;
        ctx.sync()
            .register_crdt("members", OrSet::new(), Arc::clone(&factory))
            .await;
        regions.push(ctx);
    }

    Ok(regions)
}

/// Wait until every region reports the same digests for every key
async fn wait_converged(regions: &[RegionContext]) -> anyhow::Result<()> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let first = regions[0].sync().digests().await;
            let mut converged = true;
            for ctx in &regions[1..] {
                if !divergent_keys(&first, &ctx.sync().digests().await).is_empty() {
                    converged = false;
                }
            }
            if converged {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    Ok(())
}

async fn shutdown_all(regions: &[RegionContext]) {
    for ctx in regions {
        ctx.shutdown().await;
    }
}

#[tokio::test]
async fn test_three_regions_converge() -> anyhow::Result<()> {
    let broker = InMemoryBroker::new();
    let regions = start_regions(&broker).await?;

    for (i, ctx) in regions.iter().enumerate() {
        ctx.sync().apply("views", CrdtOp::Increment(10 * (i as u64 + 1))).await?;
        ctx.sync().apply("members", CrdtOp::Add(format!("user-{i}"))).await?;
    }
    regions[2].sync().apply("views", CrdtOp::Decrement(5)).await?;

    for ctx in &regions {
        ctx.sync().sync_all().await?;
    }
    wait_converged(&regions).await?;

    let expected_members: BTreeSet<String> = (0..3).map(|i| format!("user-{i}")).collect();
    for ctx in &regions {
        assert_eq!(ctx.sync().value("views").await?, ReplicaValue::Signed(55));
        assert_eq!(
            ctx.sync().value("members").await?,
            ReplicaValue::Members(expected_members.clone())
        );
    }

    shutdown_all(&regions).await;
    Ok(())
}

#[tokio::test]
async fn test_removed_member_not_resurrected_by_stale_snapshot() -> anyhow::Result<()> {
    let broker = InMemoryBroker::new();
    let regions = start_regions(&broker).await?;
    let (east, west) = (&regions[0], &regions[1]);

    east.sync().apply("members", CrdtOp::Add("x".into())).await?;
    let stale = SyncMessage::snapshot(east.sync().region().clone(), "members", &east.sync().state("members").await?);

    east.sync().sync("members").await?;
    wait_converged(&regions).await?;

    // West removes x; everyone converges on the tombstone
    west.sync().apply("members", CrdtOp::Remove("x".into())).await?;
    west.sync().sync("members").await?;
    wait_converged(&regions).await?;

    // Redelivery of east's pre-removal snapshot must not bring x back
    broker.publish(west.sync().channel(), stale.encode()?).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    for ctx in &regions {
        assert_eq!(ctx.sync().value("members").await?, ReplicaValue::Members(BTreeSet::new()));
    }

    // A fresh add under a new tag survives
    regions[2].sync().apply("members", CrdtOp::Add("x".into())).await?;
    regions[2].sync().sync("members").await?;
    wait_converged(&regions).await?;
    for ctx in &regions {
        assert_eq!(
            ctx.sync().value("members").await?,
            ReplicaValue::Members(BTreeSet::from(["x".to_string()]))
        );
    }

    shutdown_all(&regions).await;
    Ok(())
}

#[tokio::test]
async fn test_duplicates_and_noise_are_harmless() -> anyhow::Result<()> {
    let broker = InMemoryBroker::new();
    let regions = start_regions(&broker).await?;
    let channel = regions[0].sync().channel().to_string();

    regions[0].sync().apply("views", CrdtOp::Increment(7)).await?;
    for _ in 0..3 {
        regions[0].sync().sync("views").await?;
    }

    broker.publish(&channel, "not json".to_string()).await?;
    broker
        .publish(
            &channel,
            json!({"originRegion": "ap-south-1", "key": "unknown", "state": {}, "type": "g-counter"})
                .to_string(),
        )
        .await?;
    broker
        .publish(
            &channel,
            json!({"originRegion": "ap-south-1", "key": "views", "state": {}, "type": "mystery"})
                .to_string(),
        )
        .await?;

    wait_converged(&regions).await?;
    for ctx in &regions {
        assert_eq!(ctx.sync().value("views").await?, ReplicaValue::Signed(7));
    }

    shutdown_all(&regions).await;
    Ok(())
}

#[tokio::test]
async fn test_divergence_feeds_health_and_safe_mode() -> anyhow::Result<()> {
    let broker = InMemoryBroker::new();
    let regions = start_regions(&broker).await?;
    let east = &regions[0];

    // Local write not yet gossiped
    east.sync().apply("views", CrdtOp::Increment(1)).await?;
    let diverged = divergent_keys(
        &east.sync().digests().await,
        &regions[1].sync().digests().await,
    );
    assert_eq!(diverged, vec!["views".to_string()]);

    east.health().record_divergence(diverged.len() as u64);
    assert!(east.health().should_block_expansion());
    east.health().enable_safe_mode();
    assert!(east.health().is_safe_mode());

    east.sync().sync_all().await?;
    wait_converged(&regions).await?;

    east.health().record_divergence(0);
    east.health().mark_reconciled();
    east.health().disable_safe_mode();
    assert!(!east.health().should_block_expansion());
    assert!(!east.health().is_safe_mode());
    assert!(east.health().refresh().last_reconciled_at.is_some());

    shutdown_all(&regions).await;
    Ok(())
}

#[tokio::test]
async fn test_anti_entropy_converges_without_explicit_sync() -> anyhow::Result<()> {
    let broker = InMemoryBroker::new();
    let factory = Arc::new(CrdtFactory::standard());
    let mut regions = Vec::new();

    for region in ["us-east-1", "us-west-2"] {
        let config = RegionConfig::from_json_str(&format!(
            r#"{{"region_id": "{region}", "sync": {{"anti_entropy_interval_ms": 20, "jitter_ms": 5}}}}"#
        ))?;
        let ctx = RegionContext::build(config, Arc::new(broker.clone())).await?;
        ctx.sync()
            .register_crdt("views", PnCounter::new(), Arc::clone(&factory))
            .await;
        regions.push(ctx);
    }

    regions[0].sync().apply("views", CrdtOp::Increment(4)).await?;
    regions[1].sync().apply("views", CrdtOp::Increment(6)).await?;

    wait_converged(&regions).await?;
    for ctx in &regions {
        assert_eq!(ctx.sync().value("views").await?, ReplicaValue::Signed(10));
    }

    shutdown_all(&regions).await;
    Ok(())
}
