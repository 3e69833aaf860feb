//! Subcommand implementations

use crate::ui;
use anyhow::{bail, Context, Result};
use colored::Colorize;
use georeplica_core::audit::{
    AppendLog, GossipAuditor, LogAuditFetcher, MemoryLog, TracingAlertSink, TreeHeadPublisher,
    TreeHeadSigner,
};
use georeplica_core::crdt::{divergent_keys, CrdtFactory, CrdtOp, LwwRegister, OrSet, PnCounter};
use georeplica_core::failover::{FailoverDecision, FailoverService};
use georeplica_core::health::{HealthService, RegionHealthTable, RegionStatus};
use georeplica_core::storage::Storage;
use georeplica_core::transport::InMemoryBroker;
use georeplica_core::{RegionConfig, RegionContext, RegionId};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Count of keys each region disagrees with the first region on
async fn divergence(contexts: &[RegionContext]) -> Vec<usize> {
    let reference = contexts[0].sync().digests().await;
    let mut counts = Vec::with_capacity(contexts.len());
    for ctx in contexts {
        counts.push(divergent_keys(&reference, &ctx.sync().digests().await).len());
    }
    counts
}

pub async fn simulate(regions: Vec<String>, writes: u32) -> Result<()> {
    if regions.len() < 2 {
        bail!("simulate needs at least two regions");
    }

    let base = RegionConfig::default();
    let broker = InMemoryBroker::with_capacity(base.sync.channel_capacity);
    let factory = Arc::new(CrdtFactory::standard());
    let mut contexts = Vec::with_capacity(regions.len());

    for region in &regions {
        let mut config = base.clone();
        config.region_id = RegionId::from(region.as_str());
        let ctx = RegionContext::build(config, Arc::new(broker.clone())).await?;

        let sync = ctx.sync();
        sync.register_crdt("requests", PnCounter::new(), Arc::clone(&factory)).await;
        sync.register_crdt("sessions", OrSet::new(), Arc::clone(&factory)).await;
        sync.register_crdt("leader-note", LwwRegister::new(), Arc::clone(&factory)).await;
        contexts.push(ctx);
    }
    ui::print_success(&format!("Started {} regions", contexts.len()));

    for (round, (ctx, region)) in contexts.iter().zip(&regions).enumerate() {
        let sync = ctx.sync();
        for w in 0..writes {
            sync.apply("requests", CrdtOp::Increment(u64::from(w) + 1)).await?;
            sync.apply("sessions", CrdtOp::Add(format!("{region}/session-{w}"))).await?;
        }
        if writes > 1 {
            sync.apply("requests", CrdtOp::Decrement(1)).await?;
            sync.apply("sessions", CrdtOp::Remove(format!("{region}/session-0"))).await?;
        }
        sync.apply("leader-note", CrdtOp::Set(json!({"writer": region, "round": round})))
            .await?;
    }

    ui::print_section("Before gossip");
    for (ctx, diverged) in contexts.iter().zip(divergence(&contexts).await) {
        ui::print_field(ctx.sync().region().as_str(), format!("{diverged} divergent keys"));
    }

    for ctx in &contexts {
        ctx.sync().sync_all().await?;
    }

    tokio::time::timeout(CONVERGENCE_TIMEOUT, async {
        while divergence(&contexts).await.iter().any(|&n| n > 0) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("Regions did not converge")?;

    ui::print_section("After gossip");
    for ctx in &contexts {
        let sync = ctx.sync();
        println!("  {}", sync.region().as_str().bright_cyan().bold());
        for key in sync.keys().await {
            ui::print_field(&key, sync.value(&key).await?.to_json());
        }
    }

    println!();
    ui::print_success("All regions converged");

    for ctx in &contexts {
        ctx.shutdown().await;
    }
    Ok(())
}

pub fn resolve(
    region: &str,
    config: &Path,
    down: &[String],
    unhealthy: &[String],
    healthy: &[String],
) -> Result<()> {
    let config = RegionConfig::from_json_file(config)?;
    let table = Arc::new(RegionHealthTable::new());

    for (regions, status) in [
        (healthy, RegionStatus::Healthy),
        (unhealthy, RegionStatus::Unhealthy),
        (down, RegionStatus::Down),
    ] {
        for r in regions {
            table.report(r.as_str(), status);
        }
    }

    let failover = FailoverService::new(config.dr_table()?, Arc::clone(&table));

    ui::print_section("Region health");
    for (r, status) in table.snapshot() {
        ui::print_field(r.as_str(), ui::status(status));
    }

    ui::print_section("Failover");
    ui::print_field(
        "DR pair",
        failover
            .get_dr_pair(region)
            .map(|p| p.to_string())
            .unwrap_or_else(|| "none".to_string()),
    );

    let decision = failover.resolve(region);
    match &decision {
        FailoverDecision::Unchanged(r) => ui::print_success(&format!("{r} is serving")),
        FailoverDecision::FailedOver { from, to } => {
            ui::print_warning(&format!("{from} unavailable, failing over to {to}"))
        }
        FailoverDecision::NoPair(r) => {
            ui::print_warning(&format!("{r} unavailable and has no DR pair"))
        }
        FailoverDecision::Disaster { region, pair } => {
            ui::print_error(&format!("{region} and its DR pair {pair} are both unavailable"))
        }
    }
    ui::print_field("Route to", decision.target().as_str().bright_white().bold());
    Ok(())
}

pub fn health(config: Option<&Path>, lag_ms: u64, divergence: u64) -> Result<()> {
    let config = match config {
        Some(path) => RegionConfig::from_json_file(path)?,
        None => RegionConfig::default(),
    };

    let health = HealthService::new(&config, Arc::new(RegionHealthTable::new()));
    health.record_lag(lag_ms);
    health.record_divergence(divergence);
    let record = health.refresh();

    ui::print_section("Health");
    ui::print_field("Region", &record.region);
    ui::print_field("Status", ui::status(record.status));
    ui::print_field("Lag threshold (ms)", config.health.lag_threshold_ms);
    ui::print_field("Block expansion", health.should_block_expansion());

    println!();
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

pub async fn audit(data_dir: &Path, append: &[String], tamper: Option<u64>) -> Result<()> {
    let storage = Storage::open(data_dir)
        .with_context(|| format!("Failed to open {}", data_dir.display()))?;
    let log: Arc<dyn AppendLog> = Arc::new(storage.durable_log()?);

    for entry in append {
        let index = log.append(entry)?;
        ui::print_info(&format!("Appended entry {index}"));
    }

    let size = log.size();
    if size == 0 {
        ui::print_warning("Log is empty, nothing to audit");
        return Ok(());
    }

    if let Some(index) = tamper.filter(|&i| i >= size) {
        bail!("Cannot tamper with entry {index}: log has {size} entries");
    }

    // The publisher holds its own copy of the log
    let published = MemoryLog::new();
    for (index, entry) in log.range(0, size)?.into_iter().enumerate() {
        if tamper == Some(index as u64) {
            published.append(&format!("{entry} (altered)"))?;
        } else {
            published.append(&entry)?;
        }
    }

    let signer = TreeHeadSigner::generate();
    let publisher = TreeHeadPublisher::new(Arc::new(published), signer.clone());
    let sth = publisher.publish()?;

    let fetcher = Arc::new(LogAuditFetcher::new(Arc::clone(&log)));
    fetcher.receive_sth(sth.clone());
    let auditor = GossipAuditor::new(fetcher, Arc::new(TracingAlertSink))
        .with_publisher_key(signer.verifier());

    ui::print_section("Tree head");
    ui::print_field("Size", sth.size);
    ui::print_field("Root", sth.root);
    ui::print_field("Publisher key", hex::encode(signer.verifier().to_bytes()));

    let report = auditor.audit_once().await;
    println!();
    if report.ok {
        ui::print_success("Local log matches the published tree head");
    } else {
        ui::print_error("Local log does not match the published tree head");
    }
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.ok {
        bail!("Audit failed: local log does not match the tree head");
    }
    Ok(())
}
