//! Region context
//!
//! Constructs every process-wide component of a region once at startup and
//! hands out shared references. Nothing in the crate is a global static, so
//! tests can build as many independent regions as they need.

use crate::audit::{AppendLog, MemoryLog};
use crate::config::RegionConfig;
use crate::failover::FailoverService;
use crate::health::{HealthService, RegionHealthTable};
use crate::storage::{InMemoryConsistencyStore, ReportStore, Storage};
use crate::sync::SyncService;
use crate::transport::MessageBroker;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;

/// All components of one regional deployment
pub struct RegionContext {
    config: RegionConfig,
    health_table: Arc<RegionHealthTable>,
    health: Arc<HealthService>,
    failover: Arc<FailoverService>,
    sync: Arc<SyncService>,
    storage: Option<Storage>,
    reports: Arc<dyn ReportStore>,
    log: Arc<dyn AppendLog>,
}

impl RegionContext {
    /// Validate the config, construct every component and start background tasks
    pub async fn build(config: RegionConfig, broker: Arc<dyn MessageBroker>) -> Result<Self> {
        config.validate()?;

        let health_table = Arc::new(RegionHealthTable::new());
        let health = HealthService::new(&config, Arc::clone(&health_table));
        let failover = Arc::new(FailoverService::new(
            config.dr_table()?,
            Arc::clone(&health_table),
        ));

        let (storage, reports, log): (Option<Storage>, Arc<dyn ReportStore>, Arc<dyn AppendLog>) =
            match &config.storage_path {
                Some(path) => {
                    let storage = Storage::open(path)?;
                    let reports: Arc<dyn ReportStore> = Arc::new(storage.consistency_store());
                    let log: Arc<dyn AppendLog> = Arc::new(storage.durable_log()?);
                    (Some(storage), reports, log)
                }
                None => {
                    let reports: Arc<dyn ReportStore> = Arc::new(InMemoryConsistencyStore::new());
                    let log: Arc<dyn AppendLog> = Arc::new(MemoryLog::new());
                    (None, reports, log)
                }
            };

        let sync = SyncService::new(config.region_id.clone(), broker, &config.sync);
        sync.start().await?;
        if let Some(ms) = config.sync.anti_entropy_interval_ms {
            sync.spawn_anti_entropy(
                Duration::from_millis(ms),
                Duration::from_millis(config.sync.jitter_ms),
            )
            .await;
        }
        health.spawn_refresher().await;

        tracing::info!(
            region = %config.region_id,
            primary = config.is_primary,
            dr_pairs = config.dr_pairs.len(),
            durable = storage.is_some(),
            "Region context ready"
        );

        Ok(Self {
            config,
            health_table,
            health,
            failover,
            sync,
            storage,
            reports,
            log,
        })
    }

    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    pub fn health_table(&self) -> &Arc<RegionHealthTable> {
        &self.health_table
    }

    pub fn health(&self) -> &Arc<HealthService> {
        &self.health
    }

    pub fn failover(&self) -> &Arc<FailoverService> {
        &self.failover
    }

    pub fn sync(&self) -> &Arc<SyncService> {
        &self.sync
    }

    pub fn storage(&self) -> Option<&Storage> {
        self.storage.as_ref()
    }

    pub fn reports(&self) -> &Arc<dyn ReportStore> {
        &self.reports
    }

    pub fn log(&self) -> &Arc<dyn AppendLog> {
        &self.log
    }

    /// Stop background tasks; no sync message is processed after this returns
    pub async fn shutdown(&self) {
        self.sync.shutdown().await;
        self.health.shutdown().await;
        tracing::info!(region = %self.config.region_id, "Region context shut down");
    }
}
