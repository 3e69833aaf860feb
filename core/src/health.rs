//! Active-active health service
//!
//! Process-wide health and safe-mode state for one region. Lag and divergence
//! are measured elsewhere and fed in; this module owns the record shape, the
//! status thresholds and the safe-mode fence. Everything read on the request
//! path is an atomic or an in-memory map, never I/O.

use crate::config::{HealthThresholds, RegionConfig};
use crate::types::{unix_millis, RegionId};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Health status of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegionStatus {
    /// Lag within threshold and replicas agree
    Healthy,
    /// Lag within threshold but replicas diverge
    Degraded,
    /// Lag above threshold
    Unhealthy,
    /// Reported unreachable by external monitoring
    Down,
}

impl RegionStatus {
    /// Whether requests should be steered away from the region
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RegionStatus::Unhealthy | RegionStatus::Down)
    }

    /// Status from lag and divergence under the given thresholds
    pub fn classify(lag_ms: u64, divergence_count: u64, thresholds: &HealthThresholds) -> Self {
        if lag_ms > thresholds.lag_threshold_ms {
            RegionStatus::Unhealthy
        } else if divergence_count > 0 {
            RegionStatus::Degraded
        } else {
            RegionStatus::Healthy
        }
    }
}

impl fmt::Display for RegionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::Unhealthy => write!(f, "UNHEALTHY"),
            Self::Down => write!(f, "DOWN"),
        }
    }
}

/// Health snapshot of one region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionHealthRecord {
    pub region: RegionId,
    pub is_primary: bool,
    pub lag_ms: u64,
    pub divergence_count: u64,
    pub last_reconciled_at: Option<DateTime<Utc>>,
    pub status: RegionStatus,
}

/// Latest known status of every region, read by the request router
#[derive(Debug, Default)]
pub struct RegionHealthTable {
    statuses: RwLock<HashMap<RegionId, RegionStatus>>,
}

impl RegionHealthTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the status of a region (local refresher or external monitoring)
    pub fn report(&self, region: impl Into<RegionId>, status: RegionStatus) {
        let region = region.into();
        let mut statuses = self.statuses.write().unwrap_or_else(PoisonError::into_inner);
        let previous = statuses.insert(region.clone(), status);

        if previous != Some(status) {
            tracing::debug!(region = %region, status = %status, "Region status changed");
        }
    }

    /// Record a locally computed status. An externally reported `Down` is kept
    /// until monitoring reports the region again, since lag and divergence
    /// cannot tell that a region is unreachable. Returns the status in effect.
    pub fn report_local(&self, region: &RegionId, status: RegionStatus) -> RegionStatus {
        let mut statuses = self.statuses.write().unwrap_or_else(PoisonError::into_inner);
        match statuses.get(region).copied() {
            Some(RegionStatus::Down) => RegionStatus::Down,
            previous => {
                if previous != Some(status) {
                    tracing::debug!(region = %region, status = %status, "Region status changed");
                }
                statuses.insert(region.clone(), status);
                status
            }
        }
    }

    pub fn status(&self, region: &str) -> Option<RegionStatus> {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(region)
            .copied()
    }

    pub fn snapshot(&self) -> BTreeMap<RegionId, RegionStatus> {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(region, status)| (region.clone(), *status))
            .collect()
    }
}

/// Sentinel for "never reconciled"
const NEVER: u64 = 0;

/// Health and safe-mode state of the local region
pub struct HealthService {
    region: RegionId,
    is_primary: bool,
    thresholds: HealthThresholds,

    lag_ms: AtomicU64,
    divergence: AtomicU64,
    last_reconciled_ms: AtomicU64,
    safe_mode: AtomicBool,

    table: Arc<RegionHealthTable>,
    latest: RwLock<Option<RegionHealthRecord>>,

    shutdown_tx: watch::Sender<bool>,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl HealthService {
    pub fn new(config: &RegionConfig, table: Arc<RegionHealthTable>) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);

        let service = Arc::new(Self {
            region: config.region_id.clone(),
            is_primary: config.is_primary,
            thresholds: config.health.clone(),
            lag_ms: AtomicU64::new(0),
            divergence: AtomicU64::new(0),
            last_reconciled_ms: AtomicU64::new(NEVER),
            safe_mode: AtomicBool::new(false),
            table,
            latest: RwLock::new(None),
            shutdown_tx,
            refresher: Mutex::new(None),
        });
        service.refresh();
        service
    }

    pub fn region(&self) -> &RegionId {
        &self.region
    }

    pub fn table(&self) -> &Arc<RegionHealthTable> {
        &self.table
    }

    /// Feed the latest replication lag measurement
    pub fn record_lag(&self, lag_ms: u64) {
        self.lag_ms.store(lag_ms, Ordering::Release);
    }

    /// Feed the latest divergence count from the consistency check
    pub fn record_divergence(&self, count: u64) {
        self.divergence.store(count, Ordering::Release);
    }

    /// Note that a full reconciliation just completed
    pub fn mark_reconciled(&self) {
        self.last_reconciled_ms.store(unix_millis().max(1), Ordering::Release);
    }

    /// Compute the current health record from the latest inputs
    pub fn check_health(&self) -> RegionHealthRecord {
        let lag_ms = self.lag_ms.load(Ordering::Acquire);
        let divergence_count = self.get_divergence();
        let last_reconciled_at = match self.last_reconciled_ms.load(Ordering::Acquire) {
            NEVER => None,
            ms => Utc.timestamp_millis_opt(ms as i64).single(),
        };

        RegionHealthRecord {
            region: self.region.clone(),
            is_primary: self.is_primary,
            lag_ms,
            divergence_count,
            last_reconciled_at,
            status: RegionStatus::classify(lag_ms, divergence_count, &self.thresholds),
        }
    }

    /// Recompute the record and publish it to the cached snapshot and the region table
    pub fn refresh(&self) -> RegionHealthRecord {
        let record = self.check_health();
        let in_effect = self.table.report_local(&self.region, record.status);
        if in_effect != record.status {
            tracing::debug!(
                region = %self.region,
                computed = %record.status,
                "Keeping externally reported status"
            );
        }
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(record.clone());
        record
    }

    /// Last published record, without recomputation
    pub fn latest(&self) -> Option<RegionHealthRecord> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_divergence(&self) -> u64 {
        self.divergence.load(Ordering::Acquire)
    }

    pub fn is_safe_mode(&self) -> bool {
        self.safe_mode.load(Ordering::Acquire)
    }

    /// Fence writes to the primary region
    pub fn enable_safe_mode(&self) {
        let was_enabled = self.safe_mode.swap(true, Ordering::AcqRel);
        tracing::warn!(
            region = %self.region,
            divergence = self.get_divergence(),
            already_enabled = was_enabled,
            "Safe mode enabled: all writes route to the primary region"
        );
    }

    pub fn disable_safe_mode(&self) {
        if self.safe_mode.swap(false, Ordering::AcqRel) {
            tracing::info!(region = %self.region, "Safe mode disabled");
        }
    }

    /// Veto topology changes while replicas disagree
    pub fn should_block_expansion(&self) -> bool {
        self.get_divergence() > 0
    }

    /// Refresh the cached snapshot every `refresh_interval_ms`
    pub async fn spawn_refresher(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = self.thresholds.refresh_interval();

        let handle = tokio::spawn(async move {
            // Construction already published the first snapshot
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.changed() => break,

                    _ = ticker.tick() => {
                        let record = this.refresh();
                        tracing::debug!(
                            region = %record.region,
                            status = %record.status,
                            lag_ms = record.lag_ms,
                            divergence = record.divergence_count,
                            "Health snapshot refreshed"
                        );
                    }
                }
            }
        });

        if let Some(previous) = self.refresher.lock().await.replace(handle) {
            previous.abort();
        }
    }

    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        if let Some(handle) = self.refresher.lock().await.take() {
            let _ = handle.await;
        }
    }
}
