//! Region configuration
//!
//! Loaded once at startup from JSON. Thresholds are per deployment and never
//! hardcoded in the services that use them.

use crate::failover::DrPairTable;
use crate::types::RegionId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Health status thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    /// Replication lag above which the region is UNHEALTHY
    pub lag_threshold_ms: u64,

    /// How often the cached health snapshot is recomputed
    pub refresh_interval_ms: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            lag_threshold_ms: 5_000,
            refresh_interval_ms: 10_000,
        }
    }
}

impl HealthThresholds {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

/// Cross-region sync settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Shared pub/sub channel every region publishes snapshots on
    pub channel: String,

    /// Per-subscriber queue depth: sizes the merge event stream, and the
    /// in-memory broker's subscriptions where the caller builds one
    pub channel_capacity: usize,

    /// Anti-entropy period; `None` publishes only on demand
    pub anti_entropy_interval_ms: Option<u64>,

    /// Random delay added to each anti-entropy round
    pub jitter_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            channel: "georeplica:sync".to_string(),
            channel_capacity: 1024,
            anti_entropy_interval_ms: None,
            jitter_ms: 250,
        }
    }
}

/// Configuration of one regional deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// This region's id
    pub region_id: RegionId,

    /// Whether this region is the designated write primary under safe mode
    pub is_primary: bool,

    /// Static bidirectional DR pairs, e.g. `{"us-east-1": "us-west-2", ...}`
    pub dr_pairs: BTreeMap<String, String>,

    pub health: HealthThresholds,

    pub sync: SyncSettings,

    /// RocksDB directory for the consistency store and append log
    pub storage_path: Option<PathBuf>,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            region_id: RegionId::from("local"),
            is_primary: false,
            dr_pairs: BTreeMap::new(),
            health: HealthThresholds::default(),
            sync: SyncSettings::default(),
            storage_path: None,
        }
    }
}

impl RegionConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RegionConfig = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.region_id.as_str().trim().is_empty() {
            return Err(Error::Config("region_id must not be empty".to_string()));
        }
        if self.sync.channel.is_empty() {
            return Err(Error::Config("sync.channel must not be empty".to_string()));
        }
        if self.sync.channel_capacity == 0 {
            return Err(Error::Config("sync.channel_capacity must be positive".to_string()));
        }
        if self.sync.anti_entropy_interval_ms == Some(0) {
            return Err(Error::Config(
                "sync.anti_entropy_interval_ms must be positive".to_string(),
            ));
        }
        if self.health.refresh_interval_ms == 0 {
            return Err(Error::Config(
                "health.refresh_interval_ms must be positive".to_string(),
            ));
        }
        self.dr_table().map(|_| ())
    }

    /// Build the validated DR pair table
    pub fn dr_table(&self) -> Result<DrPairTable> {
        DrPairTable::from_pairs(self.dr_pairs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = RegionConfig::from_json_str(
            r#"{
                "region_id": "us-east-1",
                "is_primary": true,
                "dr_pairs": {"us-east-1": "us-west-2", "us-west-2": "us-east-1"},
                "health": {"lag_threshold_ms": 2000},
                "sync": {"channel": "prod:sync", "anti_entropy_interval_ms": 30000}
            }"#,
        )
        .unwrap();

        assert_eq!(config.region_id, "us-east-1");
        assert!(config.is_primary);
        assert_eq!(config.health.lag_threshold_ms, 2000);
        assert_eq!(config.health.refresh_interval_ms, 10_000);
        assert_eq!(config.sync.channel, "prod:sync");
        assert_eq!(config.sync.channel_capacity, 1024);
        assert_eq!(config.dr_table().unwrap().len(), 2);
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = RegionConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sync.channel, "georeplica:sync");
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(RegionConfig::from_json_str(r#"{"region_id": ""}"#).is_err());
        assert!(RegionConfig::from_json_str(r#"{"sync": {"channel_capacity": 0}}"#).is_err());
        assert!(RegionConfig::from_json_str(
            r#"{"dr_pairs": {"us-east-1": "us-west-2"}}"#
        )
        .is_err());
        assert!(RegionConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("region.json");
        std::fs::write(&path, r#"{"region_id": "eu-west-1"}"#).unwrap();

        let config = RegionConfig::from_json_file(&path).unwrap();
        assert_eq!(config.region_id, "eu-west-1");
        assert!(RegionConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }
}
