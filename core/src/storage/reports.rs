//! Consistency store
//!
//! Latest-snapshot cache of externally computed consistency reports. Saves
//! overwrite the whole array in one put; reads are fail-soft.

use super::Storage;
use crate::{Error, Result};
use serde_json::Value;
use std::sync::{PoisonError, RwLock};

const LATEST_KEY: &[u8] = b"latest";

/// Persistence of the latest consistency report array
pub trait ReportStore: Send + Sync {
    /// Replace the stored reports
    fn save_reports(&self, reports: &[Value]) -> Result<()>;

    /// Last saved reports, or empty if none were saved or they cannot be read
    fn get_reports(&self) -> Vec<Value>;
}

/// RocksDB-backed report store
#[derive(Clone)]
pub struct ConsistencyStore {
    storage: Storage,
}

impl ConsistencyStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    fn read_latest(&self) -> Result<Option<Vec<Value>>> {
        let cf = self.storage.cf(Storage::CF_CONSISTENCY_REPORTS)?;
        let Some(bytes) = self
            .storage
            .db()
            .get_cf(&cf, LATEST_KEY)
            .map_err(|e| Error::Storage(format!("Failed to read reports: {}", e)))?
        else {
            return Ok(None);
        };

        let reports = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Serialization(format!("Failed to parse reports: {}", e)))?;
        Ok(Some(reports))
    }
}

impl ReportStore for ConsistencyStore {
    fn save_reports(&self, reports: &[Value]) -> Result<()> {
        let bytes = serde_json::to_vec(reports)
            .map_err(|e| Error::Serialization(format!("Failed to encode reports: {}", e)))?;
        let cf = self.storage.cf(Storage::CF_CONSISTENCY_REPORTS)?;

        self.storage
            .db()
            .put_cf(&cf, LATEST_KEY, bytes)
            .map_err(|e| Error::Storage(format!("Failed to save reports: {}", e)))?;

        tracing::debug!(count = reports.len(), "Consistency reports saved");
        Ok(())
    }

    fn get_reports(&self) -> Vec<Value> {
        match self.read_latest() {
            Ok(reports) => reports.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "Stored consistency reports unreadable, returning none");
                Vec::new()
            }
        }
    }
}

/// Process-local report store for tests and ephemeral deployments
#[derive(Debug, Default)]
pub struct InMemoryConsistencyStore {
    latest: RwLock<Vec<Value>>,
}

impl InMemoryConsistencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReportStore for InMemoryConsistencyStore {
    fn save_reports(&self, reports: &[Value]) -> Result<()> {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = reports.to_vec();
        Ok(())
    }

    fn get_reports(&self) -> Vec<Value> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
