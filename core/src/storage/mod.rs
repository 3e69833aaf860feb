//! Durable storage
//!
//! One RocksDB instance per region with a column family per concern:
//! - `consistency_reports`: latest consistency report array (single key)
//! - `log_entries`: append-only audit log entries keyed by big-endian index
//! - `log_meta`: append log size

pub mod log;
pub mod reports;

use crate::{Error, Result};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, DB};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use log::{DurableLog, LogEntry};
pub use reports::{ConsistencyStore, InMemoryConsistencyStore, ReportStore};

/// Shared handle to the region's RocksDB instance
#[derive(Clone)]
pub struct Storage {
    db: Arc<DB>,
    path: PathBuf,
    /// Append log size shared by every log handle; loaded on first open
    log_size: Arc<Mutex<Option<u64>>>,
}

impl Storage {
    pub(crate) const CF_CONSISTENCY_REPORTS: &'static str = "consistency_reports";
    pub(crate) const CF_LOG_ENTRIES: &'static str = "log_entries";
    pub(crate) const CF_LOG_META: &'static str = "log_meta";

    /// Open storage at the given path, creating it if missing
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path).map_err(|e| {
            Error::Storage(format!("Failed to create {}: {}", path.display(), e))
        })?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(Self::CF_CONSISTENCY_REPORTS, Options::default()),
            ColumnFamilyDescriptor::new(Self::CF_LOG_ENTRIES, Options::default()),
            ColumnFamilyDescriptor::new(Self::CF_LOG_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)
            .map_err(|e| Error::Storage(format!("Failed to open RocksDB: {}", e)))?;

        tracing::debug!(path = %path.display(), "Storage opened");

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
            log_size: Arc::new(Mutex::new(None)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn db(&self) -> &DB {
        &self.db
    }

    pub(crate) fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Missing {} column family", name)))
    }

    pub(crate) fn log_size(&self) -> MutexGuard<'_, Option<u64>> {
        self.log_size.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consistency report cache backed by this instance
    pub fn consistency_store(&self) -> ConsistencyStore {
        ConsistencyStore::new(self.clone())
    }

    /// Append log backed by this instance. Handles share one size counter,
    /// so appends through any of them get distinct indices.
    pub fn durable_log(&self) -> Result<DurableLog> {
        DurableLog::open(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_storage_initialization() -> Result<()> {
        let temp_dir = TempDir::new().map_err(|e| Error::Storage(e.to_string()))?;
        let path = temp_dir.path().join("region");
        let storage = Storage::open(&path)?;

        assert!(path.exists());
        assert_eq!(storage.path(), path.as_path());
        storage.cf(Storage::CF_CONSISTENCY_REPORTS)?;
        storage.cf(Storage::CF_LOG_ENTRIES)?;
        storage.cf(Storage::CF_LOG_META)?;
        assert!(storage.cf("missing").is_err());
        Ok(())
    }

    #[test]
    fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        {
            let storage = Storage::open(temp_dir.path()).unwrap();
            storage
                .consistency_store()
                .save_reports(&[serde_json::json!({"key": "views"})])
                .unwrap();
        }

        let storage = Storage::open(temp_dir.path()).unwrap();
        assert_eq!(storage.consistency_store().get_reports().len(), 1);
    }
}
