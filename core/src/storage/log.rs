//! RocksDB-backed append-only log
//!
//! Entries are CBOR-encoded and keyed by their big-endian index so iteration
//! order is append order. The size is written in the same batch as the entry.

use super::Storage;
use crate::audit::AppendLog;
use crate::types::unix_millis;
use crate::{Error, Result};
use rocksdb::{Direction, IteratorMode, WriteBatch};

const SIZE_KEY: &[u8] = b"size";

/// Stored log entry
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct LogEntry {
    #[n(0)]
    pub index: u64,
    #[n(1)]
    pub data: String,
    #[n(2)]
    pub appended_at_ms: u64,
}

/// Append-only log persisted in the `log_entries` column family
pub struct DurableLog {
    storage: Storage,
}

impl DurableLog {
    /// Open the log, recovering its size from `log_meta` on first use
    pub fn open(storage: Storage) -> Result<Self> {
        {
            let mut size = storage.log_size();
            if size.is_none() {
                let recovered = read_size(&storage)?;
                tracing::debug!(size = recovered, "Append log opened");
                *size = Some(recovered);
            }
        }
        Ok(Self { storage })
    }

    /// Read a single entry
    pub fn entry(&self, index: u64) -> Result<Option<LogEntry>> {
        let cf = self.storage.cf(Storage::CF_LOG_ENTRIES)?;
        match self
            .storage
            .db()
            .get_cf(&cf, index.to_be_bytes())
            .map_err(|e| Error::Storage(format!("Failed to read log entry: {}", e)))?
        {
            Some(bytes) => Ok(Some(decode_entry(&bytes)?)),
            None => Ok(None),
        }
    }
}

fn read_size(storage: &Storage) -> Result<u64> {
    let cf = storage.cf(Storage::CF_LOG_META)?;
    match storage
        .db()
        .get_cf(&cf, SIZE_KEY)
        .map_err(|e| Error::Storage(format!("Failed to read log size: {}", e)))?
    {
        Some(bytes) => {
            let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                Error::Storage(format!("Corrupt log size ({} bytes)", bytes.len()))
            })?;
            Ok(u64::from_be_bytes(bytes))
        }
        None => Ok(0),
    }
}

fn decode_entry(bytes: &[u8]) -> Result<LogEntry> {
    minicbor::decode(bytes)
        .map_err(|e| Error::Serialization(format!("Failed to decode log entry: {}", e)))
}

impl AppendLog for DurableLog {
    fn append(&self, data: &str) -> Result<u64> {
        let mut size = self.storage.log_size();
        let index = match *size {
            Some(size) => size,
            None => read_size(&self.storage)?,
        };

        let entry = LogEntry {
            index,
            data: data.to_string(),
            appended_at_ms: unix_millis(),
        };
        let value = minicbor::to_vec(&entry)
            .map_err(|e| Error::Serialization(format!("Failed to encode log entry: {}", e)))?;

        let cf_entries = self.storage.cf(Storage::CF_LOG_ENTRIES)?;
        let cf_meta = self.storage.cf(Storage::CF_LOG_META)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_entries, index.to_be_bytes(), &value);
        batch.put_cf(&cf_meta, SIZE_KEY, (index + 1).to_be_bytes());

        self.storage
            .db()
            .write(batch)
            .map_err(|e| Error::Storage(format!("Failed to append log entry: {}", e)))?;

        *size = Some(index + 1);
        Ok(index)
    }

    fn size(&self) -> u64 {
        self.storage.log_size().unwrap_or_default()
    }

    fn range(&self, from: u64, to: u64) -> Result<Vec<String>> {
        let to = to.min(self.size());
        if from >= to {
            return Ok(Vec::new());
        }

        let cf = self.storage.cf(Storage::CF_LOG_ENTRIES)?;
        let start = from.to_be_bytes();
        let iter = self
            .storage
            .db()
            .iterator_cf(&cf, IteratorMode::From(&start, Direction::Forward));

        let mut entries = Vec::with_capacity((to - from) as usize);
        for (expected, item) in (from..to).zip(iter) {
            let (_, value) =
                item.map_err(|e| Error::Storage(format!("Iterator error: {}", e)))?;
            let entry = decode_entry(&value)?;
            if entry.index != expected {
                return Err(Error::Storage(format!(
                    "Log gap: expected entry {}, found {}",
                    expected, entry.index
                )));
            }
            entries.push(entry.data);
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_range() {
        let temp_dir = TempDir::new().unwrap();
        let log = Storage::open(temp_dir.path()).unwrap().durable_log().unwrap();

        assert_eq!(log.size(), 0);
        for i in 0..5 {
            assert_eq!(log.append(&format!("entry-{i}")).unwrap(), i);
        }

        assert_eq!(log.size(), 5);
        assert_eq!(log.range(1, 3).unwrap(), vec!["entry-1", "entry-2"]);
        assert_eq!(log.range(0, 100).unwrap().len(), 5);
        assert!(log.range(3, 3).unwrap().is_empty());
        assert_eq!(log.entry(4).unwrap().unwrap().data, "entry-4");
        assert!(log.entry(5).unwrap().is_none());
    }

    #[test]
    fn test_size_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let log = Storage::open(temp_dir.path()).unwrap().durable_log().unwrap();
            log.append("first").unwrap();
            log.append("second").unwrap();
        }

        let log = Storage::open(temp_dir.path()).unwrap().durable_log().unwrap();
        assert_eq!(log.size(), 2);
        assert_eq!(log.append("third").unwrap(), 2);
        assert_eq!(log.range(0, 3).unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_handles_share_indices() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path()).unwrap();
        let a = storage.durable_log().unwrap();
        let b = storage.durable_log().unwrap();

        assert_eq!(a.append("first").unwrap(), 0);
        assert_eq!(b.append("second").unwrap(), 1);
        assert_eq!(a.size(), 2);
        assert_eq!(b.range(0, 10).unwrap(), vec!["first", "second"]);
    }
}
