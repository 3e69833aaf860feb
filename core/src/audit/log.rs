//! Append-only log abstraction and tree head publishing

use super::merkle::{self, MerkleRoot};
use super::sth::{SignedTreeHead, TreeHeadSigner};
use crate::Result;
use std::sync::{Arc, PoisonError, RwLock};

/// Append-only sequence of entries; appends are monotonic and never rewritten
pub trait AppendLog: Send + Sync {
    /// Append an entry, returning its index
    fn append(&self, data: &str) -> Result<u64>;

    /// Number of entries appended so far
    fn size(&self) -> u64;

    /// Entries in `[from, to)`, truncated to the current size
    fn range(&self, from: u64, to: u64) -> Result<Vec<String>>;

    /// Merkle root over the first `size` entries
    fn root_at(&self, size: u64) -> Result<MerkleRoot> {
        Ok(merkle::root(&self.range(0, size)?))
    }
}

/// In-memory log for tests and ephemeral deployments
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: RwLock<Vec<String>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AppendLog for MemoryLog {
    fn append(&self, data: &str) -> Result<u64> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.push(data.to_string());
        Ok(entries.len() as u64 - 1)
    }

    fn size(&self) -> u64 {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len() as u64
    }

    fn range(&self, from: u64, to: u64) -> Result<Vec<String>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let to = (to as usize).min(entries.len());
        let from = (from as usize).min(to);
        Ok(entries[from..to].to_vec())
    }
}

/// Publishes signed tree heads over a log it owns
pub struct TreeHeadPublisher {
    log: Arc<dyn AppendLog>,
    signer: TreeHeadSigner,
}

impl TreeHeadPublisher {
    pub fn new(log: Arc<dyn AppendLog>, signer: TreeHeadSigner) -> Self {
        Self { log, signer }
    }

    pub fn log(&self) -> &Arc<dyn AppendLog> {
        &self.log
    }

    pub fn signer(&self) -> &TreeHeadSigner {
        &self.signer
    }

    /// Sign the tree head over the whole log as it stands
    pub fn publish(&self) -> Result<SignedTreeHead> {
        let size = self.log.size();
        let root = self.log.root_at(size)?;
        tracing::debug!(size, root = %root, "Publishing tree head");
        Ok(self.signer.sign(size, root))
    }
}
