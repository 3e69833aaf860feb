//! Wire messages and merge notifications

use crate::crdt::{DecodeError, ReplicaState, ReplicaValue};
use crate::types::RegionId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Snapshot of one replica as published on the shared channel
///
/// Transient and wire-only; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    /// Region that published the snapshot
    pub origin_region: RegionId,

    /// Replica key
    pub key: String,

    /// CRDT-specific JSON state
    pub state: Value,

    /// CRDT type tag
    #[serde(rename = "type")]
    pub type_tag: String,
}

impl SyncMessage {
    pub fn snapshot(origin_region: RegionId, key: impl Into<String>, state: &ReplicaState) -> Self {
        Self {
            origin_region,
            key: key.into(),
            state: state.to_json(),
            type_tag: state.type_tag().to_string(),
        }
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Serialization(format!("Failed to encode sync message: {}", e)))
    }

    /// Parse and validate an inbound payload
    pub fn decode(raw: &str) -> std::result::Result<Self, DecodeError> {
        let message: SyncMessage =
            serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        if message.origin_region.as_str().is_empty() {
            return Err(DecodeError::Malformed("empty originRegion".to_string()));
        }
        if message.key.is_empty() {
            return Err(DecodeError::Malformed("empty key".to_string()));
        }
        if message.type_tag.is_empty() {
            return Err(DecodeError::Malformed("empty type".to_string()));
        }

        Ok(message)
    }
}

/// Event emitted after a remote snapshot was merged into a local replica
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Merged {
        key: String,
        value: ReplicaValue,
        origin_region: RegionId,
    },
}

/// What happened to an inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// Remote state merged; carries the new local value
    Merged { key: String, value: ReplicaValue },
    /// Our own snapshot came back; discarded
    EchoSuppressed,
    /// Payload failed to parse or validate; discarded
    Malformed(DecodeError),
    /// Key not registered in this region (yet); discarded
    UnknownKey(String),
    /// Type tag not known to the key's factory; discarded
    UnknownType { key: String, type_tag: String },
    /// Remote type differs from the local replica's; discarded
    TypeMismatch { key: String, expected: String, actual: String },
    /// Service already shut down; discarded
    ShutDown,
}

impl MergeOutcome {
    pub fn is_merged(&self) -> bool {
        matches!(self, MergeOutcome::Merged { .. })
    }
}
