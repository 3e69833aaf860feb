//! Last-Writer-Wins register

use super::clock::{Hlc, HlcGenerator};
use super::{Crdt, DecodeError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Last-Writer-Wins register (LWW-Register)
///
/// Holds an opaque JSON value stamped with `(timestamp, writer_id)`. Merge keeps
/// the entry with the larger pair compared lexicographically, so the writer id
/// breaks timestamp ties deterministically.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LwwRegister {
    value: Value,
    timestamp: Hlc,
    writer_id: String,
}

impl Default for LwwRegister {
    fn default() -> Self {
        Self {
            value: Value::Null,
            timestamp: Hlc::ZERO,
            writer_id: String::new(),
        }
    }
}

impl LwwRegister {
    /// Create an empty register (`null`, never written)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a register holding an explicitly stamped value
    pub fn with_stamp(value: Value, timestamp: Hlc, writer_id: impl Into<String>) -> Self {
        Self {
            value,
            timestamp,
            writer_id: writer_id.into(),
        }
    }

    /// Local write: stamps a timestamp strictly newer than the current entry
    pub fn set(&mut self, value: Value, clock: &HlcGenerator, writer_id: &str) {
        self.timestamp = clock.update(self.timestamp);
        self.writer_id = writer_id.to_string();
        self.value = value;
    }

    pub fn timestamp(&self) -> Hlc {
        self.timestamp
    }

    pub fn writer_id(&self) -> &str {
        &self.writer_id
    }

    fn stamp_cmp(&self, other: &Self) -> Ordering {
        (self.timestamp, &self.writer_id)
            .cmp(&(other.timestamp, &other.writer_id))
            // Same stamp with different payloads only happens with a misbehaving
            // writer; order by canonical JSON so merge stays commutative.
            .then_with(|| canonical(&self.value).cmp(&canonical(&other.value)))
    }
}

fn canonical(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

impl Crdt for LwwRegister {
    const TYPE_TAG: &'static str = "lww-register";
    type Value = Value;

    fn merge(&self, other: &Self) -> Self {
        match self.stamp_cmp(other) {
            Ordering::Less => other.clone(),
            _ => self.clone(),
        }
    }

    fn value(&self) -> Value {
        self.value.clone()
    }

    fn to_json(&self) -> Value {
        serde_json::json!({
            "value": self.value,
            "timestamp": {
                "wallTime": self.timestamp.wall_time,
                "logical": self.timestamp.logical,
            },
            "writerId": self.writer_id,
        })
    }

    fn from_json(json: &Value) -> Result<Self, DecodeError> {
        let register: LwwRegister = serde_json::from_value(json.clone())
            .map_err(|e| DecodeError::invalid(Self::TYPE_TAG, e.to_string()))?;
        if register.writer_id.is_empty() && register.timestamp != Hlc::ZERO {
            return Err(DecodeError::invalid(
                Self::TYPE_TAG,
                "stamped write without writer id",
            ));
        }
        if !register.timestamp.is_representable() {
            return Err(DecodeError::invalid(
                Self::TYPE_TAG,
                format!(
                    "timestamp out of range (wallTime {}, logical {})",
                    register.timestamp.wall_time, register.timestamp.logical
                ),
            ));
        }
        Ok(register)
    }
}
