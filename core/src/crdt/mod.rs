//! CRDT (Conflict-free Replicated Data Types) module
//!
//! Self-contained replicated data types with deterministic merge:
//! - G-Counter and PN-Counter
//! - LWW-Register stamped with a Hybrid Logical Clock
//! - OR-Set with per-tag tombstones
//!
//! Every merge is commutative, associative and idempotent, so replicas converge
//! regardless of message order or duplication.

pub mod clock;
pub mod counter;
pub mod register;
pub mod registry;
pub mod set;
pub mod state;


pub use clock::{Hlc, HlcGenerator};
pub use counter::{GCounter, PnCounter};
pub use register::LwwRegister;
pub use registry::{CrdtFactory, DecodeFn};
pub use set::OrSet;
pub use state::{divergent_keys, CrdtOp, LocalWriter, ReplicaDigest, ReplicaState, ReplicaValue};

use serde_json::Value;

/// Failure to reconstruct a CRDT from its wire form
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("invalid {type_tag} state: {reason}")]
    Invalid {
        type_tag: &'static str,
        reason: String,
    },

    #[error("unknown CRDT type tag: {0}")]
    UnknownType(String),
}

impl DecodeError {
    pub(crate) fn invalid(type_tag: &'static str, reason: impl Into<String>) -> Self {
        DecodeError::Invalid {
            type_tag,
            reason: reason.into(),
        }
    }
}

/// Common surface of every replicated data type
pub trait Crdt: Clone + PartialEq + Sized {
    /// Stable wire identifier
    const TYPE_TAG: &'static str;

    /// Observable value
    type Value;

    /// Join of two states; commutative, associative and idempotent
    fn merge(&self, other: &Self) -> Self;

    fn value(&self) -> Self::Value;

    /// Serialize the state; `from_json(to_json(x)) == x`
    fn to_json(&self) -> Value;

    /// Decode and validate a state
    fn from_json(json: &Value) -> Result<Self, DecodeError>;
}
