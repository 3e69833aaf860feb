//! Type tag to decoder table used to reconstruct remote replicas

use super::{Crdt, DecodeError, GCounter, LwwRegister, OrSet, PnCounter, ReplicaState};
use serde_json::Value;
use std::collections::HashMap;

/// Decoder reconstructing a replica from its wire state
pub type DecodeFn = fn(&Value) -> Result<ReplicaState, DecodeError>;

fn decode_as<T>(state: &Value) -> Result<ReplicaState, DecodeError>
where
    T: Crdt + Into<ReplicaState>,
{
    T::from_json(state).map(Into::into)
}

/// Explicit registry mapping a CRDT type tag to its decoder
///
/// Populated once at startup and shared by every key registered with it.
#[derive(Clone, Default)]
pub struct CrdtFactory {
    decoders: HashMap<&'static str, DecodeFn>,
}

impl CrdtFactory {
    /// Create an empty factory that decodes nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory knowing every built-in type
    pub fn standard() -> Self {
        Self::new()
            .with::<GCounter>()
            .with::<PnCounter>()
            .with::<LwwRegister>()
            .with::<OrSet>()
    }

    /// Register a CRDT type under its own tag
    pub fn with<T>(mut self) -> Self
    where
        T: Crdt + Into<ReplicaState>,
    {
        self.decoders.insert(T::TYPE_TAG, decode_as::<T> as DecodeFn);
        self
    }

    /// Whether this factory can reconstruct `type_tag`
    pub fn supports(&self, type_tag: &str) -> bool {
        self.decoders.contains_key(type_tag)
    }

    /// Reconstruct a replica from a type tag and its JSON state
    pub fn decode(&self, type_tag: &str, state: &Value) -> Result<ReplicaState, DecodeError> {
        let decode = self
            .decoders
            .get(type_tag)
            .ok_or_else(|| DecodeError::UnknownType(type_tag.to_string()))?;
        decode(state)
    }
}

impl std::fmt::Debug for CrdtFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<_> = self.decoders.keys().collect();
        tags.sort();
        f.debug_struct("CrdtFactory").field("types", &tags).finish()
    }
}
