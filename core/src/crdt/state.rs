//! Tagged replica state over every supported CRDT type

use super::clock::HlcGenerator;
use super::{Crdt, GCounter, LwwRegister, OrSet, PnCounter};
use crate::types::RegionId;
use crate::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Local operation applied to a replica by the region that owns the write
#[derive(Debug, Clone, PartialEq)]
pub enum CrdtOp {
    /// G-Counter or PN-Counter increment
    Increment(u64),
    /// PN-Counter decrement
    Decrement(u64),
    /// LWW-Register write
    Set(Value),
    /// OR-Set add
    Add(String),
    /// OR-Set remove of all observed tags
    Remove(String),
}

impl CrdtOp {
    fn name(&self) -> &'static str {
        match self {
            CrdtOp::Increment(_) => "increment",
            CrdtOp::Decrement(_) => "decrement",
            CrdtOp::Set(_) => "set",
            CrdtOp::Add(_) => "add",
            CrdtOp::Remove(_) => "remove",
        }
    }
}

/// Identity a region stamps onto its local writes
#[derive(Debug)]
pub struct LocalWriter {
    pub region: RegionId,
    pub clock: HlcGenerator,
}

impl LocalWriter {
    pub fn new(region: RegionId) -> Self {
        Self {
            region,
            clock: HlcGenerator::new(),
        }
    }
}

/// Observable value of a replica
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReplicaValue {
    Count(u64),
    Signed(i64),
    Register(Value),
    Members(BTreeSet<String>),
}

impl ReplicaValue {
    pub fn to_json(&self) -> Value {
        match self {
            ReplicaValue::Count(n) => Value::from(*n),
            ReplicaValue::Signed(n) => Value::from(*n),
            ReplicaValue::Register(v) => v.clone(),
            ReplicaValue::Members(set) => {
                Value::Array(set.iter().cloned().map(Value::String).collect())
            }
        }
    }
}

/// BLAKE3 digest of a replica's canonical state
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplicaDigest(pub [u8; 32]);

impl fmt::Debug for ReplicaDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReplicaDigest({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for ReplicaDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Replica state, one variant per supported CRDT type
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicaState {
    GCounter(GCounter),
    PnCounter(PnCounter),
    LwwRegister(LwwRegister),
    OrSet(OrSet),
}

impl ReplicaState {
    /// Stable wire tag of the underlying type
    pub fn type_tag(&self) -> &'static str {
        match self {
            ReplicaState::GCounter(_) => GCounter::TYPE_TAG,
            ReplicaState::PnCounter(_) => PnCounter::TYPE_TAG,
            ReplicaState::LwwRegister(_) => LwwRegister::TYPE_TAG,
            ReplicaState::OrSet(_) => OrSet::TYPE_TAG,
        }
    }

    /// Merge a remote state of the same type
    pub fn merge(&self, remote: &ReplicaState) -> Result<ReplicaState> {
        let merged = match (self, remote) {
            (ReplicaState::GCounter(a), ReplicaState::GCounter(b)) => {
                ReplicaState::GCounter(a.merge(b))
            }
            (ReplicaState::PnCounter(a), ReplicaState::PnCounter(b)) => {
                ReplicaState::PnCounter(a.merge(b))
            }
            (ReplicaState::LwwRegister(a), ReplicaState::LwwRegister(b)) => {
                ReplicaState::LwwRegister(a.merge(b))
            }
            (ReplicaState::OrSet(a), ReplicaState::OrSet(b)) => ReplicaState::OrSet(a.merge(b)),
            _ => {
                return Err(Error::TypeMismatch {
                    expected: self.type_tag().to_string(),
                    actual: remote.type_tag().to_string(),
                })
            }
        };
        Ok(merged)
    }

    /// Apply a local operation in place
    pub fn apply(&mut self, op: CrdtOp, writer: &LocalWriter) -> Result<()> {
        match (&mut *self, op) {
            (ReplicaState::GCounter(c), CrdtOp::Increment(n)) => c.increment(&writer.region, n),
            (ReplicaState::PnCounter(c), CrdtOp::Increment(n)) => c.increment(&writer.region, n),
            (ReplicaState::PnCounter(c), CrdtOp::Decrement(n)) => c.decrement(&writer.region, n),
            (ReplicaState::LwwRegister(r), CrdtOp::Set(value)) => {
                r.set(value, &writer.clock, writer.region.as_str())
            }
            (ReplicaState::OrSet(s), CrdtOp::Add(element)) => {
                s.add(element);
            }
            (ReplicaState::OrSet(s), CrdtOp::Remove(element)) => {
                s.remove(&element);
            }
            (state, op) => {
                return Err(Error::TypeMismatch {
                    expected: state.type_tag().to_string(),
                    actual: op.name().to_string(),
                })
            }
        }
        Ok(())
    }

    pub fn value(&self) -> ReplicaValue {
        match self {
            ReplicaState::GCounter(c) => ReplicaValue::Count(c.value()),
            ReplicaState::PnCounter(c) => ReplicaValue::Signed(c.value()),
            ReplicaState::LwwRegister(r) => ReplicaValue::Register(r.value()),
            ReplicaState::OrSet(s) => ReplicaValue::Members(s.value()),
        }
    }

    /// CRDT-specific JSON state, as carried in the `state` field of a sync message
    pub fn to_json(&self) -> Value {
        match self {
            ReplicaState::GCounter(c) => c.to_json(),
            ReplicaState::PnCounter(c) => c.to_json(),
            ReplicaState::LwwRegister(r) => r.to_json(),
            ReplicaState::OrSet(s) => s.to_json(),
        }
    }

    /// Digest over type tag and canonical JSON state
    pub fn digest(&self) -> ReplicaDigest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.type_tag().as_bytes());
        hasher.update(&[0]);
        // serde_json maps are ordered, so this serialization is canonical
        hasher.update(self.to_json().to_string().as_bytes());
        ReplicaDigest(*hasher.finalize().as_bytes())
    }
}

impl From<GCounter> for ReplicaState {
    fn from(c: GCounter) -> Self {
        ReplicaState::GCounter(c)
    }
}

impl From<PnCounter> for ReplicaState {
    fn from(c: PnCounter) -> Self {
        ReplicaState::PnCounter(c)
    }
}

impl From<LwwRegister> for ReplicaState {
    fn from(r: LwwRegister) -> Self {
        ReplicaState::LwwRegister(r)
    }
}

impl From<OrSet> for ReplicaState {
    fn from(s: OrSet) -> Self {
        ReplicaState::OrSet(s)
    }
}

/// Keys whose digests differ between two regions, including keys only one side holds
pub fn divergent_keys(
    local: &BTreeMap<String, ReplicaDigest>,
    remote: &BTreeMap<String, ReplicaDigest>,
) -> Vec<String> {
    let keys: BTreeSet<&String> = local.keys().chain(remote.keys()).collect();
    keys.into_iter()
        .filter(|key| local.get(*key) != remote.get(*key))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn writer(region: &str) -> LocalWriter {
        LocalWriter::new(RegionId::from(region))
    }

    #[test]
    fn test_apply_routes_ops_by_type() {
        let w = writer("us-east-1");

        let mut counter = ReplicaState::from(PnCounter::new());
        counter.apply(CrdtOp::Increment(5), &w).unwrap();
        counter.apply(CrdtOp::Decrement(2), &w).unwrap();
        assert_eq!(counter.value(), ReplicaValue::Signed(3));

        let mut register = ReplicaState::from(LwwRegister::new());
        register.apply(CrdtOp::Set(json!("on")), &w).unwrap();
        assert_eq!(register.value(), ReplicaValue::Register(json!("on")));

        let mut set = ReplicaState::from(OrSet::new());
        set.apply(CrdtOp::Add("x".into()), &w).unwrap();
        set.apply(CrdtOp::Add("y".into()), &w).unwrap();
        set.apply(CrdtOp::Remove("x".into()), &w).unwrap();
        assert_eq!(set.value().to_json(), json!(["y"]));
    }

    #[test]
    fn test_apply_rejects_incompatible_op() {
        let w = writer("us-east-1");
        let mut counter = ReplicaState::from(GCounter::new());

        let err = counter.apply(CrdtOp::Decrement(1), &w).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        assert_eq!(counter.value(), ReplicaValue::Count(0));
    }

    #[test]
    fn test_merge_rejects_mixed_types() {
        let a = ReplicaState::from(GCounter::new());
        let b = ReplicaState::from(OrSet::new());
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn test_digest_tracks_state() {
        let w = writer("us-east-1");
        let mut a = ReplicaState::from(GCounter::new());
        let b = a.clone();
        assert_eq!(a.digest(), b.digest());

        a.apply(CrdtOp::Increment(1), &w).unwrap();
        assert_ne!(a.digest(), b.digest());

        // Same JSON under a different type tag is a different replica
        let empty_counter = ReplicaState::from(GCounter::new());
        let empty_pn = ReplicaState::from(PnCounter::new());
        assert_ne!(empty_counter.digest(), empty_pn.digest());
    }

    #[test]
    fn test_divergent_keys() {
        let d1 = ReplicaState::from(GCounter::new()).digest();
        let d2 = ReplicaState::from(OrSet::new()).digest();

        let local = BTreeMap::from([("same".to_string(), d1), ("diff".to_string(), d1), ("local-only".to_string(), d1)]);
        let remote = BTreeMap::from([("same".to_string(), d1), ("diff".to_string(), d2), ("remote-only".to_string(), d2)]);

        assert_eq!(
            divergent_keys(&local, &remote),
            vec!["diff".to_string(), "local-only".to_string(), "remote-only".to_string()]
        );
    }
}
