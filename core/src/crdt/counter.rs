//! Replicated counters: grow-only (G-Counter) and increment/decrement (PN-Counter)

use super::{Crdt, DecodeError};
use crate::types::RegionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Grow-only counter (G-Counter)
///
/// Each region owns one slot and only ever increments it. The counter value is
/// the sum of all slots; merging takes the per-region maximum.
///
/// # Example
///
/// ```
/// use georeplica_core::crdt::{Crdt, GCounter};
/// use georeplica_core::RegionId;
///
/// let mut c1 = GCounter::new();
/// c1.increment(&RegionId::from("A"), 3);
///
/// let mut c2 = GCounter::new();
/// c2.increment(&RegionId::from("A"), 1);
/// c2.increment(&RegionId::from("B"), 2);
///
/// assert_eq!(c1.merge(&c2).value(), 5);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GCounter {
    /// Per-region increment totals
    counts: BTreeMap<String, u64>,
}

impl GCounter {
    /// Create a new grow-only counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a counter from explicit per-region totals
    pub fn from_counts<I, K>(counts: I) -> Self
    where
        I: IntoIterator<Item = (K, u64)>,
        K: Into<String>,
    {
        Self {
            counts: counts.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Increment the slot owned by `region`
    pub fn increment(&mut self, region: &RegionId, delta: u64) {
        let slot = self.counts.entry(region.0.clone()).or_insert(0);
        *slot = slot.saturating_add(delta);
    }

    /// Get the count for a specific region
    pub fn region_count(&self, region: &str) -> u64 {
        self.counts.get(region).copied().unwrap_or(0)
    }

    /// Per-region totals
    pub fn counts(&self) -> &BTreeMap<String, u64> {
        &self.counts
    }

    fn validate(&self) -> Result<(), DecodeError> {
        if self.counts.keys().any(|region| region.is_empty()) {
            return Err(DecodeError::invalid(Self::TYPE_TAG, "empty region id"));
        }
        Ok(())
    }
}

impl Crdt for GCounter {
    const TYPE_TAG: &'static str = "g-counter";
    type Value = u64;

    fn merge(&self, other: &Self) -> Self {
        let mut merged = self.counts.clone();
        for (region, &count) in &other.counts {
            let slot = merged.entry(region.clone()).or_insert(0);
            *slot = (*slot).max(count);
        }
        Self { counts: merged }
    }

    fn value(&self) -> u64 {
        self.counts.values().fold(0u64, |acc, c| acc.saturating_add(*c))
    }

    fn to_json(&self) -> Value {
        Value::Object(
            self.counts
                .iter()
                .map(|(region, count)| (region.clone(), Value::from(*count)))
                .collect(),
        )
    }

    fn from_json(json: &Value) -> Result<Self, DecodeError> {
        let counter: GCounter = serde_json::from_value(json.clone())
            .map_err(|e| DecodeError::invalid(Self::TYPE_TAG, e.to_string()))?;
        counter.validate()?;
        Ok(counter)
    }
}

/// Positive-Negative counter (PN-Counter)
///
/// Implemented as two G-Counters: one for increments and one for decrements.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PnCounter {
    increments: GCounter,
    decrements: GCounter,
}

impl PnCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, region: &RegionId, delta: u64) {
        self.increments.increment(region, delta);
    }

    pub fn decrement(&mut self, region: &RegionId, delta: u64) {
        self.decrements.increment(region, delta);
    }

    /// Total of all increments
    pub fn positive_value(&self) -> u64 {
        self.increments.value()
    }

    /// Total of all decrements
    pub fn negative_value(&self) -> u64 {
        self.decrements.value()
    }
}

impl Crdt for PnCounter {
    const TYPE_TAG: &'static str = "pn-counter";
    type Value = i64;

    fn merge(&self, other: &Self) -> Self {
        Self {
            increments: self.increments.merge(&other.increments),
            decrements: self.decrements.merge(&other.decrements),
        }
    }

    fn value(&self) -> i64 {
        let diff = i128::from(self.positive_value()) - i128::from(self.negative_value());
        diff.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }

    fn to_json(&self) -> Value {
        serde_json::json!({
            "increments": self.increments.to_json(),
            "decrements": self.decrements.to_json(),
        })
    }

    fn from_json(json: &Value) -> Result<Self, DecodeError> {
        let counter: PnCounter = serde_json::from_value(json.clone())
            .map_err(|e| DecodeError::invalid(Self::TYPE_TAG, e.to_string()))?;
        counter.increments.validate()?;
        counter.decrements.validate()?;
        Ok(counter)
    }
}
