//! Observed-Remove Set (OR-Set)

use super::{Crdt, DecodeError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Observed-Remove Set (OR-Set)
///
/// Every add creates a fresh unique tag. A remove tombstones only the tags it
/// has observed for the element, so a concurrent add under a new tag survives
/// the merge (add-wins per tag).
///
/// # Example
///
/// ```
/// use georeplica_core::crdt::{Crdt, OrSet};
///
/// let mut set = OrSet::new();
/// set.add("x");
/// set.add("y");
/// set.remove("x");
///
/// assert!(!set.contains("x"));
/// assert!(set.contains("y"));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrSet {
    /// `(element, unique tag)` pairs
    #[serde(rename = "addTags")]
    adds: BTreeSet<(String, String)>,

    /// Tombstoned tags
    #[serde(rename = "removeTags")]
    removes: BTreeSet<String>,
}

impl OrSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an element under a freshly generated tag, returning the tag
    pub fn add(&mut self, element: impl Into<String>) -> String {
        let tag = Uuid::new_v4().to_string();
        self.add_with_tag(element, tag.clone());
        tag
    }

    /// Add an element under a caller-provided tag
    pub fn add_with_tag(&mut self, element: impl Into<String>, tag: impl Into<String>) {
        self.adds.insert((element.into(), tag.into()));
    }

    /// Tombstone every tag currently observed for `element`
    ///
    /// Returns the number of tags newly tombstoned.
    pub fn remove(&mut self, element: &str) -> usize {
        let observed: Vec<String> = self
            .adds
            .iter()
            .filter(|(e, _)| e == element)
            .map(|(_, tag)| tag.clone())
            .collect();

        observed
            .into_iter()
            .filter(|tag| self.removes.insert(tag.clone()))
            .count()
    }

    /// Check whether `element` has at least one live tag
    pub fn contains(&self, element: &str) -> bool {
        self.adds
            .iter()
            .any(|(e, tag)| e == element && !self.removes.contains(tag))
    }

    /// Live tags for an element
    pub fn live_tags(&self, element: &str) -> BTreeSet<String> {
        self.adds
            .iter()
            .filter(|(e, tag)| e == element && !self.removes.contains(tag))
            .map(|(_, tag)| tag.clone())
            .collect()
    }

    pub fn is_tombstoned(&self, tag: &str) -> bool {
        self.removes.contains(tag)
    }

    pub fn len(&self) -> usize {
        self.value().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate(&self) -> Result<(), DecodeError> {
        if self.adds.iter().any(|(_, tag)| tag.is_empty()) || self.removes.contains("") {
            return Err(DecodeError::invalid(Self::TYPE_TAG, "empty unique tag"));
        }
        Ok(())
    }
}

impl Crdt for OrSet {
    const TYPE_TAG: &'static str = "or-set";
    type Value = BTreeSet<String>;

    fn merge(&self, other: &Self) -> Self {
        Self {
            adds: self.adds.union(&other.adds).cloned().collect(),
            removes: self.removes.union(&other.removes).cloned().collect(),
        }
    }

    fn value(&self) -> BTreeSet<String> {
        self.adds
            .iter()
            .filter(|(_, tag)| !self.removes.contains(tag))
            .map(|(element, _)| element.clone())
            .collect()
    }

    fn to_json(&self) -> Value {
        serde_json::json!({
            "addTags": self
                .adds
                .iter()
                .map(|(element, tag)| serde_json::json!([element, tag]))
                .collect::<Vec<_>>(),
            "removeTags": self.removes.iter().collect::<Vec<_>>(),
        })
    }

    fn from_json(json: &Value) -> Result<Self, DecodeError> {
        let set: OrSet = serde_json::from_value(json.clone())
            .map_err(|e| DecodeError::invalid(Self::TYPE_TAG, e.to_string()))?;
        set.validate()?;
        Ok(set)
    }
}
