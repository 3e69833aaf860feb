//! Regional failover service
//!
//! Static DR pair routing consulted with the region health table. Resolution
//! never performs I/O and never fails: configuration gaps and double outages
//! degrade to the original region with a log event for upstream alerting.

use crate::health::{RegionHealthTable, RegionStatus};
use crate::types::RegionId;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Immutable bidirectional `region -> DR partner` mapping
#[derive(Debug, Clone, Default)]
pub struct DrPairTable {
    pairs: HashMap<RegionId, RegionId>,
}

impl DrPairTable {
    /// Build the table, rejecting self-pairs and one-way mappings
    pub fn from_pairs(pairs: BTreeMap<String, String>) -> Result<Self> {
        for (region, partner) in &pairs {
            if region.is_empty() || partner.is_empty() {
                return Err(Error::Config("DR pair regions must not be empty".to_string()));
            }
            if region == partner {
                return Err(Error::Config(format!("Region {} is paired with itself", region)));
            }
            if pairs.get(partner) != Some(region) {
                return Err(Error::Config(format!(
                    "DR pair {} -> {} has no reverse mapping",
                    region, partner
                )));
            }
        }

        Ok(Self {
            pairs: pairs
                .into_iter()
                .map(|(region, partner)| (RegionId::new(region), RegionId::new(partner)))
                .collect(),
        })
    }

    pub fn get_dr_pair(&self, region: &str) -> Option<&RegionId> {
        self.pairs.get(region)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Outcome of a failover resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverDecision {
    /// Region is serving; route to it
    Unchanged(RegionId),
    /// Region is unavailable but has no DR pair; fail open
    NoPair(RegionId),
    /// Region is unavailable and its healthy pair takes over
    FailedOver { from: RegionId, to: RegionId },
    /// Region and its pair are both unavailable; original region is the last resort
    Disaster { region: RegionId, pair: RegionId },
}

impl FailoverDecision {
    /// Region requests should be sent to
    pub fn target(&self) -> &RegionId {
        match self {
            FailoverDecision::Unchanged(region)
            | FailoverDecision::NoPair(region)
            | FailoverDecision::Disaster { region, .. } => region,
            FailoverDecision::FailedOver { to, .. } => to,
        }
    }

    pub fn is_failover(&self) -> bool {
        matches!(self, FailoverDecision::FailedOver { .. })
    }
}

/// Picks the effective serving region from DR pairs and region health
pub struct FailoverService {
    table: DrPairTable,
    health: Arc<RegionHealthTable>,
}

impl FailoverService {
    pub fn new(table: DrPairTable, health: Arc<RegionHealthTable>) -> Self {
        tracing::debug!(pairs = table.len(), "Failover service ready");
        Self { table, health }
    }

    pub fn get_dr_pair(&self, region: &str) -> Option<&RegionId> {
        self.table.get_dr_pair(region)
    }

    pub fn health(&self) -> &Arc<RegionHealthTable> {
        &self.health
    }

    /// Resolve the serving region for `region`
    ///
    /// A region with no reported status is treated as serving. A DR pair is
    /// only chosen when its own status is `Healthy`.
    pub fn resolve(&self, region: &str) -> FailoverDecision {
        let region_id = RegionId::from(region);
        let status = self.health.status(region);

        if !status.is_some_and(|s| s.is_unavailable()) {
            return FailoverDecision::Unchanged(region_id);
        }

        let Some(pair) = self.table.get_dr_pair(region) else {
            tracing::warn!(
                region = %region_id,
                "Region unavailable and no DR pair configured, keeping original region"
            );
            return FailoverDecision::NoPair(region_id);
        };

        match self.health.status(pair.as_str()) {
            Some(RegionStatus::Healthy) => {
                tracing::info!(from = %region_id, to = %pair, "Failing over to DR pair");
                FailoverDecision::FailedOver {
                    from: region_id,
                    to: pair.clone(),
                }
            }
            pair_status => {
                tracing::error!(
                    region = %region_id,
                    pair = %pair,
                    pair_status = ?pair_status,
                    "Disaster: region and its DR pair are both unavailable"
                );
                FailoverDecision::Disaster {
                    region: region_id,
                    pair: pair.clone(),
                }
            }
        }
    }

    /// Region id requests for `region` should be routed to
    pub fn resolve_target_region(&self, region: &str) -> RegionId {
        self.resolve(region).target().clone()
    }
}
