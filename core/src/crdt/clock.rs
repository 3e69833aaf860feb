//! Hybrid Logical Clock (HLC) implementation
//!
//! HLC provides a logical timestamp that combines wall-clock time with a logical counter,
//! so last-writer-wins registers keep ordering local writes even when several land in
//! the same millisecond or the system clock steps backwards.

use crate::types::unix_millis;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Bits of the packed representation reserved for the logical counter
const LOGICAL_BITS: u32 = 16;
const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;

/// First wall time that no longer packs with room for a successor stamp
const WALL_TIME_LIMIT: u64 = (1 << (64 - LOGICAL_BITS)) - 1;

/// Hybrid Logical Clock timestamp
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Hlc {
    /// Wall-clock time in milliseconds since UNIX epoch
    pub wall_time: u64,

    /// Logical counter for ordering events at the same wall time
    pub logical: u64,
}

impl Hlc {
    /// The timestamp every fresh register starts from
    pub const ZERO: Hlc = Hlc {
        wall_time: 0,
        logical: 0,
    };

    pub fn new(wall_time: u64, logical: u64) -> Self {
        Self { wall_time, logical }
    }

    /// Create a new HLC with current wall time and zero logical counter
    pub fn now() -> Self {
        Self {
            wall_time: unix_millis(),
            logical: 0,
        }
    }

    /// Whether the stamp fits the generator's packed form with room for a
    /// successor. Decoders reject stamps that do not.
    pub fn is_representable(&self) -> bool {
        self.wall_time < WALL_TIME_LIMIT && self.logical <= LOGICAL_MASK
    }

    fn pack(&self) -> u64 {
        (self.wall_time << LOGICAL_BITS) | (self.logical & LOGICAL_MASK)
    }

    fn unpack(packed: u64) -> Self {
        Self {
            wall_time: packed >> LOGICAL_BITS,
            logical: packed & LOGICAL_MASK,
        }
    }
}

/// Thread-safe HLC generator, one per region
#[derive(Debug)]
pub struct HlcGenerator {
    last: AtomicU64,
}

impl HlcGenerator {
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Generate a new HLC timestamp, strictly greater than any previously issued
    pub fn generate(&self) -> Hlc {
        self.advance_past(0)
    }

    /// Observe a timestamp (local or remote) and return one strictly greater than it
    pub fn update(&self, observed: Hlc) -> Hlc {
        let floor = if observed.is_representable() {
            observed.pack()
        } else {
            // Clamp rather than truncate so the floor never drops below the stamp
            Hlc::new(WALL_TIME_LIMIT - 1, LOGICAL_MASK).pack()
        };
        self.advance_past(floor)
    }

    fn advance_past(&self, floor: u64) -> Hlc {
        let packed_now = Hlc::now().pack();
        let mut issued = 0;
        // fetch_update retries on contention so concurrent writers never share a stamp
        let _ = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                let next = if packed_now > last && packed_now > floor {
                    packed_now
                } else {
                    last.max(floor).saturating_add(1)
                };
                issued = next;
                Some(next)
            });
        Hlc::unpack(issued)
    }
}

impl Default for HlcGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hlc_ordering() {
        let hlc1 = Hlc::new(1000, 0);
        let hlc2 = Hlc::new(1000, 1);
        let hlc3 = Hlc::new(1001, 0);

        assert!(hlc1 < hlc2);
        assert!(hlc2 < hlc3);
        assert!(hlc1 < hlc3);
    }

    #[test]
    fn test_hlc_generator_monotonic() {
        let gen = HlcGenerator::new();

        let hlc1 = gen.generate();
        let hlc2 = gen.generate();
        let hlc3 = gen.generate();

        assert!(hlc2 > hlc1);
        assert!(hlc3 > hlc2);
    }

    #[test]
    fn test_hlc_update_passes_future_timestamp() {
        let gen = HlcGenerator::new();
        let future = Hlc::new(Hlc::now().wall_time + 60_000, 7);

        let next = gen.update(future);
        assert!(next > future);

        // Later local stamps stay ahead of the observed one
        assert!(gen.generate() > next);
    }

    #[test]
    fn test_representable_bounds() {
        assert!(Hlc::new(WALL_TIME_LIMIT - 1, LOGICAL_MASK).is_representable());
        assert!(!Hlc::new(WALL_TIME_LIMIT, 0).is_representable());
        assert!(!Hlc::new(1_000, LOGICAL_MASK + 1).is_representable());
    }

    #[test]
    fn test_hlc_update_at_upper_bound() {
        let gen = HlcGenerator::new();
        let edge = Hlc::new(WALL_TIME_LIMIT - 1, LOGICAL_MASK);

        let next = gen.update(edge);
        assert!(next > edge);
    }

    #[test]
    fn test_hlc_json_shape() {
        let json = serde_json::to_value(Hlc::new(5, 2)).unwrap();
        assert_eq!(json, serde_json::json!({"wallTime": 5, "logical": 2}));
    }
}
