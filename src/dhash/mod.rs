//! DHash storage layer
//!
//! Block insertion, availability accounting and repair on top of the ring.
//! `DHash` places pieces implicitly on ring successors; `TotalRecall` keeps
//! an explicit host list per block.

pub mod base;
pub mod oracle;
pub mod pmaint;
pub mod policy;
pub mod totalrecall;

pub use base::DHash;
pub use policy::{OracleKind, Placement, Policy, TotalRecallConfig, TotalRecallMode};
pub use totalrecall::TotalRecall;

use crate::simulation::Event;
use crate::storage::{ChordId, Ring};
use crate::Result;
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included, Unbounded};

/// A simulated DHT driven by the event engine
pub trait Dht {
    /// Apply one event, returning any events it schedules
    fn process(&mut self, ev: &Event) -> Result<Vec<Event>>;

    fn ring(&self) -> &Ring;

    fn policy(&self) -> &Policy;

    /// Every block ever inserted, with its whole size
    fn blocks(&self) -> &BTreeMap<ChordId, u64>;

    /// Number of readable blocks and the raw per-block piece counts
    fn available_blocks(&self) -> (usize, Vec<usize>);

    /// Recount every block from scratch and compare with the maintained
    /// counters
    fn check_availability(&self) -> Result<()>;

    /// Number of times a block was found with no piece left
    fn lost_blocks(&self) -> usize;

    /// Accumulated block-time spent unreadable, where tracked
    fn total_unavailability(&self) -> u64 {
        0
    }
}

/// Membership changes that trigger repair in addition to bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairTriggers {
    pub join: bool,
    pub fail: bool,
    pub crash: bool,
}

impl RepairTriggers {
    /// Bookkeeping only
    pub fn none() -> Self {
        Self::default()
    }

    /// Repair after every membership change
    pub fn all() -> Self {
        Self {
            join: true,
            fail: true,
            crash: true,
        }
    }

    /// Repair after joins and crashes, not after transient failures
    pub fn join_and_crash() -> Self {
        Self {
            join: true,
            fail: false,
            crash: true,
        }
    }
}

/// Keys of `blocks` in the ring arc `(from, to]`; the whole ring when
/// `from == to`.
pub(crate) fn blocks_in_arc(
    blocks: &BTreeMap<ChordId, u64>,
    from: ChordId,
    to: ChordId,
) -> Vec<ChordId> {
    if from < to {
        blocks
            .range((Excluded(from), Included(to)))
            .map(|(&b, _)| b)
            .collect()
    } else if from > to {
        blocks
            .range((Excluded(from), Unbounded))
            .chain(blocks.range(..=to))
            .map(|(&b, _)| b)
            .collect()
    } else {
        blocks.keys().copied().collect()
    }
}

/// Arcs `(from, first]` of block keys whose look-ahead window may contain
/// `id`, each paired with the first successor of the arc. When fewer than
/// `look_ahead` other members exist every arc of the ring is returned.
/// An empty ring yields the single whole-ring arc `(id, id]`.
pub(crate) fn affected_arcs(ring: &Ring, id: ChordId, look_ahead: usize) -> Vec<(ChordId, ChordId)> {
    if ring.is_empty() {
        return vec![(id, id)];
    }
    let others = ring.len() - usize::from(ring.is_alive(id));
    if others < look_ahead || others == 0 {
        return ring
            .alive_ids()
            .iter()
            .filter_map(|&x| ring.predecessor(x).map(|p| (p, x)))
            .collect();
    }

    let mut bounds = ring.pred(id, look_ahead);
    let end = if ring.is_alive(id) {
        Some(id)
    } else {
        ring.successor(id)
    };
    bounds.extend(end);
    bounds.windows(2).map(|w| (w[0], w[1])).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_index(keys: &[ChordId]) -> BTreeMap<ChordId, u64> {
        keys.iter().map(|&k| (k, 100)).collect()
    }

    #[test]
    fn test_blocks_in_arc() {
        let blocks = block_index(&[1, 4, 10, 30, 60]);
        assert_eq!(blocks_in_arc(&blocks, 4, 30), vec![10, 30]);
        assert_eq!(blocks_in_arc(&blocks, 30, 4), vec![60, 1, 4]);
        assert_eq!(blocks_in_arc(&blocks, 10, 10).len(), 5);
        assert!(blocks_in_arc(&blocks, 11, 29).is_empty());
    }

    #[test]
    fn test_affected_arcs() {
        let mut ring = Ring::new(1000);
        for id in [4, 17, 23, 30, 42, 55, 63] {
            ring.add_node(0, id).unwrap();
        }
        assert_eq!(affected_arcs(&ring, 30, 2), vec![(17, 23), (23, 30)]);

        ring.fail_node(1, 30).unwrap();
        assert_eq!(affected_arcs(&ring, 30, 2), vec![(17, 23), (23, 42)]);

        // Small rings affect every arc
        let arcs = affected_arcs(&ring, 30, 9);
        assert_eq!(arcs.len(), 6);
        assert!(arcs.contains(&(63, 4)));
    }

    #[test]
    fn test_affected_arcs_on_empty_ring() {
        let mut ring = Ring::new(1000);
        ring.add_node(0, 10).unwrap();
        ring.fail_node(1, 10).unwrap();
        let arcs = affected_arcs(&ring, 10, 3);
        assert_eq!(arcs, vec![(10, 10)]);

        let blocks = block_index(&[5, 10, 99]);
        assert_eq!(blocks_in_arc(&blocks, arcs[0].0, arcs[0].1).len(), 3);
    }
}
