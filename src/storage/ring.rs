//! Consistent-hashing ring
//!
//! The ring owns every node ever seen in an arena keyed by id and keeps a
//! sorted sequence of the ids that are currently alive. Successor and
//! predecessor walks over that sequence are the only routing primitive.

use crate::storage::{ChordId, Node};
use crate::{Result, SimError};
use std::collections::{BTreeMap, BTreeSet};

/// Membership table of the simulated DHT
#[derive(Debug, Clone)]
pub struct Ring {
    /// Alive node ids in ascending order
    alive: Vec<ChordId>,
    /// Every node ever seen, alive or not
    nodes: BTreeMap<ChordId, Node>,
    /// Ids of nodes currently offline
    dead: BTreeSet<ChordId>,
    /// Uplink bandwidth given to newly created nodes
    bandwidth: u64,
}

impl Ring {
    /// Create an empty ring whose nodes get `bandwidth` bytes per time unit
    pub fn new(bandwidth: u64) -> Self {
        Self {
            alive: Vec::new(),
            nodes: BTreeMap::new(),
            dead: BTreeSet::new(),
            bandwidth,
        }
    }

    /// Number of alive members
    pub fn len(&self) -> usize {
        self.alive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alive.is_empty()
    }

    /// Alive member ids in ring order
    pub fn alive_ids(&self) -> &[ChordId] {
        &self.alive
    }

    /// Ids of members currently offline
    pub fn dead_ids(&self) -> impl Iterator<Item = ChordId> + '_ {
        self.dead.iter().copied()
    }

    pub fn node(&self, id: ChordId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: ChordId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Every node ever seen
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Alive nodes in ring order
    pub fn alive_nodes(&self) -> impl Iterator<Item = &Node> {
        self.alive.iter().filter_map(move |id| self.nodes.get(id))
    }

    pub fn is_alive(&self, id: ChordId) -> bool {
        self.nodes.get(&id).map(|n| n.is_alive()).unwrap_or(false)
    }

    /// True if `id` is alive and holds a piece of `block`
    pub fn holds(&self, id: ChordId, block: ChordId) -> bool {
        self.nodes
            .get(&id)
            .map(|n| n.is_alive() && n.holds(block))
            .unwrap_or(false)
    }

    /// Create or revive the node `id` at time `t`
    pub fn add_node(&mut self, t: u64, id: ChordId) -> Result<()> {
        match self.nodes.get_mut(&id) {
            Some(node) if node.is_alive() => return Err(SimError::DuplicateMember(id)),
            Some(node) => {
                node.start(t);
                self.dead.remove(&id);
            }
            None => {
                self.nodes.insert(id, Node::new(id, t, self.bandwidth));
            }
        }

        match self.alive.binary_search(&id) {
            Ok(_) => Err(SimError::RingDesync(id)),
            Err(pos) => {
                self.alive.insert(pos, id);
                Ok(())
            }
        }
    }

    /// Take `id` offline at time `t`, keeping its disk. Returns whether
    /// membership changed; unknown or already dead ids are ignored.
    pub fn fail_node(&mut self, t: u64, id: ChordId) -> Result<bool> {
        self.failure(t, id, false)
    }

    /// Take `id` offline at time `t` and wipe its disk
    pub fn crash_node(&mut self, t: u64, id: ChordId) -> Result<bool> {
        self.failure(t, id, true)
    }

    fn failure(&mut self, t: u64, id: ChordId, crash: bool) -> Result<bool> {
        let Some(node) = self.nodes.get_mut(&id) else {
            return Ok(false);
        };
        if !node.is_alive() {
            return Ok(false);
        }
        if crash {
            node.crash(t);
        } else {
            node.stop(t);
        }

        let pos = self
            .alive
            .binary_search(&id)
            .map_err(|_| SimError::RingDesync(id))?;
        self.alive.remove(pos);
        self.dead.insert(id);
        Ok(true)
    }

    /// Index of the first alive member whose id is at least `key`,
    /// wrapping to 0. A member whose id equals `key` is its own successor.
    pub fn find_successor_index(&self, key: ChordId) -> usize {
        let n = self.alive.partition_point(|&id| id < key);
        if n >= self.alive.len() {
            0
        } else {
            n
        }
    }

    /// Index of the last alive member whose id is strictly below `key`,
    /// wrapping to the end.
    pub fn find_predecessor_index(&self, key: ChordId) -> usize {
        let n = self.alive.partition_point(|&id| id < key);
        if n == 0 {
            self.alive.len().saturating_sub(1)
        } else {
            n - 1
        }
    }

    /// The `num` alive members starting at the successor of `key`.
    /// `num` is clamped to the population so no member repeats.
    pub fn succ(&self, key: ChordId, num: usize) -> Vec<ChordId> {
        let len = self.alive.len();
        if len == 0 {
            return Vec::new();
        }
        let start = self.find_successor_index(key);
        (0..num.min(len))
            .map(|k| self.alive[(start + k) % len])
            .collect()
    }

    /// The `num` alive members ending at the predecessor of `key`, in ring
    /// order. A member whose id equals `key` is not included.
    pub fn pred(&self, key: ChordId, num: usize) -> Vec<ChordId> {
        let len = self.alive.len();
        if len == 0 {
            return Vec::new();
        }
        let last = self.find_predecessor_index(key);
        (0..num.min(len))
            .rev()
            .map(|k| self.alive[(last + len - k) % len])
            .collect()
    }

    /// Immediate successor of `key`
    pub fn successor(&self, key: ChordId) -> Option<ChordId> {
        self.succ(key, 1).first().copied()
    }

    /// Immediate predecessor of `key`
    pub fn predecessor(&self, key: ChordId) -> Option<ChordId> {
        self.pred(key, 1).first().copied()
    }

    /// Verify that the alive sequence is sorted, duplicate free and equal to
    /// the alive subset of the node index.
    pub fn check_consistency(&self) -> Result<()> {
        if let Some(w) = self.alive.windows(2).find(|w| w[0] >= w[1]) {
            return Err(SimError::RingDesync(w[1]));
        }
        let mut expected = self.nodes.values().filter(|n| n.is_alive()).map(|n| n.id);
        for &id in &self.alive {
            if expected.next() != Some(id) {
                return Err(SimError::RingDesync(id));
            }
        }
        if let Some(id) = expected.next() {
            return Err(SimError::RingDesync(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sample_ring() -> Ring {
        let mut ring = Ring::new(1000);
        for id in [55, 4, 23, 30, 17, 42, 63] {
            ring.add_node(0, id).unwrap();
        }
        ring
    }

    #[test]
    fn test_ring_sorted_and_duplicates() {
        let mut ring = sample_ring();
        assert_eq!(ring.alive_ids(), &[4, 17, 23, 30, 42, 55, 63]);
        assert!(matches!(
            ring.add_node(1, 4),
            Err(SimError::DuplicateMember(4))
        ));
        assert_eq!(ring.len(), 7);
        ring.check_consistency().unwrap();
    }

    #[test]
    fn test_successor_placement() {
        let ring = sample_ring();
        assert_eq!(ring.successor(73), Some(4));
        assert_eq!(ring.successor(3), Some(4));
        assert_eq!(ring.successor(4), Some(4));
        assert_eq!(ring.successor(20), Some(23));
        assert_eq!(ring.successor(56), Some(63));
        assert_eq!(ring.succ(73, 3), vec![4, 17, 23]);
        assert_eq!(ring.succ(60, 3), vec![63, 4, 17]);
    }

    #[test]
    fn test_predecessor_lookup() {
        let ring = sample_ring();
        assert_eq!(ring.find_predecessor_index(4), 6);
        assert_eq!(ring.find_predecessor_index(66), 6);
        assert_eq!(ring.find_predecessor_index(10), 0);
        assert_eq!(ring.find_predecessor_index(25), 2);

        assert_eq!(ring.predecessor(5), Some(4));
        assert_eq!(ring.predecessor(31), Some(30));
        assert_eq!(ring.predecessor(30), Some(23));
        assert_eq!(ring.predecessor(3), Some(63));
        assert_eq!(ring.pred(5, 3), vec![55, 63, 4]);
        assert_eq!(ring.pred(17, 2), vec![63, 4]);
    }

    #[test]
    fn test_spans_wrap_and_clamp() {
        let ring = sample_ring();
        for key in [0, 24, 35, 63, 64, u64::MAX] {
            assert_eq!(ring.succ(key, 3).len(), 3);
            assert_eq!(ring.pred(key, 3).len(), 3);
        }
        assert_eq!(ring.succ(30, 100), vec![30, 42, 55, 63, 4, 17, 23]);
        assert_eq!(ring.pred(30, 100), vec![30, 42, 55, 63, 4, 17, 23]);

        let empty = Ring::new(1000);
        assert!(empty.succ(5, 3).is_empty());
        assert!(empty.pred(5, 3).is_empty());
        assert_eq!(empty.successor(5), None);
    }

    #[test]
    fn test_failure_and_revival() {
        let mut ring = sample_ring();
        ring.node_mut(23).unwrap().store(20, 100);

        assert!(ring.fail_node(10, 23).unwrap());
        assert!(!ring.fail_node(11, 23).unwrap());
        assert!(!ring.crash_node(11, 999).unwrap());
        assert_eq!(ring.successor(20), Some(30));
        assert_eq!(ring.dead_ids().collect::<Vec<_>>(), vec![23]);
        assert!(ring.node(23).unwrap().holds(20));
        assert!(!ring.holds(23, 20));

        ring.add_node(20, 23).unwrap();
        assert_eq!(ring.node(23).unwrap().last_alive, 20);
        assert!(ring.holds(23, 20));

        assert!(ring.crash_node(30, 23).unwrap());
        assert!(!ring.node(23).unwrap().holds(20));
        assert_eq!(ring.node(23).unwrap().lifetime, 20);
        ring.check_consistency().unwrap();
    }

    #[test]
    fn test_lookups_match_brute_force() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut ring = Ring::new(1000);
        while ring.len() < 50 {
            let id = rng.gen_range(0..1u64 << 20);
            if !ring.is_alive(id) {
                ring.add_node(0, id).unwrap();
            }
        }
        ring.check_consistency().unwrap();
        let ids = ring.alive_ids().to_vec();

        for _ in 0..500 {
            let key = rng.gen_range(0..1u64 << 20);
            let succ = ids.iter().copied().filter(|&id| id >= key).min().unwrap_or(ids[0]);
            let pred = ids
                .iter()
                .copied()
                .filter(|&id| id < key)
                .max()
                .unwrap_or(ids[ids.len() - 1]);
            assert_eq!(ids[ring.find_successor_index(key)], succ);
            assert_eq!(ids[ring.find_predecessor_index(key)], pred);
        }
    }
}
