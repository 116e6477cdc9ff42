//! Partition maintenance
//!
//! After a join, fragments are moved so that each block sits on its first
//! `insert_pieces()` successors again: the newcomer hands off pieces it is
//! no longer responsible for and takes over pieces from members it pushed
//! out of a block's range. Transfers happen immediately.

use crate::dhash::{blocks_in_arc, DHash};
use crate::storage::{ChordId, SentCategory};
use log::debug;
use std::collections::BTreeSet;

impl DHash {
    /// Rebalance the pieces around the newly joined member `id`
    pub(crate) fn partition_maintenance(&mut self, t: u64, id: ChordId) {
        let keep = self.policy.insert_pieces();
        let mut touched = BTreeSet::new();

        // Hand off what the newcomer holds outside its range
        let held = self.ring.node(id).map(|n| n.block_ids()).unwrap_or_default();
        for block in held {
            let responsible = self.ring.succ(block, keep);
            if responsible.contains(&id) {
                continue;
            }
            let Some(size) = self.ring.node_mut(id).and_then(|n| n.unstore(block)) else {
                continue;
            };
            let target = responsible
                .iter()
                .copied()
                .find(|&n| !self.ring.holds(n, block));
            if let Some(dst) = target {
                if let Some(node) = self.ring.node_mut(dst) {
                    node.store(block, size);
                }
                if let Some(node) = self.ring.node_mut(id) {
                    node.charge(SentCategory::PmaintRepairWrite, 1, size);
                }
                debug!("{}: pmaint {:x} hands {:x} to {:x}", t, id, block, dst);
            }
            touched.insert(block);
        }

        // Pull in what now falls in the newcomer's range
        if let Some(&from) = self.ring.pred(id, keep).first() {
            for block in blocks_in_arc(&self.blocks, from, id) {
                if self.ring.holds(id, block) {
                    continue;
                }
                let extended = self.ring.succ(block, keep + 1);
                let Some(&old) = extended.get(keep) else {
                    continue;
                };
                if old == id || !self.ring.holds(old, block) {
                    continue;
                }
                let Some(size) = self.ring.node_mut(old).and_then(|n| n.unstore(block)) else {
                    continue;
                };
                if let Some(node) = self.ring.node_mut(old) {
                    node.charge(SentCategory::PmaintRepairWrite, 1, size);
                }
                if let Some(node) = self.ring.node_mut(id) {
                    node.store(block, size);
                }
                debug!("{}: pmaint {:x} takes {:x} from {:x}", t, id, block, old);
                touched.insert(block);
            }
        }

        for block in touched {
            self.recount(block);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::dhash::{DHash, Dht, Policy, RepairTriggers};
    use crate::simulation::Event;
    use crate::storage::SentCategory;

    fn cates_ring(ids: impl Iterator<Item = u64>) -> DHash {
        let mut dht = DHash::new(Policy::Cates, RepairTriggers::none(), 1000);
        for id in ids {
            dht.process(&Event::join(0, id)).unwrap();
        }
        dht
    }

    #[test]
    fn test_join_pulls_fragments_into_range() {
        // 20 members at 10, 20, ..., 200
        let mut dht = cates_ring((1..=20).map(|i| i * 10));
        dht.process(&Event::insert(1, 10, 15, 7000)).unwrap();
        // Fragments on 20..=150
        assert!(dht.ring.holds(150, 15));
        assert!(!dht.ring.holds(160, 15));

        dht.process(&Event::join(2, 25)).unwrap();
        assert!(dht.ring.holds(25, 15));
        assert!(!dht.ring.holds(150, 15));
        assert_eq!(
            dht.ring
                .node(150)
                .unwrap()
                .sent_breakdown()
                .get(SentCategory::PmaintRepairWrite),
            1020
        );
        assert_eq!(dht.availability(15), Some(14));
        dht.check_availability().unwrap();
    }

    #[test]
    fn test_rejoin_hands_off_stale_fragments() {
        let mut dht = cates_ring((1..=20).map(|i| i * 10));
        dht.process(&Event::insert(1, 10, 15, 7000)).unwrap();

        // 18 joins while 150 is away with its fragment on disk
        dht.process(&Event::fail(2, 150)).unwrap();
        dht.process(&Event::join(3, 18)).unwrap();
        assert!(!dht.ring.holds(18, 15));
        dht.process(&Event::join(4, 150)).unwrap();

        // 150 is now the 15th successor of 15 and hands its piece to 18
        let node = dht.ring.node(150).unwrap();
        assert!(!node.holds(15));
        assert!(dht.ring.holds(18, 15));
        dht.check_availability().unwrap();
    }

    #[test]
    fn test_small_ring_skips_maintenance() {
        let mut dht = cates_ring((1..=10).map(|i| i * 10));
        dht.process(&Event::insert(1, 10, 15, 7000)).unwrap();
        dht.process(&Event::join(2, 12)).unwrap();
        assert!(!dht.ring.holds(12, 15));
    }
}
