//! Oracle repair
//!
//! The oracle keeps a single copy of every block and knows the future: it
//! moves a copy away from a node right before that node takes the last copy
//! with it. Its repair cost is a lower bound for any real policy.

use crate::dhash::{DHash, OracleKind};
use crate::simulation::Event;
use crate::storage::{ChordId, SentCategory};
use crate::Result;
use log::{debug, warn};

impl DHash {
    /// Join `id`, sending home any blocks it holds that belong to another
    /// member
    pub(crate) fn oracle_join(&mut self, t: u64, id: ChordId) -> Result<Vec<Event>> {
        self.ring.add_node(t, id)?;
        self.refresh_around(id);

        let held = self.ring.node(id).map(|n| n.block_ids()).unwrap_or_default();
        for block in held {
            let Some(home) = self.ring.successor(block) else {
                continue;
            };
            if home == id {
                continue;
            }
            let Some(size) = self.ring.node_mut(id).and_then(|n| n.unstore(block)) else {
                continue;
            };
            if !self.ring.holds(home, block) {
                if let Some(node) = self.ring.node_mut(home) {
                    node.store(block, size);
                }
                if let Some(node) = self.ring.node_mut(id) {
                    node.charge(SentCategory::JoinRepairWrite, 1, size);
                }
            }
            self.recount(block);
        }
        Ok(Vec::new())
    }

    /// Take `id` down, first rescuing every block for which it holds the
    /// only copy when the departure would make that block unavailable
    pub(crate) fn oracle_failure(
        &mut self,
        t: u64,
        id: ChordId,
        kind: OracleKind,
        crash: bool,
    ) -> Result<Vec<Event>> {
        if !self.ring.is_alive(id) {
            return Ok(Vec::new());
        }
        let rescue = crash || kind == OracleKind::Availability;
        let at_risk: Vec<(ChordId, u64)> = if rescue {
            self.sole_copies(id)
        } else {
            Vec::new()
        };

        if crash {
            self.ring.crash_node(t, id)?;
        } else {
            self.ring.fail_node(t, id)?;
        }
        self.refresh_around(id);

        let look_ahead = self.policy.look_ahead();
        for (block, size) in at_risk {
            let target = self
                .ring
                .succ(block, look_ahead)
                .into_iter()
                .find(|&n| !self.ring.holds(n, block));
            match target.and_then(|dst| self.ring.node_mut(dst)) {
                Some(node) => {
                    node.store(block, size);
                    debug!("{}: oracle moves {:x} off {:x} to {:x}", t, block, id, node.id);
                }
                None => {
                    warn!("{}: LOST block {:x} after failure of {:x}", t, block, id);
                    self.lost += 1;
                    continue;
                }
            }
            if let Some(node) = self.ring.node_mut(id) {
                node.charge(SentCategory::FailureRepairWrite, 1, size);
            }
            self.recount(block);
        }
        Ok(Vec::new())
    }

    /// Blocks whose window holds a piece only on `id`
    fn sole_copies(&self, id: ChordId) -> Vec<(ChordId, u64)> {
        let Some(node) = self.ring.node(id) else {
            return Vec::new();
        };
        node.block_ids()
            .into_iter()
            .filter(|&block| {
                let window = self.window(block);
                window.contains(&id)
                    && window
                        .iter()
                        .all(|&n| n == id || !self.ring.holds(n, block))
            })
            .filter_map(|block| node.piece_size(block).map(|size| (block, size)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::dhash::{DHash, Dht, OracleKind, Policy, RepairTriggers};
    use crate::simulation::Event;
    use crate::storage::SentCategory;

    fn oracle(kind: OracleKind) -> DHash {
        let mut dht = DHash::new(Policy::Oracle(kind), RepairTriggers::all(), 1000);
        for id in [4, 17, 23, 30, 42, 55, 63] {
            dht.process(&Event::join(0, id)).unwrap();
        }
        dht.process(&Event::insert(1, 4, 20, 8192)).unwrap();
        dht
    }

    #[test]
    fn test_durability_oracle_survives_crash() {
        let mut dht = oracle(OracleKind::Durability);
        assert!(dht.ring.holds(23, 20));

        assert!(dht.process(&Event::crash(5, 23)).unwrap().is_empty());
        assert!(dht.ring.holds(30, 20));
        assert_eq!(dht.availability(20), Some(1));
        assert_eq!(
            dht.ring
                .node(23)
                .unwrap()
                .sent_breakdown()
                .get(SentCategory::FailureRepairWrite),
            8192
        );
        dht.check_availability().unwrap();
    }

    #[test]
    fn test_durability_oracle_ignores_transient_failure() {
        let mut dht = oracle(OracleKind::Durability);
        dht.process(&Event::fail(5, 23)).unwrap();
        assert!(!dht.ring.holds(30, 20));
        assert_eq!(dht.availability(20), Some(0));

        // The copy comes back with its host
        dht.process(&Event::join(6, 23)).unwrap();
        assert_eq!(dht.availability(20), Some(1));
        assert_eq!(dht.ring.node(23).unwrap().sent_bytes, 0);
    }

    #[test]
    fn test_availability_oracle_moves_before_failure() {
        let mut dht = oracle(OracleKind::Availability);
        dht.process(&Event::fail(5, 23)).unwrap();
        assert!(dht.ring.holds(30, 20));
        assert_eq!(dht.availability(20), Some(1));

        // 23 comes back with its copy still on disk
        dht.process(&Event::join(6, 23)).unwrap();
        assert!(dht.ring.holds(23, 20));
        assert_eq!(dht.availability(20), Some(2));
        dht.check_availability().unwrap();
    }

    #[test]
    fn test_rejoining_node_sends_blocks_home() {
        let mut dht = oracle(OracleKind::Durability);
        dht.process(&Event::fail(5, 23)).unwrap();
        dht.process(&Event::join(6, 21)).unwrap();
        dht.process(&Event::join(7, 23)).unwrap();

        assert!(dht.ring.holds(21, 20));
        assert!(!dht.ring.node(23).unwrap().holds(20));
        assert_eq!(
            dht.ring
                .node(23)
                .unwrap()
                .sent_breakdown()
                .get(SentCategory::JoinRepairWrite),
            8192
        );
        dht.check_availability().unwrap();
    }
}
