//! Implicit-placement DHash
//!
//! Pieces live on the successors of the block key. Where they are is never
//! recorded; it is recomputed from the ring whenever it matters. A per-block
//! availability counter caches how many pieces sit inside the block's
//! look-ahead window and is refreshed for exactly the blocks a membership
//! change can touch.

use crate::dhash::policy::Policy;
use crate::dhash::{affected_arcs, blocks_in_arc, Dht, RepairTriggers};
use crate::simulation::{Event, EventKind, RepairKind};
use crate::storage::{ChordId, Ring, SentCategory};
use crate::{Result, SimError};
use log::{debug, warn};
use std::collections::BTreeMap;

/// Ring size from which Cates runs partition maintenance on joins
const PMAINT_MIN_RING: usize = 16;

/// DHash with successor placement and lazy repair
#[derive(Debug, Clone)]
pub struct DHash {
    pub(crate) ring: Ring,
    pub(crate) policy: Policy,
    triggers: RepairTriggers,
    /// Block id -> whole size, sorted by key
    pub(crate) blocks: BTreeMap<ChordId, u64>,
    /// Block id -> pieces inside the look-ahead window
    pub(crate) available: BTreeMap<ChordId, usize>,
    pub(crate) lost: usize,
}

impl DHash {
    /// Create an empty DHT whose nodes get `bandwidth` bytes per time unit
    pub fn new(policy: Policy, triggers: RepairTriggers, bandwidth: u64) -> Self {
        Self {
            ring: Ring::new(bandwidth),
            policy,
            triggers,
            blocks: BTreeMap::new(),
            available: BTreeMap::new(),
            lost: 0,
        }
    }

    /// Current availability counter of `block`
    pub fn availability(&self, block: ChordId) -> Option<usize> {
        self.available.get(&block).copied()
    }

    /// Nodes responsible for `block`: the look-ahead window of successors
    pub fn window(&self, block: ChordId) -> Vec<ChordId> {
        self.ring.succ(block, self.policy.look_ahead())
    }

    /// Count the pieces of `block` inside its window by scanning
    pub fn count_pieces(&self, block: ChordId) -> usize {
        self.window(block)
            .into_iter()
            .filter(|&n| self.ring.holds(n, block))
            .count()
    }

    pub(crate) fn recount(&mut self, block: ChordId) {
        let count = self.count_pieces(block);
        self.available.insert(block, count);
    }

    /// Refresh the counters of every block whose window may have changed
    /// because `id` joined or left.
    pub(crate) fn refresh_around(&mut self, id: ChordId) {
        for (from, first) in affected_arcs(&self.ring, id, self.policy.look_ahead()) {
            for block in blocks_in_arc(&self.blocks, from, first) {
                self.recount(block);
            }
        }
    }

    /// Store `insert_pieces()` pieces of a new block on its successors
    pub fn insert_block(&mut self, t: u64, origin: ChordId, block: ChordId, size: u64) -> Result<()> {
        if self.blocks.contains_key(&block) {
            debug!("{}: block {:x} already inserted", t, block);
            return Ok(());
        }
        self.blocks.insert(block, size);

        let piece = self.policy.insert_piece_size(size);
        let targets = self.ring.succ(block, self.policy.insert_pieces());
        let mut placed = 0;
        for &s in &targets {
            if let Some(node) = self.ring.node_mut(s) {
                if node.store(block, piece) {
                    placed += 1;
                }
            }
        }
        self.available.insert(block, placed);

        match self.ring.node_mut(origin) {
            Some(node) => node.charge(SentCategory::Insert, placed as u64, piece * placed as u64),
            None => warn!("{}: insert of {:x} from unknown node {:x}", t, block, origin),
        }
        Ok(())
    }

    /// Deliver a repair transfer. Transfers whose endpoints died, or whose
    /// source rejoined since scheduling, are dropped.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_block(
        &mut self,
        t: u64,
        src: ChordId,
        dst: ChordId,
        src_time: u64,
        block: ChordId,
        size: u64,
        desc: RepairKind,
    ) -> Result<()> {
        if !self.blocks.contains_key(&block) {
            return Err(SimError::UnknownBlock(block));
        }
        if !self.ring.is_alive(src) || !self.ring.is_alive(dst) {
            debug!("{}: dropped copy of {:x}, {:x}->{:x} is down", t, block, src, dst);
            return Ok(());
        }
        let Some(source) = self.ring.node_mut(src) else {
            return Ok(());
        };
        if source.last_alive != src_time {
            debug!("{}: source {:x} failed to copy {:x}", t, src, block);
            return Ok(());
        }
        source.charge(desc.write_category(), 1, size);

        if !self.window(block).contains(&dst) {
            return Ok(());
        }
        let stored = self
            .ring
            .node_mut(dst)
            .map(|n| n.store(block, size))
            .unwrap_or(false);
        if stored {
            *self.available.entry(block).or_insert(0) += 1;
        }
        Ok(())
    }

    /// Check the blocks around `id` and schedule copies for those below
    /// `min_pieces()`.
    pub fn repair(&mut self, t: u64, id: ChordId, desc: RepairKind) -> Vec<Event> {
        let la = self.policy.look_ahead();
        let mut events = Vec::new();
        for (from, first) in affected_arcs(&self.ring, id, la) {
            let window = self.ring.succ(first, la);
            for block in blocks_in_arc(&self.blocks, from, first) {
                self.repair_block(t, id, desc, block, &window, &mut events);
            }
        }
        events
    }

    fn repair_block(
        &mut self,
        t: u64,
        id: ChordId,
        desc: RepairKind,
        block: ChordId,
        window: &[ChordId],
        events: &mut Vec<Event>,
    ) {
        let haves: Vec<ChordId> = window
            .iter()
            .copied()
            .filter(|&n| self.ring.holds(n, block))
            .collect();
        if haves.is_empty() {
            warn!("{}: LOST block {:x} after {} of {:x}", t, block, desc, id);
            self.lost += 1;
            return;
        }
        let min = self.policy.min_pieces();
        if haves.len() >= min {
            return;
        }

        let lacking: Vec<ChordId> = window
            .iter()
            .copied()
            .filter(|&n| !self.ring.holds(n, block))
            .take(min - haves.len())
            .collect();
        if lacking.is_empty() {
            return;
        }
        debug!("{}: REPAIR block {:x} after {} of {:x}", t, block, desc, id);

        let piece = self.policy.insert_piece_size(self.blocks[&block]);
        let fixer = haves
            .iter()
            .copied()
            .find(|&n| self.ring.node(n).map(|n| n.is_cached(block)).unwrap_or(false))
            .unwrap_or(haves[0]);

        let Some(fixer_node) = self.ring.node_mut(fixer) else {
            return;
        };
        let src_time = fixer_node.last_alive;
        for dst in lacking {
            let done = fixer_node.sendremote(t, piece);
            events.push(Event {
                time: done.ceil() as u64,
                kind: EventKind::Copy {
                    desc,
                    src: fixer,
                    src_time,
                    dst,
                    block,
                    size: piece,
                },
            });
        }
        let first_rebuild = !fixer_node.is_cached(block);
        fixer_node.cache_block(block);

        // Rebuilding costs one piece from each of the other holders needed
        // for a read, paid once per fixer.
        if first_rebuild {
            let readers = self.policy.read_pieces().saturating_sub(1);
            for reader in haves.into_iter().filter(|&n| n != fixer).take(readers) {
                if let Some(node) = self.ring.node_mut(reader) {
                    node.charge(desc.read_category(), 0, piece);
                }
            }
        }
    }

    fn add_node(&mut self, t: u64, id: ChordId) -> Result<Vec<Event>> {
        if let Policy::Oracle(_) = self.policy {
            return self.oracle_join(t, id);
        }
        self.ring.add_node(t, id)?;
        self.refresh_around(id);
        if self.policy == Policy::Cates && self.ring.len() >= PMAINT_MIN_RING {
            self.partition_maintenance(t, id);
        }
        Ok(if self.triggers.join {
            self.repair(t, id, RepairKind::Join)
        } else {
            Vec::new()
        })
    }

    fn failure(&mut self, t: u64, id: ChordId, crash: bool) -> Result<Vec<Event>> {
        if let Policy::Oracle(kind) = self.policy {
            return self.oracle_failure(t, id, kind, crash);
        }
        let changed = if crash {
            self.ring.crash_node(t, id)?
        } else {
            self.ring.fail_node(t, id)?
        };
        if !changed {
            return Ok(Vec::new());
        }
        self.refresh_around(id);
        let repair = if crash {
            self.triggers.crash
        } else {
            self.triggers.fail
        };
        Ok(if repair {
            self.repair(t, id, RepairKind::Failure)
        } else {
            Vec::new()
        })
    }
}

impl Dht for DHash {
    fn process(&mut self, ev: &Event) -> Result<Vec<Event>> {
        let t = ev.time;
        match ev.kind {
            EventKind::Join(id) => self.add_node(t, id),
            EventKind::Fail(id) => self.failure(t, id, false),
            EventKind::Crash(id) => self.failure(t, id, true),
            EventKind::Insert { node, block, size } => {
                self.insert_block(t, node, block, size)?;
                Ok(Vec::new())
            }
            EventKind::Copy {
                desc,
                src,
                src_time,
                dst,
                block,
                size,
            } => {
                self.copy_block(t, src, dst, src_time, block, size, desc)?;
                Ok(Vec::new())
            }
        }
    }

    fn ring(&self) -> &Ring {
        &self.ring
    }

    fn policy(&self) -> &Policy {
        &self.policy
    }

    fn blocks(&self) -> &BTreeMap<ChordId, u64> {
        &self.blocks
    }

    fn available_blocks(&self) -> (usize, Vec<usize>) {
        let needed = self.policy.read_pieces();
        let counts: Vec<usize> = self.available.values().copied().collect();
        let readable = counts.iter().filter(|&&c| c >= needed).count();
        (readable, counts)
    }

    fn check_availability(&self) -> Result<()> {
        for (&block, &cached) in &self.available {
            let actual = self.count_pieces(block);
            if actual != cached {
                return Err(SimError::CounterDesync {
                    block,
                    cached,
                    actual,
                });
            }
        }
        Ok(())
    }

    fn lost_blocks(&self) -> usize {
        self.lost
    }
}
