//! Total Recall style lazy repair
//!
//! Placement is explicit: every block carries the list of hosts chosen for
//! it (its inode). Joins only update counters. Failures and crashes
//! partition each affected inode into live and dead hosts and, once the
//! live redundancy drops below the short-term factor, write new copies up
//! to the long-term factor on freshly chosen hosts.

use crate::dhash::policy::{Placement, Policy, TotalRecallConfig, TotalRecallMode};
use crate::dhash::Dht;
use crate::simulation::{Event, EventKind, RepairKind};
use crate::storage::{ChordId, Ring, SentCategory};
use crate::{Result, SimError};
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;

/// Explicit-placement DHT with lazy repair
#[derive(Debug, Clone)]
pub struct TotalRecall {
    ring: Ring,
    policy: Policy,
    config: TotalRecallConfig,
    blocks: BTreeMap<ChordId, u64>,
    /// Block id -> hosts chosen for it
    inodes: BTreeMap<ChordId, Vec<ChordId>>,
    /// Block id -> live hosts holding it
    available: BTreeMap<ChordId, usize>,
    /// Block id -> time its unavailability was last accounted
    unavailable_since: BTreeMap<ChordId, u64>,
    total_unavailability: u64,
    lost: usize,
    rng: StdRng,
}

impl TotalRecall {
    /// Create an empty DHT. `seed` fixes the random placement.
    pub fn new(config: TotalRecallConfig, bandwidth: u64, seed: u64) -> Self {
        Self {
            ring: Ring::new(bandwidth),
            policy: Policy::TotalRecall(config),
            config,
            blocks: BTreeMap::new(),
            inodes: BTreeMap::new(),
            available: BTreeMap::new(),
            unavailable_since: BTreeMap::new(),
            total_unavailability: 0,
            lost: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Hosts recorded for `block`
    pub fn inode(&self, block: ChordId) -> Option<&[ChordId]> {
        self.inodes.get(&block).map(|v| v.as_slice())
    }

    pub fn availability(&self, block: ChordId) -> Option<usize> {
        self.available.get(&block).copied()
    }

    fn live_hosts(&self, block: ChordId) -> usize {
        self.inodes
            .get(&block)
            .map(|hosts| hosts.iter().filter(|&&h| self.ring.holds(h, block)).count())
            .unwrap_or(0)
    }

    /// Set the counter of `block` and keep the unavailability clock in step
    fn set_available(&mut self, t: u64, block: ChordId, count: usize) {
        self.available.insert(block, count);
        if count < self.policy.read_pieces() {
            self.unavailable_since.entry(block).or_insert(t);
        } else {
            self.unavailable_since.remove(&block);
        }
    }

    /// Choose `n` new hosts for `block`, never one already in its inode
    fn place(&mut self, block: ChordId, n: usize) -> Vec<ChordId> {
        let excluded = self.inodes.get(&block);
        let eligible = |id: &ChordId| excluded.map(|hosts| !hosts.contains(id)).unwrap_or(true);
        match self.config.placement {
            Placement::Random => {
                let options: Vec<ChordId> = self
                    .ring
                    .alive_ids()
                    .iter()
                    .copied()
                    .filter(eligible)
                    .collect();
                options.choose_multiple(&mut self.rng, n).copied().collect()
            }
            Placement::Successor => self
                .ring
                .succ(block, 2 * self.config.long_term)
                .into_iter()
                .filter(eligible)
                .take(n)
                .collect(),
        }
    }

    pub fn insert_block(&mut self, t: u64, origin: ChordId, block: ChordId, size: u64) -> Result<()> {
        if self.blocks.contains_key(&block) {
            debug!("{}: block {:x} already inserted", t, block);
            return Ok(());
        }
        self.blocks.insert(block, size);

        let piece = self.policy.insert_piece_size(size);
        let hosts = self.place(block, self.policy.insert_pieces());
        for &h in &hosts {
            if let Some(node) = self.ring.node_mut(h) {
                node.store(block, piece);
            }
        }
        let placed = hosts.len();
        self.inodes.insert(block, hosts);
        self.set_available(t, block, placed);

        match self.ring.node_mut(origin) {
            Some(node) => node.charge(SentCategory::Insert, placed as u64, piece * placed as u64),
            None => warn!("{}: insert of {:x} from unknown node {:x}", t, block, origin),
        }
        Ok(())
    }

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

        let listed = self
            .inodes
            .get(&block)
            .map(|hosts| hosts.contains(&dst))
            .unwrap_or(false);
        if !listed {
            return Ok(());
        }
        let stored = self
            .ring
            .node_mut(dst)
            .map(|n| n.store(block, size))
            .unwrap_or(false);
        if stored {
            let count = self.available.get(&block).copied().unwrap_or(0) + 1;
            self.set_available(t, block, count);
        }
        Ok(())
    }

    /// Re-evaluate the redundancy of `blocks` after a departure
    pub fn repair(&mut self, t: u64, blocks: &[ChordId]) -> Vec<Event> {
        let needed = self.policy.read_pieces();
        let mut events = Vec::new();

        for &block in blocks {
            let Some(hosts) = self.inodes.get(&block).cloned() else {
                continue;
            };
            let size = self.blocks[&block];
            let (live, dead): (Vec<ChordId>, Vec<ChordId>) = hosts
                .iter()
                .copied()
                .partition(|&h| self.ring.holds(h, block));
            self.set_available(t, block, live.len());

            if live.len() < needed {
                let on_disk = dead
                    .iter()
                    .any(|&h| self.ring.node(h).map(|n| n.holds(block)).unwrap_or(false));
                if live.is_empty() && !on_disk {
                    warn!("{}: LOST block {:x}", t, block);
                    self.lost += 1;
                }
                continue;
            }

            let stored: u64 = live
                .iter()
                .filter_map(|&h| self.ring.node(h).and_then(|n| n.piece_size(block)))
                .sum();
            let rfactor = stored as f64 / size as f64;
            if rfactor >= self.config.short_term as f64 {
                continue;
            }

            let piece = self.policy.insert_piece_size(size);
            let wanted = self.config.long_term.saturating_sub(live.len());
            let fresh = self.place(block, wanted);
            let fixer = live
                .iter()
                .copied()
                .find(|&n| self.ring.node(n).map(|n| n.is_cached(block)).unwrap_or(false))
                .unwrap_or(live[0]);

            let mut count = live.len();
            if let Some(fixer_node) = self.ring.node_mut(fixer) {
                let src_time = fixer_node.last_alive;
                for &dst in &fresh {
                    let done = fixer_node.sendremote(t, piece);
                    events.push(Event {
                        time: done.ceil() as u64,
                        kind: EventKind::Copy {
                            desc: RepairKind::Failure,
                            src: fixer,
                            src_time,
                            dst,
                            block,
                            size: piece,
                        },
                    });
                }
            }
            // A chosen host may still carry an old copy
            count += fresh.iter().filter(|&&h| self.ring.holds(h, block)).count();
            self.set_available(t, block, count);

            let first_rebuild = self
                .ring
                .node(fixer)
                .map(|n| !n.is_cached(block))
                .unwrap_or(false);
            if first_rebuild {
                let readers = needed.saturating_sub(1);
                for reader in live.iter().copied().filter(|&n| n != fixer).take(readers) {
                    if let Some(node) = self.ring.node_mut(reader) {
                        node.charge(SentCategory::FailureRepairRead, 0, piece);
                    }
                }
                if let Some(node) = self.ring.node_mut(fixer) {
                    node.cache_block(block);
                }
            }

            let inode: Vec<ChordId> = match self.config.mode {
                TotalRecallMode::Lazy => live.into_iter().chain(fresh).collect(),
                TotalRecallMode::Sostenuto | TotalRecallMode::SostenutoOracle => {
                    hosts.into_iter().chain(fresh).collect()
                }
            };
            self.inodes.insert(block, inode);
        }
        events
    }

    fn add_node(&mut self, t: u64, id: ChordId) -> Result<Vec<Event>> {
        self.ring.add_node(t, id)?;
        let held = self.ring.node(id).map(|n| n.block_ids()).unwrap_or_default();
        for block in held {
            let listed = self
                .inodes
                .get(&block)
                .map(|hosts| hosts.contains(&id))
                .unwrap_or(false);
            if listed {
                let count = self.available.get(&block).copied().unwrap_or(0) + 1;
                self.set_available(t, block, count);
            }
        }
        Ok(Vec::new())
    }

    fn failure(&mut self, t: u64, id: ChordId, crash: bool) -> Result<Vec<Event>> {
        let held = match self.ring.node(id) {
            Some(node) if node.is_alive() => node.block_ids(),
            _ => return Ok(Vec::new()),
        };
        if crash {
            self.ring.crash_node(t, id)?;
        } else {
            self.ring.fail_node(t, id)?;
        }

        if !crash && self.config.mode == TotalRecallMode::SostenutoOracle {
            for block in held {
                let count = self.live_hosts(block);
                if self.inodes.contains_key(&block) {
                    self.set_available(t, block, count);
                }
            }
            return Ok(Vec::new());
        }
        Ok(self.repair(t, &held))
    }
}

impl Dht for TotalRecall {
    fn process(&mut self, ev: &Event) -> Result<Vec<Event>> {
        let now = ev.time;
        for since in self.unavailable_since.values_mut() {
            self.total_unavailability += now.saturating_sub(*since);
            *since = now;
        }

        match ev.kind {
            EventKind::Join(id) => self.add_node(now, id),
            EventKind::Fail(id) => self.failure(now, id, false),
            EventKind::Crash(id) => self.failure(now, id, true),
            EventKind::Insert { node, block, size } => {
                self.insert_block(now, node, block, size)?;
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
                self.copy_block(now, src, dst, src_time, block, size, desc)?;
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
            let actual = self.live_hosts(block);
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

    fn total_unavailability(&self) -> u64 {
        self.total_unavailability
    }
}
