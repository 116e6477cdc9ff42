//! Simulated DHT member
//!
//! A node keeps the pieces it stores, its uptime accounting and a single
//! outbound link whose bandwidth serializes every send the node makes.

use std::collections::{BTreeMap, HashSet};

/// Identifier in the ring key space, shared by nodes and blocks
pub type ChordId = u64;

/// Liveness of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Node is a member of the ring
    Alive,
    /// Node is offline but its disk survives
    Failed,
    /// Node is offline and lost everything it stored
    Crashed,
}

/// Why bytes left a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SentCategory {
    Insert,
    JoinRepairWrite,
    JoinRepairRead,
    FailureRepairWrite,
    FailureRepairRead,
    PmaintRepairWrite,
}

impl SentCategory {
    /// Every category, in report order
    pub const ALL: [SentCategory; 6] = [
        SentCategory::Insert,
        SentCategory::JoinRepairWrite,
        SentCategory::JoinRepairRead,
        SentCategory::FailureRepairWrite,
        SentCategory::FailureRepairRead,
        SentCategory::PmaintRepairWrite,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Name used in reports
    pub fn as_str(self) -> &'static str {
        match self {
            SentCategory::Insert => "insert",
            SentCategory::JoinRepairWrite => "join_repair_write",
            SentCategory::JoinRepairRead => "join_repair_read",
            SentCategory::FailureRepairWrite => "failure_repair_write",
            SentCategory::FailureRepairRead => "failure_repair_read",
            SentCategory::PmaintRepairWrite => "pmaint_repair_write",
        }
    }
}

impl std::fmt::Display for SentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sent bytes broken down by category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SentBytes([u64; 6]);

impl SentBytes {
    pub fn get(&self, category: SentCategory) -> u64 {
        self.0[category.index()]
    }

    fn add(&mut self, category: SentCategory, bytes: u64) {
        self.0[category.index()] += bytes;
    }

    /// Add every category of `other` into `self`
    pub fn merge(&mut self, other: &SentBytes) {
        for (mine, theirs) in self.0.iter_mut().zip(other.0) {
            *mine += theirs;
        }
    }

    /// Sum over all categories
    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }
}

/// A simulated storage endpoint on the ring
#[derive(Debug, Clone)]
pub struct Node {
    /// Position on the ring
    pub id: ChordId,
    state: NodeState,
    /// Stored block id -> stored piece size
    blocks: BTreeMap<ChordId, u64>,
    bytes: u64,
    /// Time of the most recent join; identifies this incarnation
    pub last_alive: u64,
    /// Total time spent alive in completed sessions
    pub lifetime: u64,
    /// Outbound bytes per time unit; zero means unlimited
    bandwidth: u64,
    /// Earliest time the uplink is free again
    next_send: f64,
    /// Number of RPCs issued
    pub nrpc: u64,
    /// Total bytes sent
    pub sent_bytes: u64,
    breakdown: SentBytes,
    /// Blocks this node has already reconstructed for repair
    cached_blocks: HashSet<ChordId>,
}

impl Node {
    /// Create a node that joins at time `t`
    pub fn new(id: ChordId, t: u64, bandwidth: u64) -> Self {
        Self {
            id,
            state: NodeState::Alive,
            blocks: BTreeMap::new(),
            bytes: 0,
            last_alive: t,
            lifetime: 0,
            bandwidth,
            next_send: 0.0,
            nrpc: 0,
            sent_bytes: 0,
            breakdown: SentBytes::default(),
            cached_blocks: HashSet::new(),
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn is_alive(&self) -> bool {
        self.state == NodeState::Alive
    }

    /// Bring the node back online at time `t`
    pub fn start(&mut self, t: u64) {
        self.state = NodeState::Alive;
        self.last_alive = t;
    }

    /// Take the node offline at time `t`, keeping its disk
    pub fn stop(&mut self, t: u64) {
        if self.is_alive() {
            self.lifetime += t.saturating_sub(self.last_alive);
        }
        self.state = NodeState::Failed;
    }

    /// Take the node offline at time `t` and wipe its disk
    pub fn crash(&mut self, t: u64) {
        self.stop(t);
        self.state = NodeState::Crashed;
        self.blocks.clear();
        self.bytes = 0;
        self.cached_blocks.clear();
    }

    /// Store a piece of `block`. Returns false if the node is down or
    /// already holds a piece of that block.
    pub fn store(&mut self, block: ChordId, size: u64) -> bool {
        if !self.is_alive() || self.blocks.contains_key(&block) {
            return false;
        }
        self.blocks.insert(block, size);
        self.bytes += size;
        true
    }

    /// Delete the local piece of `block`, returning its size
    pub fn unstore(&mut self, block: ChordId) -> Option<u64> {
        let size = self.blocks.remove(&block)?;
        self.bytes -= size;
        Some(size)
    }

    pub fn holds(&self, block: ChordId) -> bool {
        self.blocks.contains_key(&block)
    }

    /// Size of the stored piece of `block`, if any
    pub fn piece_size(&self, block: ChordId) -> Option<u64> {
        self.blocks.get(&block).copied()
    }

    /// Ids of all stored blocks, in key order
    pub fn block_ids(&self) -> Vec<ChordId> {
        self.blocks.keys().copied().collect()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn bytes_stored(&self) -> u64 {
        self.bytes
    }

    /// Queue `size` bytes on the uplink at time `now` and return the time
    /// the transfer completes. Sends never overlap and never start before
    /// `now`.
    pub fn sendremote(&mut self, now: u64, size: u64) -> f64 {
        let start = self.next_send.max(now as f64);
        let delay = if self.bandwidth == 0 {
            0.0
        } else {
            size as f64 / self.bandwidth as f64
        };
        self.next_send = start + delay;
        self.next_send
    }

    /// Account for `rpcs` RPCs carrying `bytes` bytes
    pub fn charge(&mut self, category: SentCategory, rpcs: u64, bytes: u64) {
        self.nrpc += rpcs;
        self.sent_bytes += bytes;
        self.breakdown.add(category, bytes);
    }

    pub fn sent_breakdown(&self) -> &SentBytes {
        &self.breakdown
    }

    pub fn is_cached(&self, block: ChordId) -> bool {
        self.cached_blocks.contains(&block)
    }

    /// Remember that this node has reconstructed `block`
    pub fn cache_block(&mut self, block: ChordId) {
        self.cached_blocks.insert(block);
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}", self.id)
    }
}
