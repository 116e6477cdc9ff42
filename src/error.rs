//! Error type for the simulator
//!
//! Usage faults and broken invariants abort a run; expected races during
//! repair never reach this type.

use crate::storage::ChordId;

/// Errors produced by the simulation core and its front end
#[derive(thiserror::Error, Debug)]
pub enum SimError {
    /// A join named a node that is already alive
    #[error("duplicate insert of {0:x}")]
    DuplicateMember(ChordId),

    /// A repair referenced a block that was never inserted
    #[error("unknown block {0:x}")]
    UnknownBlock(ChordId),

    /// An event arrived with a time earlier than the last dispatched one
    #[error("time can't go backwards: {last} > {now}")]
    TimeWentBackward { last: u64, now: u64 },

    /// The alive sequence and the node index disagree
    #[error("ring index out of sync at {0:x}")]
    RingDesync(ChordId),

    /// A maintained availability counter disagrees with a fresh count
    #[error("availability of {block:x} is {cached}, scan says {actual}")]
    CounterDesync {
        block: ChordId,
        cached: usize,
        actual: usize,
    },

    /// An event record could not be parsed
    #[error("bad event at line {line}: {msg}")]
    BadEvent { line: usize, msg: String },

    /// Invalid policy or simulator configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl SimError {
    /// Build a configuration error from any message
    pub fn config(msg: impl ToString) -> Self {
        SimError::Config(msg.to_string())
    }
}
