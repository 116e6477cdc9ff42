//! Availability simulator for DHT block storage
//!
//! A discrete-event simulation of a Chord-style ring whose members store
//! replicated or erasure-coded blocks. Nodes join, fail and crash according
//! to a trace; the selected storage policy places pieces and repairs them,
//! and a monitor reports availability and bandwidth over simulated time.

pub mod config;
pub mod dhash;
pub mod error;
pub mod monitor;
pub mod simulation;
pub mod storage;

pub use config::{PolicyConfig, SimConfig};
pub use dhash::{DHash, Dht, Policy, RepairTriggers, TotalRecall};
pub use error::SimError;
pub use monitor::{MonitorStyle, Reporter, Stats};
pub use simulation::{ChurnGenerator, Event, Simulator, TraceReader};
pub use storage::{ChordId, Node, Ring};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, SimError>;
