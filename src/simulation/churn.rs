//! Churn trace generation
//!
//! Produces a synthetic event trace: a population of nodes joins, then
//! cycles through failures (some of them crashes) and rejoins with
//! normally distributed session and downtime lengths, while one node keeps
//! inserting blocks.

use crate::simulation::{Event, EventKind, EventQueue, DEFAULT_BLOCK_SIZE};
use crate::storage::ChordId;
use crate::{Result, SimError};
use log::info;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;
use std::collections::BTreeSet;

/// Parameters of the churn model. Times are in simulation ticks.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChurnConfig {
    /// Size of the initial population
    pub initial_nodes: usize,
    /// Node and block ids are drawn from `0..2^nbits`
    pub nbits: u32,
    /// Mean downtime
    pub mttr: f64,
    /// Mean session length
    pub mttf: f64,
    /// Standard deviation of both
    pub sd: f64,
    /// Chance that a failure is a crash
    pub crash_prob: f64,
    /// Mean blocks inserted per tick
    pub mu_i: f64,
    pub sd_i: f64,
    /// No event is emitted at or after this time
    pub stop_time: u64,
}

impl Default for ChurnConfig {
    fn default() -> Self {
        Self {
            initial_nodes: 200,
            nbits: 20,
            mttr: 60.0,
            mttf: 60.0,
            sd: 30.0,
            crash_prob: 0.10,
            mu_i: 10.0,
            sd_i: 10.0,
            stop_time: 1000,
        }
    }
}

impl ChurnConfig {
    pub fn validate(&self) -> Result<()> {
        if self.nbits == 0 || self.nbits > 64 {
            return Err(SimError::config("nbits must be in 1..=64"));
        }
        if self.initial_nodes == 0 {
            return Err(SimError::config("initial_nodes must be greater than 0"));
        }
        if self.nbits < 64 && self.initial_nodes as u128 > 1u128 << self.nbits {
            return Err(SimError::config(format!(
                "{} nodes do not fit in a {}-bit id space",
                self.initial_nodes, self.nbits
            )));
        }
        if !(0.0..=1.0).contains(&self.crash_prob) {
            return Err(SimError::config("crash_prob must be within [0, 1]"));
        }
        Ok(())
    }
}

/// Seeded generator for churn traces
pub struct ChurnGenerator {
    config: ChurnConfig,
    rng: StdRng,
    session: Normal<f64>,
    downtime: Normal<f64>,
}

impl ChurnGenerator {
    pub fn new(config: ChurnConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        let session = Normal::new(config.mttf, config.sd).map_err(SimError::config)?;
        let downtime = Normal::new(config.mttr, config.sd).map_err(SimError::config)?;
        Ok(Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            session,
            downtime,
        })
    }

    fn random_id(&mut self) -> ChordId {
        if self.config.nbits == 64 {
            self.rng.gen()
        } else {
            self.rng.gen_range(0..1u64 << self.config.nbits)
        }
    }

    /// Draw a non-negative whole number of ticks
    fn interval(&mut self, dist: Normal<f64>) -> u64 {
        dist.sample(&mut self.rng).max(0.0) as u64
    }

    /// Generate the whole trace, in non-decreasing time order
    pub fn generate(&mut self) -> Result<Vec<Event>> {
        let cfg = self.config.clone();
        let mut queue = EventQueue::default();

        let warmup = Normal::new(cfg.mttr / 2.0, cfg.sd / 2.0).map_err(SimError::config)?;
        let mut ids = BTreeSet::new();
        let mut first: Option<(u64, ChordId)> = None;
        while ids.len() < cfg.initial_nodes {
            let id = self.random_id();
            if !ids.insert(id) {
                continue;
            }
            let t = self.interval(warmup);
            if first.map(|(ft, _)| t < ft).unwrap_or(true) {
                first = Some((t, id));
            }
            queue.push(Event::join(t, id));
        }
        let Some((_, inserter)) = first else {
            return Ok(Vec::new());
        };

        let per_tick = Normal::new(cfg.mu_i, cfg.sd_i).map_err(SimError::config)?;
        for t in 0..cfg.stop_time {
            if t as f64 <= cfg.mttr {
                continue;
            }
            for _ in 0..self.interval(per_tick) {
                let block = self.random_id();
                queue.push(Event::insert(t, inserter, block, DEFAULT_BLOCK_SIZE));
            }
        }

        let mut trace = Vec::new();
        while let Some(ev) = queue.pop() {
            if ev.time >= cfg.stop_time {
                break;
            }
            match ev.kind {
                EventKind::Fail(id) | EventKind::Crash(id) => {
                    let back = ev.time + self.interval(self.downtime);
                    queue.push(Event::join(back, id));
                }
                EventKind::Join(id) => {
                    // No failures before the population has settled
                    let start = ev.time.max(cfg.mttf as u64);
                    let at = start + self.interval(self.session);
                    if self.rng.gen::<f64>() < cfg.crash_prob {
                        queue.push(Event::crash(at, id));
                    } else {
                        queue.push(Event::fail(at, id));
                    }
                }
                _ => {}
            }
            trace.push(ev);
        }
        info!(
            "generated {} churn events for {} nodes",
            trace.len(),
            cfg.initial_nodes
        );
        Ok(trace)
    }
}
