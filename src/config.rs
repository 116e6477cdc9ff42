//! Simulator and policy configuration
//!
//! `SimConfig` holds the knobs of a run and can be overridden from a TOML
//! string. `PolicyConfig` turns a policy type name plus free-form tokens
//! into a typed policy.

use crate::dhash::{
    DHash, OracleKind, Placement, Policy, RepairTriggers, TotalRecall, TotalRecallConfig,
    TotalRecallMode,
};
use crate::simulation::ChurnConfig;
use crate::{Result, SimError};
use serde::Deserialize;

/// Per-node outbound bandwidth in bytes per time unit
pub const DEFAULT_BANDWIDTH: u64 = 125_000;

/// Default monitor period: twelve hours of one-second ticks
pub const DEFAULT_MONITOR_INTERVAL: u64 = 12 * 60 * 60;

/// Knobs of a simulation run
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    pub bandwidth: u64,
    pub monitor_interval: u64,
    /// Seed for random placement and generated churn
    pub seed: Option<u64>,
    /// Also report block spread
    pub spread: bool,
    /// Churn model for generated traces
    pub churn: ChurnConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            bandwidth: DEFAULT_BANDWIDTH,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            seed: None,
            spread: false,
            churn: ChurnConfig::default(),
        }
    }
}

impl SimConfig {
    /// Parse a TOML string over the defaults. Unknown keys are an error.
    pub fn from_toml(config_str: &str) -> Result<Self> {
        let config: SimConfig = toml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.monitor_interval == 0 {
            return Err(SimError::config("monitor_interval must be greater than 0"));
        }
        self.churn.validate()
    }
}

/// Policy type names accepted by `PolicyConfig::from_args`
pub const POLICY_TYPES: [&str; 9] = [
    "availability_oracle",
    "cates",
    "dhash_fragments",
    "dhash_replica",
    "dhash_replica_norepair",
    "durability_oracle",
    "sostenuto",
    "sostenuto_oracle",
    "totalrecall_lazy_replica",
];

/// A typed, validated policy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyConfig {
    /// Implicit successor placement
    DHash {
        policy: Policy,
        triggers: RepairTriggers,
    },
    /// Explicit per-block host lists
    TotalRecall(TotalRecallConfig),
}

impl PolicyConfig {
    /// Build a policy from its type name and argument tokens. Numbers are
    /// redundancy parameters in order; `repair` and `repair++crash` select
    /// repair triggers; `succplace` selects successor placement.
    pub fn from_args(kind: &str, args: &[String]) -> Result<Self> {
        let mut numbers = Vec::new();
        let mut triggers = RepairTriggers::none();
        let mut placement = Placement::Random;
        for arg in args {
            match arg.as_str() {
                "repair" => triggers = RepairTriggers::all(),
                "repair++crash" => triggers = RepairTriggers::join_and_crash(),
                "succplace" => placement = Placement::Successor,
                token => numbers.push(token.parse::<usize>().map_err(|_| {
                    SimError::config(format!("unexpected argument '{}' for {}", token, kind))
                })?),
            }
        }
        let num = |i: usize, default: usize| numbers.get(i).copied().unwrap_or(default);

        let config = match kind {
            "dhash_replica_norepair" => PolicyConfig::DHash {
                policy: Policy::Replica {
                    replicas: num(0, 3),
                    maintain: false,
                },
                triggers,
            },
            "dhash_replica" => PolicyConfig::DHash {
                policy: Policy::Replica {
                    replicas: num(0, 3),
                    maintain: true,
                },
                triggers,
            },
            "dhash_fragments" => PolicyConfig::DHash {
                policy: Policy::Fragments {
                    dfrags: num(0, 7),
                    efrags: num(1, 14),
                },
                triggers,
            },
            "cates" => PolicyConfig::DHash {
                policy: Policy::Cates,
                triggers,
            },
            // The oracle decides for itself when to move data
            "durability_oracle" => PolicyConfig::DHash {
                policy: Policy::Oracle(OracleKind::Durability),
                triggers: RepairTriggers::none(),
            },
            "availability_oracle" => PolicyConfig::DHash {
                policy: Policy::Oracle(OracleKind::Availability),
                triggers: RepairTriggers::none(),
            },
            "totalrecall_lazy_replica" => PolicyConfig::TotalRecall(TotalRecallConfig {
                placement,
                ..TotalRecallConfig::lazy(num(0, 2), num(1, 4))
            }),
            "sostenuto" => PolicyConfig::TotalRecall(TotalRecallConfig {
                placement,
                ..TotalRecallConfig::sostenuto(num(0, 3))
            }),
            "sostenuto_oracle" => PolicyConfig::TotalRecall(TotalRecallConfig {
                mode: TotalRecallMode::SostenutoOracle,
                placement,
                ..TotalRecallConfig::sostenuto(num(0, 3))
            }),
            _ => {
                return Err(SimError::config(format!(
                    "invalid dhash type '{}', expected one of: {}",
                    kind,
                    POLICY_TYPES.join(", ")
                )))
            }
        };
        config.policy().validate()?;
        Ok(config)
    }

    pub fn policy(&self) -> Policy {
        match self {
            PolicyConfig::DHash { policy, .. } => *policy,
            PolicyConfig::TotalRecall(tr) => Policy::TotalRecall(*tr),
        }
    }

    /// Build the implicit-placement DHT; `None` for explicit placement
    pub fn build_dhash(&self, config: &SimConfig) -> Option<DHash> {
        match self {
            PolicyConfig::DHash { policy, triggers } => {
                Some(DHash::new(*policy, *triggers, config.bandwidth))
            }
            PolicyConfig::TotalRecall(_) => None,
        }
    }

    /// Build the explicit-placement DHT; `None` for implicit placement
    pub fn build_totalrecall(&self, config: &SimConfig) -> Option<TotalRecall> {
        match self {
            PolicyConfig::TotalRecall(tr) => Some(TotalRecall::new(
                *tr,
                config.bandwidth,
                config.seed.unwrap_or_default(),
            )),
            PolicyConfig::DHash { .. } => None,
        }
    }
}
