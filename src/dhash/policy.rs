//! Storage policies
//!
//! Every policy answers the same five questions: how many pieces to write,
//! how many must survive before repair kicks in, how many are needed to
//! read, how big a piece is and how far along the successor list to look for
//! pieces.

use crate::{Result, SimError};

/// Encoding overhead of an erasure-coded fragment, in percent of the
/// block share
const FRAGMENT_OVERHEAD_PCT: u64 = 102;

/// Fixed fragment counts of the Cates configuration
pub const CATES_READ: usize = 7;
pub const CATES_WRITE: usize = 14;

/// Which loss the oracle protects against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleKind {
    /// Relocate the last copy before a crash destroys it
    Durability,
    /// Relocate the last copy before any departure, even a transient one
    Availability,
}

/// How Total Recall chooses new hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Uniformly among alive members
    Random,
    /// Among the first successors of the block key
    Successor,
}

/// Flavours of explicit-placement lazy repair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalRecallMode {
    /// Total Recall: top up to the long-term factor once redundancy drops
    /// below the short-term factor, forgetting dead hosts
    Lazy,
    /// Keep R replicas, remembering dead hosts so returning ones count again
    Sostenuto,
    /// Sostenuto that ignores transient failures
    SostenutoOracle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotalRecallConfig {
    pub mode: TotalRecallMode,
    /// Redundancy below which repair is triggered
    pub short_term: usize,
    /// Redundancy written at insert and restored by repair
    pub long_term: usize,
    pub placement: Placement,
}

impl TotalRecallConfig {
    pub fn lazy(short_term: usize, long_term: usize) -> Self {
        Self {
            mode: TotalRecallMode::Lazy,
            short_term,
            long_term,
            placement: Placement::Random,
        }
    }

    pub fn sostenuto(replicas: usize) -> Self {
        Self {
            mode: TotalRecallMode::Sostenuto,
            short_term: replicas,
            long_term: replicas,
            placement: Placement::Random,
        }
    }
}

impl Default for TotalRecallConfig {
    fn default() -> Self {
        Self::lazy(2, 4)
    }
}

/// Redundancy and repair policy of a simulated DHT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// `replicas` whole copies on the successors; `maintain` enables the
    /// repair threshold
    Replica { replicas: usize, maintain: bool },
    /// `efrags` fragments of which any `dfrags` rebuild the block
    Fragments { dfrags: usize, efrags: usize },
    /// 7-of-14 fragments with partition maintenance on joins
    Cates,
    /// Single copy moved by an omniscient repairer
    Oracle(OracleKind),
    /// Explicit host lists with lazy repair
    TotalRecall(TotalRecallConfig),
}

impl Policy {
    /// Pieces that must be present before repair is skipped
    pub fn min_pieces(&self) -> usize {
        match self {
            Policy::Replica { replicas, maintain } => {
                if *maintain {
                    *replicas
                } else {
                    0
                }
            }
            Policy::Fragments { efrags, .. } => *efrags,
            Policy::Cates => CATES_WRITE,
            Policy::Oracle(_) => 1,
            Policy::TotalRecall(tr) => tr.short_term,
        }
    }

    /// Pieces on distinct nodes needed for a successful read
    pub fn read_pieces(&self) -> usize {
        match self {
            Policy::Fragments { dfrags, .. } => *dfrags,
            Policy::Cates => CATES_READ,
            Policy::Replica { .. } | Policy::Oracle(_) | Policy::TotalRecall(_) => 1,
        }
    }

    /// Pieces written when a block is inserted
    pub fn insert_pieces(&self) -> usize {
        match self {
            Policy::Replica { replicas, .. } => *replicas,
            Policy::Fragments { efrags, .. } => *efrags,
            Policy::Cates => CATES_WRITE,
            Policy::Oracle(_) => 1,
            Policy::TotalRecall(tr) => tr.long_term,
        }
    }

    /// Size of one stored piece of a block of `whole_size` bytes
    pub fn insert_piece_size(&self, whole_size: u64) -> u64 {
        match self {
            Policy::Fragments { dfrags, .. } => fragment_size(whole_size, *dfrags),
            Policy::Cates => fragment_size(whole_size, CATES_READ),
            Policy::Replica { .. } | Policy::Oracle(_) | Policy::TotalRecall(_) => whole_size,
        }
    }

    /// Successors scanned to count a block's pieces
    pub fn look_ahead(&self) -> usize {
        match self {
            Policy::Replica { replicas, .. } => 3 * replicas,
            Policy::Fragments { efrags, .. } => 3 * efrags,
            Policy::Cates => 3 * CATES_WRITE,
            Policy::Oracle(_) => 16,
            Policy::TotalRecall(tr) => 2 * tr.long_term,
        }
    }

    /// Check parameter sanity
    pub fn validate(&self) -> Result<()> {
        match self {
            Policy::Replica { replicas, .. } if *replicas == 0 => {
                Err(SimError::config("replica count must be greater than 0"))
            }
            Policy::Fragments { dfrags, efrags } if *dfrags == 0 || efrags < dfrags => Err(
                SimError::config("fragments need 0 < dfrags <= efrags"),
            ),
            Policy::TotalRecall(tr) if tr.short_term == 0 || tr.long_term < tr.short_term => Err(
                SimError::config("redundancy factors need 0 < short_term <= long_term"),
            ),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Policy::Replica { replicas, .. } => write!(f, "replica({})", replicas),
            Policy::Fragments { dfrags, efrags } => write!(f, "fragments({}/{})", dfrags, efrags),
            Policy::Cates => write!(f, "cates({}/{})", CATES_READ, CATES_WRITE),
            Policy::Oracle(OracleKind::Durability) => write!(f, "durability-oracle"),
            Policy::Oracle(OracleKind::Availability) => write!(f, "availability-oracle"),
            Policy::TotalRecall(tr) => {
                write!(f, "{:?}({}/{})", tr.mode, tr.short_term, tr.long_term)
            }
        }
    }
}

/// Encoded fragment size: the block share plus encoding overhead, rounded up
pub fn fragment_size(whole_size: u64, dfrags: usize) -> u64 {
    let denom = 100 * dfrags as u64;
    (FRAGMENT_OVERHEAD_PCT * whole_size).div_ceil(denom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replica_capabilities() {
        let p = Policy::Replica {
            replicas: 3,
            maintain: true,
        };
        assert_eq!(p.insert_pieces(), 3);
        assert_eq!(p.min_pieces(), 3);
        assert_eq!(p.read_pieces(), 1);
        assert_eq!(p.insert_piece_size(8192), 8192);
        assert_eq!(p.look_ahead(), 9);

        let lazy = Policy::Replica {
            replicas: 3,
            maintain: false,
        };
        assert_eq!(lazy.min_pieces(), 0);
    }

    #[test]
    fn test_fragment_capabilities() {
        let p = Policy::Fragments { dfrags: 3, efrags: 6 };
        assert_eq!(p.insert_pieces(), 6);
        assert_eq!(p.read_pieces(), 3);
        assert_eq!(p.min_pieces(), 6);
        assert_eq!(p.look_ahead(), 18);
        // 1.02 * 8192 / 3 = 2785.28
        assert_eq!(p.insert_piece_size(8192), 2786);
        assert_eq!(p.insert_piece_size(300), 102);
    }

    #[test]
    fn test_cates_capabilities() {
        let p = Policy::Cates;
        assert_eq!(p.insert_pieces(), 14);
        assert_eq!(p.read_pieces(), 7);
        assert_eq!(p.min_pieces(), 14);
        assert_eq!(p.insert_piece_size(7000), 1020);
    }

    #[test]
    fn test_validate() {
        assert!(Policy::Fragments { dfrags: 4, efrags: 2 }.validate().is_err());
        assert!(Policy::Replica {
            replicas: 0,
            maintain: true
        }
        .validate()
        .is_err());
        assert!(Policy::TotalRecall(TotalRecallConfig::lazy(4, 2))
            .validate()
            .is_err());
        assert!(Policy::Oracle(OracleKind::Durability).validate().is_ok());
        assert!(Policy::TotalRecall(TotalRecallConfig::default())
            .validate()
            .is_ok());
    }
}
