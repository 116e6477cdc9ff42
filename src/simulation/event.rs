//! Simulation events
//!
//! External traces carry membership changes and inserts; repairs add
//! `Copy` events of their own.

use crate::storage::{parse_chord_id, ChordId, SentCategory};

/// Size of an inserted block when the trace does not give one
pub const DEFAULT_BLOCK_SIZE: u64 = 8192;

/// What triggered a repair transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairKind {
    Join,
    Failure,
}

impl RepairKind {
    /// Category charged to the node that ships the repaired piece
    pub fn write_category(self) -> SentCategory {
        match self {
            RepairKind::Join => SentCategory::JoinRepairWrite,
            RepairKind::Failure => SentCategory::FailureRepairWrite,
        }
    }

    /// Category charged to holders read from to rebuild a block
    pub fn read_category(self) -> SentCategory {
        match self {
            RepairKind::Join => SentCategory::JoinRepairRead,
            RepairKind::Failure => SentCategory::FailureRepairRead,
        }
    }
}

impl std::fmt::Display for RepairKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepairKind::Join => write!(f, "join"),
            RepairKind::Failure => write!(f, "failure"),
        }
    }
}

/// Payload of an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Join(ChordId),
    Fail(ChordId),
    Crash(ChordId),
    Insert {
        node: ChordId,
        block: ChordId,
        size: u64,
    },
    /// A repair transfer; `src_time` is the source's `last_alive` when the
    /// transfer was scheduled
    Copy {
        desc: RepairKind,
        src: ChordId,
        src_time: u64,
        dst: ChordId,
        block: ChordId,
        size: u64,
    },
}

/// A timestamped event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub time: u64,
    pub kind: EventKind,
}

impl Event {
    pub fn join(time: u64, id: ChordId) -> Self {
        Self {
            time,
            kind: EventKind::Join(id),
        }
    }

    pub fn fail(time: u64, id: ChordId) -> Self {
        Self {
            time,
            kind: EventKind::Fail(id),
        }
    }

    pub fn crash(time: u64, id: ChordId) -> Self {
        Self {
            time,
            kind: EventKind::Crash(id),
        }
    }

    pub fn insert(time: u64, node: ChordId, block: ChordId, size: u64) -> Self {
        Self {
            time,
            kind: EventKind::Insert { node, block, size },
        }
    }

    /// True for join, fail and crash
    pub fn is_membership(&self) -> bool {
        matches!(
            self.kind,
            EventKind::Join(_) | EventKind::Fail(_) | EventKind::Crash(_)
        )
    }

    /// Lowercase event type name
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            EventKind::Join(_) => "join",
            EventKind::Fail(_) => "fail",
            EventKind::Crash(_) => "crash",
            EventKind::Insert { .. } => "insert",
            EventKind::Copy { .. } => "copy",
        }
    }

    /// Parse one trace record: `<time> <type> <args...>`. Returns `Ok(None)`
    /// for comments and blank lines.
    pub fn parse(line: &str) -> std::result::Result<Option<Event>, String> {
        if line.starts_with('#') {
            return Ok(None);
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            return Ok(None);
        }
        if fields.len() < 2 {
            return Err("missing event type".into());
        }

        let time: u64 = fields[0]
            .parse()
            .map_err(|_| format!("bad time '{}'", fields[0]))?;
        let etype = fields[1].to_lowercase();
        let args = &fields[2..];

        let node_arg = |i: usize| -> std::result::Result<ChordId, String> {
            let s = args.get(i).ok_or("missing node id")?;
            parse_chord_id(s).ok_or_else(|| format!("bad ID specification '{}'", s))
        };

        let kind = match etype.as_str() {
            "join" => EventKind::Join(node_arg(0)?),
            "fail" => EventKind::Fail(node_arg(0)?),
            "crash" => EventKind::Crash(node_arg(0)?),
            "insert" => {
                let node = node_arg(0)?;
                let s = args.get(1).ok_or("missing block id")?;
                let block = parse_chord_id(s).ok_or_else(|| format!("bad block id '{}'", s))?;
                let size = match args.get(2) {
                    Some(s) => s.parse().map_err(|_| format!("bad size '{}'", s))?,
                    None => DEFAULT_BLOCK_SIZE,
                };
                EventKind::Insert { node, block, size }
            }
            other => return Err(format!("unknown event type '{}'", other)),
        };

        Ok(Some(Event { time, kind }))
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            EventKind::Join(id) | EventKind::Fail(id) | EventKind::Crash(id) => {
                write!(f, "{}\t{}\t{}", self.time, self.type_name(), id)
            }
            EventKind::Insert { node, block, size } => {
                write!(f, "{}\tinsert\t{}\t{}\t{}", self.time, node, block, size)
            }
            EventKind::Copy {
                desc,
                src,
                dst,
                block,
                size,
                ..
            } => write!(
                f,
                "{}\tcopy\t{}\t{:x}->{:x}\t{:x}\t{}",
                self.time, desc, src, dst, block, size
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_membership_events() {
        assert_eq!(Event::parse("10 join 42").unwrap(), Some(Event::join(10, 42)));
        assert_eq!(Event::parse("11 FAIL ff").unwrap(), Some(Event::fail(11, 255)));
        assert_eq!(Event::parse("12\tcrash\t7\n").unwrap(), Some(Event::crash(12, 7)));
    }

    #[test]
    fn test_parse_insert_default_size() {
        assert_eq!(
            Event::parse("5 insert 4 73").unwrap(),
            Some(Event::insert(5, 4, 73, DEFAULT_BLOCK_SIZE))
        );
        assert_eq!(
            Event::parse("5 insert 4 73 100").unwrap(),
            Some(Event::insert(5, 4, 73, 100))
        );
    }

    #[test]
    fn test_parse_skips_comments() {
        assert_eq!(Event::parse("# a comment").unwrap(), None);
        assert_eq!(Event::parse("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(Event::parse("x join 4").is_err());
        assert!(Event::parse("4").is_err());
        assert!(Event::parse("4 explode 1").is_err());
        assert!(Event::parse("4 join").is_err());
        assert!(Event::parse("4 join zz").is_err());
        assert!(Event::parse("4 insert 1").is_err());
        assert!(Event::parse("4 insert 1 2 big").is_err());
        // Copies are generated internally, never read from traces
        assert!(Event::parse("4 copy failure 1 0 2 3 10").is_err());
    }
}
