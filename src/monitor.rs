//! Run statistics and their printers

use crate::dhash::Dht;
use crate::storage::{SentBytes, SentCategory};
use crate::Result;
use std::io::Write;

/// How far along the successor list blocks are spread
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spread {
    pub min: usize,
    pub avg: f64,
    pub max: usize,
}

/// Snapshot of a simulated DHT
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    /// Alive members
    pub nodes: usize,
    /// Bytes sent by every node ever seen
    pub sent_bytes: u64,
    pub sent_breakdown: SentBytes,
    /// Whole size of every inserted block
    pub usable_bytes: u64,
    /// Bytes on disk, offline nodes included
    pub disk_bytes: u64,
    /// Bytes on alive nodes
    pub avail_bytes: u64,
    /// Blocks with enough pieces to be read
    pub avail_blocks: usize,
    pub total_blocks: usize,
    pub extant_min: usize,
    pub extant_avg: f64,
    pub extant_max: usize,
    pub total_unavailability: u64,
    pub lost_blocks: usize,
    pub spread: Option<Spread>,
}

impl Stats {
    pub fn collect<D: Dht>(dht: &D, with_spread: bool) -> Self {
        let ring = dht.ring();
        let mut sent_breakdown = SentBytes::default();
        for node in ring.nodes() {
            sent_breakdown.merge(node.sent_breakdown());
        }

        let (avail_blocks, extant) = dht.available_blocks();
        let (extant_min, extant_avg, extant_max) = if extant.is_empty() {
            (0, 0.0, 0)
        } else {
            (
                extant.iter().copied().min().unwrap_or(0),
                extant.iter().sum::<usize>() as f64 / extant.len() as f64,
                extant.iter().copied().max().unwrap_or(0),
            )
        };

        Self {
            nodes: ring.len(),
            sent_bytes: ring.nodes().map(|n| n.sent_bytes).sum(),
            sent_breakdown,
            usable_bytes: dht.blocks().values().sum(),
            disk_bytes: ring.nodes().map(|n| n.bytes_stored()).sum(),
            avail_bytes: ring.alive_nodes().map(|n| n.bytes_stored()).sum(),
            avail_blocks,
            total_blocks: dht.blocks().len(),
            extant_min,
            extant_avg,
            extant_max,
            total_unavailability: dht.total_unavailability(),
            lost_blocks: dht.lost_blocks(),
            spread: with_spread.then(|| block_spread(dht)),
        }
    }
}

/// For every block, the number of successors examined before
/// `read_pieces()` pieces are found, searching up to twice the look-ahead
pub fn block_spread<D: Dht>(dht: &D) -> Spread {
    let ring = dht.ring();
    let needed = dht.policy().read_pieces();
    let depth = 2 * dht.policy().look_ahead();

    let mut spread = Spread {
        min: 0,
        avg: 0.0,
        max: 0,
    };
    let mut total = 0;
    for (i, &block) in dht.blocks().keys().enumerate() {
        let mut found = 0;
        let mut examined = 0;
        for s in ring.succ(block, depth) {
            examined += 1;
            if ring.holds(s, block) {
                found += 1;
                if found == needed {
                    break;
                }
            }
        }
        total += examined;
        if i == 0 || examined < spread.min {
            spread.min = examined;
        }
        spread.max = spread.max.max(examined);
    }
    if !dht.blocks().is_empty() {
        spread.avg = total as f64 / dht.blocks().len() as f64;
    }
    spread
}

/// Render a byte count with a binary K/M/G/T suffix
pub fn size_rounder(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["", "K", "M", "G", "T"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2}{}", size, UNITS[unit])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStyle {
    /// Labelled lines with rounded sizes
    Human,
    /// One whitespace-separated record per call
    Parsable,
}

/// Writes monitor output for a run
pub struct Reporter<W: Write> {
    out: W,
    style: MonitorStyle,
    spread: bool,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W, style: MonitorStyle, spread: bool) -> Self {
        Self { out, style, spread }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Write a `#` comment line
    pub fn comment(&mut self, text: &str) -> Result<()> {
        writeln!(self.out, "# {}", text)?;
        Ok(())
    }

    /// Monitor callback for the simulator
    pub fn report<D: Dht>(&mut self, t: u64, dht: &D) -> Result<()> {
        let stats = Stats::collect(dht, self.spread);
        match self.style {
            MonitorStyle::Human => self.print_monitor(t, &stats),
            MonitorStyle::Parsable => self.parsable_monitor(t, &stats),
        }
    }

    fn print_monitor(&mut self, t: u64, s: &Stats) -> Result<()> {
        writeln!(
            self.out,
            "{:4} {:4} nodes; {}B sent; {}B put; {}B avail; {}B stored; \
             {}/{:5.2}/{} extant; {}/{} blocks avail",
            t,
            s.nodes,
            size_rounder(s.sent_bytes),
            size_rounder(s.usable_bytes),
            size_rounder(s.avail_bytes),
            size_rounder(s.disk_bytes),
            s.extant_min,
            s.extant_avg,
            s.extant_max,
            s.avail_blocks,
            s.total_blocks,
        )?;
        if let Some(spread) = s.spread {
            writeln!(
                self.out,
                "{}/{} avg {:5.2} block spread",
                spread.min, spread.max, spread.avg
            )?;
        }
        for cat in SentCategory::ALL {
            writeln!(
                self.out,
                "{}B sent[{}];",
                size_rounder(s.sent_breakdown.get(cat)),
                cat
            )?;
        }
        Ok(())
    }

    fn parsable_monitor(&mut self, t: u64, s: &Stats) -> Result<()> {
        write!(
            self.out,
            "{} {} {} {} {} {} {} {:5.2} {} {} {}",
            t,
            s.nodes,
            s.sent_bytes,
            s.usable_bytes,
            s.avail_bytes,
            s.disk_bytes,
            s.extant_min,
            s.extant_avg,
            s.extant_max,
            s.avail_blocks,
            s.total_blocks,
        )?;
        for cat in SentCategory::ALL {
            write!(self.out, " {}", s.sent_breakdown.get(cat))?;
        }
        writeln!(self.out, " {}", s.total_unavailability)?;
        Ok(())
    }

    /// Per-node lifetime, disk usage and sent bytes
    pub fn dump_node_table<D: Dht>(&mut self, dht: &D) -> Result<()> {
        let categories: Vec<&str> = SentCategory::ALL.iter().map(|c| c.as_str()).collect();
        writeln!(
            self.out,
            "###### Per-node sent-bytes (node lifetime stored_bytes sent_bytes {})",
            categories.join(" ")
        )?;
        for node in dht.ring().nodes() {
            write!(
                self.out,
                "#B {} {} {} {}",
                node,
                node.lifetime,
                node.bytes_stored(),
                node.sent_bytes
            )?;
            for cat in SentCategory::ALL {
                write!(self.out, " {}", node.sent_breakdown().get(cat))?;
            }
            writeln!(self.out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dhash::{DHash, Policy, RepairTriggers};
    use crate::simulation::Event;

    fn loaded() -> DHash {
        let mut dht = DHash::new(
            Policy::Replica {
                replicas: 3,
                maintain: true,
            },
            RepairTriggers::none(),
            1000,
        );
        for id in [4, 17, 23, 30, 42, 55, 63] {
            dht.process(&Event::join(0, id)).unwrap();
        }
        dht.process(&Event::insert(1, 4, 73, 8192)).unwrap();
        dht.process(&Event::insert(1, 4, 25, 1024)).unwrap();
        dht.process(&Event::fail(2, 30)).unwrap();
        dht
    }

    #[test]
    fn test_size_rounder() {
        assert_eq!(size_rounder(0), "0.00");
        assert_eq!(size_rounder(512), "512.00");
        assert_eq!(size_rounder(8192), "8.00K");
        assert_eq!(size_rounder(3 * 1024 * 1024 / 2), "1.50M");
    }

    #[test]
    fn test_collect() {
        let dht = loaded();
        let stats = Stats::collect(&dht, true);

        assert_eq!(stats.nodes, 6);
        assert_eq!(stats.usable_bytes, 8192 + 1024);
        assert_eq!(stats.sent_bytes, 3 * 8192 + 3 * 1024);
        assert_eq!(stats.sent_breakdown.get(SentCategory::Insert), stats.sent_bytes);
        assert_eq!(stats.disk_bytes, 3 * 8192 + 3 * 1024);
        // 30 holds a replica of 25 but is offline
        assert_eq!(stats.avail_bytes, 3 * 8192 + 2 * 1024);
        assert_eq!((stats.avail_blocks, stats.total_blocks), (2, 2));
        assert_eq!((stats.extant_min, stats.extant_max), (2, 3));
        assert_eq!(stats.extant_avg, 2.5);

        // Both blocks have a replica on their first successor
        let spread = stats.spread.unwrap();
        assert_eq!((spread.min, spread.max), (1, 1));
    }

    #[test]
    fn test_parsable_monitor() {
        let dht = loaded();
        let mut reporter = Reporter::new(Vec::new(), MonitorStyle::Parsable, false);
        reporter.report(7, &dht).unwrap();
        let out = String::from_utf8(reporter.into_inner()).unwrap();

        let fields: Vec<&str> = out.split_whitespace().collect();
        assert_eq!(fields.len(), 18);
        assert_eq!(&fields[..3], &["7", "6", "27648"]);
        assert_eq!(fields[7], "2.50");
        assert_eq!(fields[17], "0");
    }

    #[test]
    fn test_human_monitor_and_node_table() {
        let dht = loaded();
        let mut reporter = Reporter::new(Vec::new(), MonitorStyle::Human, true);
        reporter.report(7, &dht).unwrap();
        reporter.dump_node_table(&dht).unwrap();
        let out = String::from_utf8(reporter.into_inner()).unwrap();

        assert!(out.starts_with("   7    6 nodes; 27.00KB sent;"));
        assert!(out.contains("2/2 blocks avail"));
        assert!(out.contains("1/1 avg  1.00 block spread"));
        assert!(out.contains("27.00KB sent[insert];"));
        assert_eq!(out.lines().filter(|l| l.starts_with("#B ")).count(), 7);
    }
}
