//! Event trace reader
//!
//! Reads one event per line. Malformed lines are reported with their line
//! number and skipped; the stream keeps going.

use crate::simulation::Event;
use crate::SimError;
use log::warn;
use std::io::BufRead;

/// Iterator over the events of a trace
pub struct TraceReader<R> {
    reader: R,
    lineno: usize,
    skipped: usize,
}

impl<R: BufRead> TraceReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            lineno: 0,
            skipped: 0,
        }
    }

    /// Number of malformed lines skipped so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<R: BufRead> Iterator for TraceReader<R> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match self.reader.read_until(b'\n', &mut buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    warn!("trace read failed after line {}: {}", self.lineno, e);
                    return None;
                }
            }
            self.lineno += 1;

            let parsed = match std::str::from_utf8(&buf) {
                Ok(line) => Event::parse(line),
                Err(e) => Err(format!("not UTF-8: {}", e)),
            };
            match parsed {
                Ok(Some(ev)) => return Some(ev),
                Ok(None) => continue,
                Err(msg) => {
                    self.skipped += 1;
                    warn!(
                        "{}",
                        SimError::BadEvent {
                            line: self.lineno,
                            msg
                        }
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_reads_events_and_skips_bad_lines() {
        let trace = "# header\n0 join 4\n1 join 17\nbogus line\n2 insert 4 73\n\n3 fail 4\n";
        let mut reader = TraceReader::new(Cursor::new(trace));
        let events: Vec<Event> = reader.by_ref().collect();

        assert_eq!(
            events,
            vec![
                Event::join(0, 4),
                Event::join(1, 17),
                Event::insert(2, 4, 73, 8192),
                Event::fail(3, 4),
            ]
        );
        assert_eq!(reader.skipped(), 1);
    }

    #[test]
    fn test_invalid_utf8_line_is_skipped() {
        let mut trace = b"0 join 4\n1 join ".to_vec();
        trace.extend_from_slice(&[0xff, 0xfe]);
        trace.extend_from_slice(b"\n2 join 17\n3 insert 4 73\n");
        let mut reader = TraceReader::new(Cursor::new(trace));
        let events: Vec<Event> = reader.by_ref().collect();

        assert_eq!(
            events,
            vec![
                Event::join(0, 4),
                Event::join(2, 17),
                Event::insert(3, 4, 73, 8192),
            ]
        );
        assert_eq!(reader.skipped(), 1);
    }
}
