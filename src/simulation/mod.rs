//! Discrete-event simulation driver
//!
//! This module merges an external event stream with the events the DHT
//! schedules for itself, dispatches them in time order and calls a monitor
//! as simulated time advances.

pub mod churn;
pub mod event;
pub mod trace;

pub use churn::{ChurnConfig, ChurnGenerator};
pub use event::{Event, EventKind, RepairKind, DEFAULT_BLOCK_SIZE};
pub use trace::TraceReader;

use crate::dhash::Dht;
use crate::{Result, SimError};
use log::{debug, info};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::iter::Peekable;

/// An event waiting in a queue; equal times pop in push order
#[derive(Debug)]
struct Queued {
    time: u64,
    seq: u64,
    event: Event,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.time, self.seq).cmp(&(other.time, other.seq))
    }
}

/// Min-heap of events ordered by time, then by insertion order
#[derive(Debug, Default)]
pub(crate) struct EventQueue {
    heap: BinaryHeap<Reverse<Queued>>,
    seq: u64,
}

impl EventQueue {
    pub(crate) fn push(&mut self, event: Event) {
        self.seq += 1;
        self.heap.push(Reverse(Queued {
            time: event.time,
            seq: self.seq,
            event,
        }));
    }

    pub(crate) fn pop(&mut self) -> Option<Event> {
        self.heap.pop().map(|Reverse(q)| q.event)
    }

    pub(crate) fn peek_time(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse(q)| q.time)
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}

/// The event engine, owning the simulated DHT
pub struct Simulator<D: Dht> {
    dht: D,
    /// Simulated time between periodic monitor calls
    monitor_interval: u64,
    pending: EventQueue,
    events_processed: u64,
}

impl<D: Dht> Simulator<D> {
    pub fn new(dht: D, monitor_interval: u64) -> Self {
        Self {
            dht,
            monitor_interval,
            pending: EventQueue::default(),
            events_processed: 0,
        }
    }

    pub fn dht(&self) -> &D {
        &self.dht
    }

    pub fn into_dht(self) -> D {
        self.dht
    }

    /// Events dispatched so far, internal ones included
    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// Internally scheduled events not yet dispatched
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Run until `events` and every scheduled event are exhausted.
    ///
    /// `monitor` is called with the previous time whenever time advances
    /// past the next monitor time or after a membership change, and once
    /// more at the final time + 1. Returns the time of the last event.
    pub fn run<I, F>(&mut self, events: I, mut monitor: F) -> Result<u64>
    where
        I: IntoIterator<Item = Event>,
        F: FnMut(u64, &D) -> Result<()>,
    {
        let mut external = events.into_iter().peekable();
        let mut last_time = 0;
        let mut next_monitor = self.monitor_interval;
        let mut membership_changed = false;

        while let Some(ev) = self.next_event(&mut external) {
            if ev.time < last_time {
                return Err(SimError::TimeWentBackward {
                    last: last_time,
                    now: ev.time,
                });
            }
            if ev.time != last_time {
                if last_time > next_monitor || membership_changed {
                    monitor(last_time, &self.dht)?;
                    next_monitor += self.monitor_interval;
                }
                membership_changed = false;
            }

            let scheduled = self.dht.process(&ev)?;
            if !scheduled.is_empty() {
                debug!("{}: {} scheduled {} events", ev.time, ev.type_name(), scheduled.len());
            }
            for new in scheduled {
                self.pending.push(new);
            }

            membership_changed |= ev.is_membership();
            last_time = ev.time;
            self.events_processed += 1;
        }

        monitor(last_time + 1, &self.dht)?;
        info!(
            "simulation finished at {} after {} events",
            last_time, self.events_processed
        );
        Ok(last_time)
    }

    /// Take a scheduled event if it is strictly earlier than the next
    /// external one, else the external one
    fn next_event<I>(&mut self, external: &mut Peekable<I>) -> Option<Event>
    where
        I: Iterator<Item = Event>,
    {
        let internal_first = match (self.pending.peek_time(), external.peek()) {
            (Some(t), Some(ext)) => t < ext.time,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if internal_first {
            self.pending.pop()
        } else {
            external.next()
        }
    }
}
