//! Operations deferred to a future block height or block time.
//!
//! Not safe for concurrent access; only the driver thread touches it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// When a deferred operation becomes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Schedule {
    /// Run at the start of exactly this height
    AtHeight(u64),

    /// Run at the start of the first block whose time is not before this
    AtTime(SystemTime),
}

#[derive(Debug)]
struct TimedEntry<T> {
    time: SystemTime,
    item: T,
}

/// Height buckets plus a time-sorted list.
#[derive(Debug)]
pub struct OperationQueue<T> {
    /// Operations per target height, in insertion order
    by_height: BTreeMap<u64, Vec<T>>,

    /// Operations sorted ascending by target time
    by_time: Vec<TimedEntry<T>>,
}

impl<T> Default for OperationQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OperationQueue<T> {
    pub fn new() -> Self {
        Self {
            by_height: BTreeMap::new(),
            by_time: Vec::new(),
        }
    }

    /// Adds an operation.
    ///
    /// Time-scheduled entries are inserted after every entry with the same
    /// or an earlier time, so equal times drain in insertion order.
    pub fn enqueue(&mut self, schedule: Schedule, item: T) {
        match schedule {
            Schedule::AtHeight(height) => {
                self.by_height.entry(height).or_default().push(item);
            }
            Schedule::AtTime(time) => {
                let pos = self.by_time.partition_point(|e| e.time <= time);
                self.by_time.insert(pos, TimedEntry { time, item });
            }
        }
    }

    /// Removes and returns everything scheduled for exactly `height`.
    pub fn drain_height(&mut self, height: u64) -> Vec<T> {
        self.by_height.remove(&height).unwrap_or_default()
    }

    /// Removes and returns every time-scheduled entry not after `now`,
    /// earliest first, each with its target time.
    pub fn drain_due(&mut self, now: SystemTime) -> Vec<(SystemTime, T)> {
        let split = self.by_time.partition_point(|e| e.time <= now);
        self.by_time.drain(..split).map(|e| (e.time, e.item)).collect()
    }

    /// Puts drained operations back ahead of everything still queued under
    /// the same schedule, keeping their relative order.
    pub fn requeue_front(&mut self, items: Vec<(Schedule, T)>) {
        for (schedule, item) in items.into_iter().rev() {
            match schedule {
                Schedule::AtHeight(height) => {
                    self.by_height.entry(height).or_default().insert(0, item);
                }
                Schedule::AtTime(time) => {
                    let pos = self.by_time.partition_point(|e| e.time < time);
                    self.by_time.insert(pos, TimedEntry { time, item });
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_height.values().map(Vec::len).sum::<usize>() + self.by_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_height.is_empty() && self.by_time.is_empty()
    }
}
