//! Diagnostic command log
//!
//! Every queue keeps a fixed-capacity ring of its most recent commands and
//! their completions. When a run fails, `dump()` reconstructs the command
//! sequence that led up to the failure.
//!
//! # Layout
//!
//! Entries are written at `tail % capacity` and the tail counter only ever
//! grows. The live window is the last `capacity - 1` commands, so the slot the
//! next submission will overwrite is always stale. That one reserved slot makes
//! "full and wrapped" distinguishable from "one free slot" and keeps `dump()`
//! unambiguous.
//!
//! With `capacity > MAX_QUEUE_DEPTH + 1` every command the hardware can still
//! hold fits inside the live window of a queue at full depth. A worker keeps a
//! long-stuck command in the window by re-recording its entry at the tail
//! (`next_evicted` / `rerecord`) before it would be overwritten.
//!
//! # Example
//!
//! ```
//! use ioworker::cmdlog::{CommandLog, CommandLogEntry};
//! use ioworker::driver::Direction;
//!
//! let mut log = CommandLog::with_capacity(4);
//! let id = log.record_submit(CommandLogEntry::submitted(8, 1, Direction::Read, 10));
//! assert!(log.record_complete(id, 25, 0));
//! assert_eq!(log.dump(10)[0].completed_us, Some(25));
//! ```

use crate::driver::{Direction, QueueId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Deepest queue the engine will drive
pub const MAX_QUEUE_DEPTH: usize = 2048;

/// Per-queue log capacity, one slot more than needed for a full queue plus the
/// reserved tail slot
pub const CMD_LOG_DEPTH: usize = MAX_QUEUE_DEPTH + 2;

/// Identity of a logged command: its position in the queue's submission order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId(pub u64);

/// One submitted command and, once it completes, its completion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLogEntry {
    pub lba: u64,
    pub blocks: u32,
    pub direction: Direction,
    /// Microseconds since the owning worker started
    pub submitted_us: u64,
    /// `None` while the command is in flight
    pub completed_us: Option<u64>,
    /// Completion status code, 0 for success
    pub status: Option<u16>,
}

impl CommandLogEntry {
    pub fn submitted(lba: u64, blocks: u32, direction: Direction, submitted_us: u64) -> Self {
        Self {
            lba,
            blocks,
            direction,
            submitted_us,
            completed_us: None,
            status: None,
        }
    }

    pub fn is_outstanding(&self) -> bool {
        self.completed_us.is_none()
    }

    /// True if `lba` falls inside this command's range
    pub fn covers(&self, lba: u64) -> bool {
        lba >= self.lba && lba < self.lba + self.blocks as u64
    }
}

/// Fixed-capacity ring of recent commands for a single queue
///
/// Storage is allocated once at construction; recording never reallocates.
#[derive(Debug, Clone)]
pub struct CommandLog {
    entries: Box<[CommandLogEntry]>,
    tail: u64,
}

impl CommandLog {
    pub fn new() -> Self {
        Self::with_capacity(CMD_LOG_DEPTH)
    }

    /// # Panics
    /// Panics if `capacity < 2`; one slot is always reserved.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity >= 2, "command log needs at least 2 slots, got {}", capacity);
        Self {
            entries: vec![CommandLogEntry::default(); capacity].into_boxed_slice(),
            tail: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of live (dumpable) entries
    #[inline]
    pub fn len(&self) -> usize {
        (self.tail as usize).min(self.entries.len() - 1)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tail == 0
    }

    /// Total commands ever recorded
    #[inline]
    pub fn total_recorded(&self) -> u64 {
        self.tail
    }

    #[inline(always)]
    fn slot(&self, id: u64) -> usize {
        (id % self.entries.len() as u64) as usize
    }

    /// True while `id`'s entry has not been overwritten
    #[inline]
    pub fn is_live(&self, id: CommandId) -> bool {
        id.0 < self.tail && self.tail - id.0 < self.entries.len() as u64
    }

    #[inline]
    pub fn record_submit(&mut self, entry: CommandLogEntry) -> CommandId {
        let id = self.tail;
        let slot = self.slot(id);
        self.entries[slot] = entry;
        self.tail += 1;
        CommandId(id)
    }

    /// Entry the next `record_submit` pushes out of the live window
    #[inline]
    pub fn next_evicted(&self) -> Option<CommandId> {
        let live = self.entries.len() as u64 - 1;
        (self.tail >= live).then(|| CommandId(self.tail - live))
    }

    /// Copy a live entry to the tail and return its new id
    ///
    /// The old id stops being valid once the copy's write has pushed it out.
    pub fn rerecord(&mut self, id: CommandId) -> Option<CommandId> {
        let entry = self.get(id)?.clone();
        Some(self.record_submit(entry))
    }

    /// Stamp the completion onto a live entry
    ///
    /// Returns false if the entry has already been overwritten.
    #[inline]
    pub fn record_complete(&mut self, id: CommandId, completed_us: u64, status: u16) -> bool {
        if !self.is_live(id) {
            return false;
        }
        let slot = self.slot(id.0);
        let entry = &mut self.entries[slot];
        entry.completed_us = Some(completed_us);
        entry.status = Some(status);
        true
    }

    pub fn get(&self, id: CommandId) -> Option<&CommandLogEntry> {
        if self.is_live(id) {
            Some(&self.entries[self.slot(id.0)])
        } else {
            None
        }
    }

    /// Most recent `n` entries, oldest first
    pub fn dump(&self, n: usize) -> Vec<CommandLogEntry> {
        let count = n.min(self.len()) as u64;
        (self.tail - count..self.tail)
            .map(|id| self.entries[self.slot(id)].clone())
            .collect()
    }

    /// Live entries whose command has not completed, oldest first
    pub fn outstanding(&self) -> Vec<CommandLogEntry> {
        self.dump(self.len())
            .into_iter()
            .filter(CommandLogEntry::is_outstanding)
            .collect()
    }
}

impl Default for CommandLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Command logs for a set of queues
///
/// Each worker owns its queue's `CommandLog` while running; the multi-queue
/// runner gathers them here afterwards so any queue can be dumped on demand.
#[derive(Debug, Clone)]
pub struct RingLog {
    logs: HashMap<QueueId, CommandLog>,
    capacity: usize,
}

impl RingLog {
    pub fn new() -> Self {
        Self::with_capacity(CMD_LOG_DEPTH)
    }

    /// Capacity used for queues first seen through `record_submit`
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            logs: HashMap::new(),
            capacity,
        }
    }

    pub fn record_submit(&mut self, queue: QueueId, entry: CommandLogEntry) -> CommandId {
        let capacity = self.capacity;
        self.logs
            .entry(queue)
            .or_insert_with(|| CommandLog::with_capacity(capacity))
            .record_submit(entry)
    }

    pub fn record_complete(&mut self, queue: QueueId, id: CommandId, completed_us: u64, status: u16) -> bool {
        self.logs
            .get_mut(&queue)
            .map(|log| log.record_complete(id, completed_us, status))
            .unwrap_or(false)
    }

    /// Empty for a queue that never logged anything
    pub fn dump(&self, queue: QueueId, n: usize) -> Vec<CommandLogEntry> {
        self.logs.get(&queue).map(|log| log.dump(n)).unwrap_or_default()
    }

    /// Adopt a worker's log, replacing any previous log for the queue
    pub fn insert(&mut self, queue: QueueId, log: CommandLog) {
        self.logs.insert(queue, log);
    }

    pub fn get(&self, queue: QueueId) -> Option<&CommandLog> {
        self.logs.get(&queue)
    }

    pub fn queues(&self) -> impl Iterator<Item = QueueId> + '_ {
        self.logs.keys().copied()
    }
}

impl Default for RingLog {
    fn default() -> Self {
        Self::new()
    }
}
