//! Host-controller driver boundary
//!
//! The worker engine does not talk to hardware directly. Controller bring-up,
//! register and PCIe config-space access, DMA allocation and the queue-pair
//! submission primitives belong to a driver layer, which the engine consumes
//! through the two traits defined here:
//!
//! - [`Controller`]: setup/teardown primitives (queue lifecycle, registers,
//!   PCIe config space, callback registration, buffer allocation)
//! - [`QueuePair`]: the hot path (submit, poll for completions)
//!
//! # Completion model
//!
//! Driver layers usually deliver completions through callbacks fired from
//! inside their poll routine. Here `poll()` returns the completions that became
//! ready instead, so the worker that owns the queue is the only writer of its
//! per-queue state. Each command carries a caller-chosen `tag` which comes back
//! unchanged in its `Completion`, along with the buffer that was moved into the
//! command at submission.
//!
//! # Thread Safety
//!
//! A `QueuePair` is `Send` but not `Sync`: each worker thread owns exactly one.
//! A `Controller` is shared by all workers and must be `Sync`.

pub mod namespace;
pub mod sim;

pub use namespace::Namespace;

use crate::util::buffer::DmaBuffer;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Queue identifier as assigned by the controller
pub type QueueId = u16;

/// Transfer direction of an IO command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => write!(f, "read"),
            Direction::Write => write!(f, "write"),
        }
    }
}

/// Per-command IO flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct IoFlags(u32);

impl IoFlags {
    pub const NONE: IoFlags = IoFlags(0);
    /// Force unit access: bypass the device's volatile cache
    pub const FUA: IoFlags = IoFlags(1 << 30);

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn contains(self, other: IoFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for IoFlags {
    type Output = IoFlags;

    fn bitor(self, rhs: IoFlags) -> IoFlags {
        IoFlags(self.0 | rhs.0)
    }
}

/// Outcome reported for one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    /// Status code type and status code from the completion entry
    Error { sct: u8, sc: u8 },
    /// The driver's per-command timeout fired before the device answered
    TimedOut,
}

impl CommandStatus {
    #[inline]
    pub fn is_error(&self) -> bool {
        !matches!(self, CommandStatus::Success)
    }

    /// Packed `(sct << 8) | sc`, 0 for success
    pub fn code(&self) -> u16 {
        match self {
            CommandStatus::Success => 0,
            CommandStatus::Error { sct, sc } => ((*sct as u16) << 8) | *sc as u16,
            CommandStatus::TimedOut => crate::error::STATUS_TIMEOUT,
        }
    }
}

/// A read or write ready for submission
#[derive(Debug)]
pub struct Command {
    /// Returned unchanged in the completion
    pub tag: u64,
    pub direction: Direction,
    pub lba: u64,
    pub blocks: u32,
    pub flags: IoFlags,
    /// Holds at least `blocks * sector_size` bytes
    pub buffer: DmaBuffer,
}

/// Completion of a previously submitted command
#[derive(Debug)]
pub struct Completion {
    pub tag: u64,
    pub status: CommandStatus,
    /// The buffer moved in at submission; for reads it holds the data
    pub buffer: DmaBuffer,
}

/// One submission/completion queue pair
pub trait QueuePair: Send {
    fn id(&self) -> QueueId;

    /// Maximum number of commands the queue accepts at once
    fn depth(&self) -> usize;

    /// Queue a command to the device
    ///
    /// # Errors
    ///
    /// Fails when the queue is full or the controller rejects the command.
    fn submit(&mut self, command: Command) -> Result<()>;

    /// Collect up to `max_completions` finished commands
    ///
    /// Waits at most `wait` for the first completion to become ready; returns
    /// an empty vector if none did.
    fn poll(&mut self, max_completions: usize, wait: Duration) -> Result<Vec<Completion>>;
}

/// Called with the queue and tag of a command that exceeded the driver timeout
pub type TimeoutCallback = Box<dyn Fn(QueueId, u64) + Send + Sync>;

/// Called with the completion dword of an asynchronous event
pub type AerCallback = Box<dyn Fn(u32) + Send + Sync>;

/// Logical geometry of a namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceGeometry {
    pub sector_size: usize,
    pub num_sectors: u64,
}

/// Controller-level primitives, used at setup and teardown only
pub trait Controller: Send + Sync {
    fn create_queue(&self, priority: u8, depth: usize) -> Result<Box<dyn QueuePair>>;

    fn destroy_queue(&self, queue: Box<dyn QueuePair>) -> Result<()>;

    fn namespace_geometry(&self, nsid: u32) -> Result<NamespaceGeometry>;

    fn read_reg32(&self, offset: u32) -> Result<u32>;

    fn write_reg32(&self, offset: u32, value: u32) -> Result<()>;

    fn read_reg64(&self, offset: u32) -> Result<u64>;

    fn write_reg64(&self, offset: u32, value: u64) -> Result<()>;

    fn pcie_cfg_read8(&self, offset: u32) -> Result<u8>;

    fn pcie_cfg_write8(&self, offset: u32, value: u8) -> Result<()>;

    /// Replace the per-command timeout handler; `None` disables it
    fn register_timeout_cb(&self, timeout: Duration, callback: Option<TimeoutCallback>);

    /// Replace the asynchronous event handler; `None` disables it
    fn register_aer_cb(&self, callback: Option<AerCallback>);

    /// Allocate a DMA-capable buffer of at least `bytes`
    fn alloc_buffer(&self, bytes: usize) -> Result<DmaBuffer>;
}
