//! Error kinds surfaced by the IO worker engine
//!
//! Configuration problems are fatal before the first command is issued and come
//! back as `Err(WorkerError::Config)`. Everything that goes wrong *during* a run
//! (device status, corrupted payloads, per-command timeouts, an incomplete drain)
//! is counted in the `WorkerResult` so no anomalous completion is ever dropped;
//! `WorkerResult::into_result` turns a failing summary into a `WorkerError` for
//! callers that prefer `?`.

use crate::cmdlog::CommandLogEntry;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Status code reported for an integrity mismatch (unrecovered read error).
pub const STATUS_DATA_CORRUPTION: u16 = 0x0281;

/// Status code reported when a command was still outstanding at drain timeout.
pub const STATUS_INCOMPLETE_DRAIN: u16 = 0xFFFF;

/// Status code reported for a command the driver layer timed out.
pub const STATUS_TIMEOUT: u16 = 0xFFFE;

/// Status code reported when the driver refused a submission.
pub const STATUS_SUBMIT_FAILED: u16 = 0xFFFD;

pub type WorkerResultOf<T> = std::result::Result<T, WorkerError>;

/// Run-time error classification recorded in `WorkerResult`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Command completed with a hardware error status
    Device,
    /// Read-back payload failed integrity verification
    DataCorruption,
    /// Commands were still outstanding when the drain timeout expired
    IncompleteDrain,
    /// Per-command timeout escalated from the driver layer
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Device => write!(f, "device error"),
            ErrorKind::DataCorruption => write!(f, "data corruption"),
            ErrorKind::IncompleteDrain => write!(f, "incomplete drain"),
            ErrorKind::Timeout => write!(f, "timeout"),
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("invalid workload: {0}")]
    Config(String),

    #[error("command failed with status 0x{status:04x} ({errors} errors in run)")]
    Device { status: u16, errors: u64 },

    #[error("data corruption at lba {lba}: expected crc 0x{expected:08x}, observed 0x{observed:08x}")]
    DataCorruption { lba: u64, expected: u32, observed: u32 },

    #[error("{} commands unresolved at drain timeout", unresolved.len())]
    IncompleteDrain { unresolved: Vec<CommandLogEntry> },

    #[error("command timed out ({errors} errors in run)")]
    Timeout { errors: u64 },

    #[error("driver failure: {0:#}")]
    Driver(#[from] anyhow::Error),
}

impl WorkerError {
    /// Shorthand used by the validator and generator
    pub fn config(msg: impl Into<String>) -> Self {
        WorkerError::Config(msg.into())
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            WorkerError::Device { .. } => Some(ErrorKind::Device),
            WorkerError::DataCorruption { .. } => Some(ErrorKind::DataCorruption),
            WorkerError::IncompleteDrain { .. } => Some(ErrorKind::IncompleteDrain),
            WorkerError::Timeout { .. } => Some(ErrorKind::Timeout),
            WorkerError::Config(_) | WorkerError::Driver(_) => None,
        }
    }
}
