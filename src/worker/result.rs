//! Summary of one worker run

use crate::cmdlog::CommandLogEntry;
use crate::error::{ErrorKind, WorkerError, WorkerResultOf};
use crate::integrity::Corruption;
use crate::stats::histogram::LatencyPercentiles;
use serde::{Deserialize, Serialize};

/// Counters and diagnostics of a finished run
///
/// Every anomalous completion is reflected here: `error_count` counts them,
/// `error`/`error_kind` name the first one, and `unresolved` lists commands
/// still outstanding when the drain timed out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    pub io_count_read: u64,
    pub io_count_write: u64,
    /// Wall time from the first submission to the end of the drain
    pub mseconds: u64,
    pub latency_max_us: u64,
    /// Status code of the first failure, 0 when the run was clean
    pub error: u16,
    pub error_kind: Option<ErrorKind>,
    pub error_count: u64,
    /// Details of the first corruptions found
    pub corruptions: Vec<Corruption>,
    pub unresolved: Vec<CommandLogEntry>,
    pub io_counter_per_second: Vec<u32>,
    pub io_counter_per_latency: Vec<u32>,
    pub latency_percentiles: LatencyPercentiles,
    /// Tail of the command log, oldest first
    pub recent_commands: Vec<CommandLogEntry>,
    /// Generator seed, for replaying the exact command stream
    pub seed: u64,
}

impl WorkerResult {
    pub fn io_count(&self) -> u64 {
        self.io_count_read + self.io_count_write
    }

    pub fn is_success(&self) -> bool {
        self.error_count == 0 && self.unresolved.is_empty()
    }

    /// Average completed IOs per second over the run
    pub fn iops(&self) -> f64 {
        if self.mseconds == 0 {
            return 0.0;
        }
        self.io_count() as f64 * 1000.0 / self.mseconds as f64
    }

    /// Turn a failing summary into the matching error
    pub fn into_result(self) -> WorkerResultOf<WorkerResult> {
        if !self.unresolved.is_empty() {
            return Err(WorkerError::IncompleteDrain {
                unresolved: self.unresolved,
            });
        }
        match self.error_kind {
            None => Ok(self),
            Some(ErrorKind::DataCorruption) => {
                let first = self.corruptions.first();
                Err(WorkerError::DataCorruption {
                    lba: first.map_or(0, |c| c.lba),
                    expected: first.map_or(0, |c| c.expected),
                    observed: first.map_or(0, |c| c.observed),
                })
            }
            Some(ErrorKind::Timeout) => Err(WorkerError::Timeout {
                errors: self.error_count,
            }),
            Some(ErrorKind::Device) | Some(ErrorKind::IncompleteDrain) => Err(WorkerError::Device {
                status: self.error,
                errors: self.error_count,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Direction;
    use crate::integrity::CorruptionKind;

    #[test]
    fn test_clean_result() {
        let result = WorkerResult {
            io_count_read: 600,
            io_count_write: 400,
            mseconds: 2000,
            ..WorkerResult::default()
        };
        assert!(result.is_success());
        assert_eq!(result.iops(), 500.0);
        assert!(result.into_result().is_ok());
    }

    #[test]
    fn test_unresolved_wins() {
        let result = WorkerResult {
            error: 0x0281,
            error_kind: Some(ErrorKind::Device),
            error_count: 1,
            unresolved: vec![CommandLogEntry::submitted(5, 1, Direction::Read, 0)],
            ..WorkerResult::default()
        };
        match result.into_result() {
            Err(WorkerError::IncompleteDrain { unresolved }) => assert_eq!(unresolved[0].lba, 5),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_corruption_into_error() {
        let result = WorkerResult {
            error: 0x0281,
            error_kind: Some(ErrorKind::DataCorruption),
            error_count: 3,
            corruptions: vec![Corruption {
                lba: 77,
                expected: 0xAA,
                observed: 0xBB,
                kind: CorruptionKind::Checksum,
            }],
            ..WorkerResult::default()
        };
        assert!(!result.is_success());
        match result.into_result() {
            Err(WorkerError::DataCorruption { lba, expected, observed }) => {
                assert_eq!((lba, expected, observed), (77, 0xAA, 0xBB))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_device_error() {
        let result = WorkerResult {
            error: 0x0002,
            error_kind: Some(ErrorKind::Device),
            error_count: 2,
            ..WorkerResult::default()
        };
        assert!(matches!(
            result.into_result(),
            Err(WorkerError::Device { status: 0x0002, errors: 2 })
        ));
    }
}
