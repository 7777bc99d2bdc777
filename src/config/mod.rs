//! Configuration module
//!
//! Handles the driver flag set, engine tuning knobs, workload definitions,
//! TOML configuration files and validation.

pub mod toml;
pub mod validator;
pub mod workload;

pub use workload::{SizeWeight, StopCondition, WorkloadSpec};

use crate::cmdlog::CMD_LOG_DEPTH;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Verify read payloads against the integrity records
pub const DCFG_VERIFY_READ: u32 = 1 << 0;
/// Use MSI-X interrupts for completions
pub const DCFG_ENABLE_MSIX: u32 = 1 << 1;
/// Set force-unit-access on reads
pub const DCFG_FUA_READ: u32 = 1 << 2;
/// Set force-unit-access on writes
pub const DCFG_FUA_WRITE: u32 = 1 << 3;
/// Terminate a worker on its first failed command
pub const DCFG_IOW_TERM: u32 = 1 << 4;
/// Require deallocated blocks not marked uncorrectable to read back as zeros
pub const DCFG_STRICT_DEALLOCATE: u32 = 1 << 5;

/// Driver-wide flags, shared read-only by every worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub verify_read: bool,
    pub enable_msix: bool,
    pub fua_read: bool,
    pub fua_write: bool,
    pub iow_term: bool,
    pub strict_deallocate: bool,
}

impl DriverConfig {
    /// Decode the packed flag word; unknown bits are ignored
    pub fn from_bits(bits: u32) -> Self {
        Self {
            verify_read: bits & DCFG_VERIFY_READ != 0,
            enable_msix: bits & DCFG_ENABLE_MSIX != 0,
            fua_read: bits & DCFG_FUA_READ != 0,
            fua_write: bits & DCFG_FUA_WRITE != 0,
            iow_term: bits & DCFG_IOW_TERM != 0,
            strict_deallocate: bits & DCFG_STRICT_DEALLOCATE != 0,
        }
    }

    pub fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.verify_read {
            bits |= DCFG_VERIFY_READ;
        }
        if self.enable_msix {
            bits |= DCFG_ENABLE_MSIX;
        }
        if self.fua_read {
            bits |= DCFG_FUA_READ;
        }
        if self.fua_write {
            bits |= DCFG_FUA_WRITE;
        }
        if self.iow_term {
            bits |= DCFG_IOW_TERM;
        }
        if self.strict_deallocate {
            bits |= DCFG_STRICT_DEALLOCATE;
        }
        bits
    }
}

/// Engine tuning knobs that are not part of a workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Upper bound on a single completion poll
    pub poll_wait_us: u64,
    /// Assumed worst-case latency of one command, scaled by queue depth for
    /// the drain timeout
    pub worst_case_latency_ms: u64,
    /// Lower bound on the drain timeout
    pub drain_floor_ms: u64,
    /// Entries per queue command log
    pub cmdlog_capacity: usize,
    /// Width of one latency bucket
    pub latency_bucket_us: u64,
    /// Number of latency buckets; slower commands land in the last one
    pub latency_buckets: usize,
    /// Per-second counters kept for runs without a time limit
    pub max_tracked_seconds: u32,
    /// Corruptions kept in detail in the result
    pub corruption_log_limit: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            poll_wait_us: 1000,
            worst_case_latency_ms: 1000,
            drain_floor_ms: 10_000,
            cmdlog_capacity: CMD_LOG_DEPTH,
            latency_bucket_us: 1,
            latency_buckets: 1_000_000,
            max_tracked_seconds: 3600,
            corruption_log_limit: 16,
        }
    }
}

impl EngineOptions {
    pub fn poll_wait(&self) -> Duration {
        Duration::from_micros(self.poll_wait_us)
    }

    /// `max(drain_floor, qdepth × worst_case_latency)`
    pub fn drain_timeout(&self, qdepth: usize) -> Duration {
        let scaled = self.worst_case_latency_ms.saturating_mul(qdepth as u64);
        Duration::from_millis(scaled.max(self.drain_floor_ms))
    }
}

/// A complete run: driver flags, engine options and one workload per queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub engine: EngineOptions,
    #[serde(default, rename = "workload")]
    pub workloads: Vec<WorkloadSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_config_bits() {
        let cfg = DriverConfig::from_bits(DCFG_VERIFY_READ | DCFG_IOW_TERM);
        assert!(cfg.verify_read);
        assert!(cfg.iow_term);
        assert!(!cfg.fua_write);
        assert_eq!(cfg.bits(), DCFG_VERIFY_READ | DCFG_IOW_TERM);

        // Unknown bits are dropped
        assert_eq!(DriverConfig::from_bits(0xFFFF_FFFF).bits(), 0x3F);
        assert_eq!(DriverConfig::default().bits(), 0);
    }

    #[test]
    fn test_drain_timeout() {
        let options = EngineOptions {
            worst_case_latency_ms: 100,
            drain_floor_ms: 1000,
            ..EngineOptions::default()
        };
        assert_eq!(options.drain_timeout(4), Duration::from_millis(1000));
        assert_eq!(options.drain_timeout(64), Duration::from_millis(6400));
    }

    #[test]
    fn test_engine_defaults() {
        let options = EngineOptions::default();
        assert_eq!(options.cmdlog_capacity, CMD_LOG_DEPTH);
        assert_eq!(options.poll_wait(), Duration::from_millis(1));
    }
}
