//! Configuration validation
//!
//! Every check runs before the first command is issued; a failure is a
//! `WorkerError::Config` and nothing reaches the device.

use super::{EngineOptions, RunConfig, WorkloadSpec};
use crate::cmdlog::MAX_QUEUE_DEPTH;
use crate::distribution::sectioned::{SECTION_COUNT, SECTION_WEIGHT_TOTAL};
use crate::error::{WorkerError, WorkerResultOf};

macro_rules! invalid {
    ($($arg:tt)*) => {
        return Err(WorkerError::Config(format!($($arg)*)))
    };
}

/// Validate a complete run configuration
pub fn validate_run_config(config: &RunConfig) -> WorkerResultOf<()> {
    validate_options(&config.engine)?;
    if config.workloads.is_empty() {
        invalid!("at least one [[workload]] is required");
    }
    for (i, spec) in config.workloads.iter().enumerate() {
        validate_spec(spec, &config.engine)
            .map_err(|e| WorkerError::config(format!("workload {}: {}", i, strip_prefix(&e))))?;
    }
    Ok(())
}

fn strip_prefix(err: &WorkerError) -> String {
    match err {
        WorkerError::Config(msg) => msg.clone(),
        other => other.to_string(),
    }
}

/// Validate engine options
pub fn validate_options(options: &EngineOptions) -> WorkerResultOf<()> {
    if options.cmdlog_capacity < 2 {
        invalid!("cmdlog_capacity must be at least 2, got {}", options.cmdlog_capacity);
    }
    if options.latency_bucket_us == 0 {
        invalid!("latency_bucket_us must be greater than 0");
    }
    if options.latency_buckets == 0 {
        invalid!("latency_buckets must be greater than 0");
    }
    if options.max_tracked_seconds == 0 {
        invalid!("max_tracked_seconds must be greater than 0");
    }
    Ok(())
}

/// Validate one workload against the engine options it will run with
pub fn validate_spec(spec: &WorkloadSpec, options: &EngineOptions) -> WorkerResultOf<()> {
    if spec.region_end <= spec.region_start {
        invalid!(
            "region_end ({}) must be greater than region_start ({})",
            spec.region_end,
            spec.region_start
        );
    }

    if spec.qdepth == 0 || spec.qdepth > MAX_QUEUE_DEPTH {
        invalid!("qdepth must be between 1 and {}, got {}", MAX_QUEUE_DEPTH, spec.qdepth);
    }

    // In-flight entries must never be overwritten in the command log
    if options.cmdlog_capacity <= spec.qdepth + 1 {
        invalid!(
            "cmdlog_capacity ({}) must exceed qdepth + 1 ({})",
            options.cmdlog_capacity,
            spec.qdepth + 1
        );
    }

    if spec.read_percentage > 100 {
        invalid!("read_percentage must be between 0 and 100, got {}", spec.read_percentage);
    }

    if !spec.stop.is_set() {
        invalid!("stop condition needs io_count or seconds");
    }

    if !spec.random && !spec.region().contains(&spec.lba_start) {
        invalid!(
            "lba_start ({}) must lie in the region [{}, {})",
            spec.lba_start,
            spec.region_start,
            spec.region_end
        );
    }

    validate_sizes(spec)?;

    if let Some(weights) = &spec.region_distribution {
        if weights.len() != SECTION_COUNT {
            invalid!(
                "region_distribution needs {} weights, got {}",
                SECTION_COUNT,
                weights.len()
            );
        }
        let total: u64 = weights.iter().map(|&w| w as u64).sum();
        if total != SECTION_WEIGHT_TOTAL as u64 {
            invalid!(
                "region_distribution weights must sum to {}, got {}",
                SECTION_WEIGHT_TOTAL,
                total
            );
        }
    }

    check_fit(spec)
}

fn validate_sizes(spec: &WorkloadSpec) -> WorkerResultOf<()> {
    if spec.size_distribution.is_empty() {
        if spec.lba_size_max == 0 {
            invalid!("lba_size_max must be greater than 0");
        }
        if spec.lba_align_max == Some(0) {
            invalid!("lba_align_max must be greater than 0");
        }
        return Ok(());
    }

    let total: u64 = spec.size_distribution.iter().map(|e| e.ratio as u64).sum();
    if total != spec.lba_size_ratio_sum as u64 {
        invalid!(
            "size_distribution ratios must sum to {}, got {}",
            spec.lba_size_ratio_sum,
            total
        );
    }

    for (i, entry) in spec.size_distribution.iter().enumerate() {
        if entry.blocks == 0 {
            invalid!("size_distribution[{}]: blocks must be greater than 0", i);
        }
        if entry.align == 0 {
            invalid!("size_distribution[{}]: align must be greater than 0", i);
        }
    }
    Ok(())
}

/// Every drawable transfer must fit the region at least once
///
/// Random addressing needs room for the transfer after aligning up from
/// `region_start`; sequential addressing only needs the length.
pub(crate) fn check_fit(spec: &WorkloadSpec) -> WorkerResultOf<()> {
    for entry in spec.size_entries().iter().filter(|e| e.ratio > 0) {
        let first = if spec.random {
            align_up(spec.region_start, entry.align as u64)
        } else {
            spec.region_start
        };
        if first.saturating_add(entry.blocks as u64) > spec.region_end {
            invalid!(
                "region [{}, {}) is smaller than one {}-block transfer aligned to {}",
                spec.region_start,
                spec.region_end,
                entry.blocks,
                entry.align
            );
        }
    }
    Ok(())
}

#[inline]
pub(crate) fn align_up(lba: u64, align: u64) -> u64 {
    lba.div_ceil(align).saturating_mul(align)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SizeWeight, StopCondition};

    fn spec() -> WorkloadSpec {
        WorkloadSpec::new(0..1000, StopCondition::io_count(100))
    }

    fn config_err(spec: &WorkloadSpec) -> String {
        match validate_spec(spec, &EngineOptions::default()) {
            Err(WorkerError::Config(msg)) => msg,
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_spec() {
        assert!(validate_spec(&spec(), &EngineOptions::default()).is_ok());
    }

    #[test]
    fn test_empty_region() {
        let mut s = spec();
        s.region_end = 0;
        assert!(config_err(&s).contains("region_end"));
    }

    #[test]
    fn test_qdepth_bounds() {
        let mut s = spec();
        s.qdepth = 0;
        assert!(config_err(&s).contains("qdepth"));
        s.qdepth = MAX_QUEUE_DEPTH + 1;
        assert!(config_err(&s).contains("qdepth"));
        s.qdepth = MAX_QUEUE_DEPTH;
        assert!(validate_spec(&s, &EngineOptions::default()).is_ok());
    }

    #[test]
    fn test_cmdlog_must_cover_queue() {
        let s = WorkloadSpec { qdepth: 8, ..spec() };
        let options = EngineOptions {
            cmdlog_capacity: 9,
            ..EngineOptions::default()
        };
        assert!(validate_spec(&s, &options).is_err());
        let options = EngineOptions {
            cmdlog_capacity: 10,
            ..EngineOptions::default()
        };
        assert!(validate_spec(&s, &options).is_ok());
    }

    #[test]
    fn test_ratio_sum() {
        let mut s = spec();
        s.size_distribution = vec![
            SizeWeight { blocks: 1, ratio: 50, align: 1 },
            SizeWeight { blocks: 8, ratio: 40, align: 8 },
        ];
        assert!(config_err(&s).contains("sum to 100"));
        s.size_distribution[1].ratio = 50;
        assert!(validate_spec(&s, &EngineOptions::default()).is_ok());
    }

    #[test]
    fn test_missing_stop_condition() {
        let s = WorkloadSpec {
            stop: StopCondition::default(),
            ..spec()
        };
        assert!(config_err(&s).contains("stop condition"));
    }

    #[test]
    fn test_region_too_small_for_aligned_transfer() {
        let mut s = WorkloadSpec::new(1..9, StopCondition::io_count(1));
        s.lba_size_max = 8;
        // First 8-aligned LBA is 8, and 8 + 8 > 9
        assert!(config_err(&s).contains("smaller than one"));

        // Sequential only needs the length
        s.random = false;
        assert!(validate_spec(&s, &EngineOptions::default()).is_ok());
    }

    #[test]
    fn test_zero_ratio_entry_not_required_to_fit() {
        let mut s = WorkloadSpec::new(0..16, StopCondition::io_count(1));
        s.size_distribution = vec![
            SizeWeight { blocks: 256, ratio: 0, align: 1 },
            SizeWeight { blocks: 8, ratio: 100, align: 8 },
        ];
        assert!(validate_spec(&s, &EngineOptions::default()).is_ok());
    }

    #[test]
    fn test_region_distribution() {
        let mut s = spec();
        s.region_distribution = Some(vec![100; 99]);
        assert!(config_err(&s).contains("100 weights"));
        s.region_distribution = Some(vec![99; 100]);
        assert!(config_err(&s).contains("sum to 10000"));
        s.region_distribution = Some(vec![100; 100]);
        assert!(validate_spec(&s, &EngineOptions::default()).is_ok());
    }

    #[test]
    fn test_sequential_start_in_region() {
        let mut s = spec();
        s.random = false;
        s.lba_start = 1000;
        assert!(config_err(&s).contains("lba_start"));
    }

    #[test]
    fn test_run_config_names_workload() {
        let mut bad = spec();
        bad.read_percentage = 101;
        let config = RunConfig {
            workloads: vec![spec(), bad],
            ..RunConfig::default()
        };
        match validate_run_config(&config) {
            Err(WorkerError::Config(msg)) => {
                assert!(msg.starts_with("workload 1: read_percentage"), "{}", msg)
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(validate_run_config(&RunConfig::default()).is_err());
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(16, 8), 16);
        assert_eq!(align_up(5, 1), 5);
    }
}
