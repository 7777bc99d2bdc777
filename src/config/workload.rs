//! Workload definition structures

use crate::integrity::DataPattern;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// One entry of a weighted transfer-size list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeWeight {
    /// Transfer size in logical blocks
    pub blocks: u32,
    /// Relative weight; 0 excludes the entry
    pub ratio: u32,
    /// Start LBA alignment in blocks
    #[serde(default = "default_align")]
    pub align: u32,
}

/// When a run stops issuing new commands; whichever limit is hit first wins
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopCondition {
    #[serde(default)]
    pub io_count: Option<u64>,
    #[serde(default)]
    pub seconds: Option<u32>,
}

impl StopCondition {
    pub fn io_count(count: u64) -> Self {
        Self {
            io_count: Some(count),
            seconds: None,
        }
    }

    pub fn seconds(seconds: u32) -> Self {
        Self {
            io_count: None,
            seconds: Some(seconds),
        }
    }

    pub fn is_set(&self) -> bool {
        self.io_count.is_some() || self.seconds.is_some()
    }
}

/// Everything one worker needs to generate its command stream
///
/// Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// First LBA for sequential addressing
    #[serde(default)]
    pub lba_start: u64,
    /// Transfer size in blocks when `size_distribution` is empty
    #[serde(default = "default_lba_size")]
    pub lba_size_max: u32,
    /// Alignment for the single-size case; defaults to `lba_size_max`
    #[serde(default)]
    pub lba_align_max: Option<u32>,
    /// Weighted (size, ratio, alignment) list
    #[serde(default)]
    pub size_distribution: Vec<SizeWeight>,
    /// Required sum of the ratios in `size_distribution`
    #[serde(default = "default_ratio_sum")]
    pub lba_size_ratio_sum: u32,
    #[serde(default = "default_true")]
    pub random: bool,
    /// Sequential step in blocks; absent advances by the transfer length
    #[serde(default)]
    pub lba_step: Option<i16>,
    #[serde(default)]
    pub region_start: u64,
    pub region_end: u64,
    /// 100 section weights summing to 10000 for random addressing
    #[serde(default)]
    pub region_distribution: Option<Vec<u32>>,
    #[serde(default = "default_read_percentage")]
    pub read_percentage: u8,
    /// Target IOPS, 0 = unthrottled
    #[serde(default)]
    pub iops: u32,
    pub stop: StopCondition,
    #[serde(default = "default_qdepth")]
    pub qdepth: usize,
    #[serde(default)]
    pub pattern: DataPattern,
    /// Recent commands copied into the result
    #[serde(default)]
    pub cmdlog_len: usize,
    /// Generator seed; absent seeds from OS entropy
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_align() -> u32 {
    1
}

fn default_lba_size() -> u32 {
    8
}

fn default_ratio_sum() -> u32 {
    100
}

fn default_true() -> bool {
    true
}

fn default_read_percentage() -> u8 {
    100
}

fn default_qdepth() -> usize {
    64
}

impl WorkloadSpec {
    /// Defaults for everything but the region and stop condition
    pub fn new(region: Range<u64>, stop: StopCondition) -> Self {
        Self {
            lba_start: region.start,
            lba_size_max: default_lba_size(),
            lba_align_max: None,
            size_distribution: Vec::new(),
            lba_size_ratio_sum: default_ratio_sum(),
            random: true,
            lba_step: None,
            region_start: region.start,
            region_end: region.end,
            region_distribution: None,
            read_percentage: default_read_percentage(),
            iops: 0,
            stop,
            qdepth: default_qdepth(),
            pattern: DataPattern::default(),
            cmdlog_len: 0,
            seed: None,
        }
    }

    pub fn region(&self) -> Range<u64> {
        self.region_start..self.region_end
    }

    pub fn region_blocks(&self) -> u64 {
        self.region_end.saturating_sub(self.region_start)
    }

    /// Size entries in effect, including the single-size fallback
    pub fn size_entries(&self) -> Vec<SizeWeight> {
        if self.size_distribution.is_empty() {
            vec![SizeWeight {
                blocks: self.lba_size_max,
                ratio: 1,
                align: self.lba_align_max.unwrap_or(self.lba_size_max),
            }]
        } else {
            self.size_distribution.clone()
        }
    }

    /// Largest transfer that can be drawn
    pub fn max_transfer_blocks(&self) -> u32 {
        self.size_entries()
            .iter()
            .filter(|e| e.ratio > 0)
            .map(|e| e.blocks)
            .max()
            .unwrap_or(0)
    }
}
