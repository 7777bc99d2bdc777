//! Rate and accounting
//!
//! Per-worker counters for a run: completed reads and writes, a per-second
//! completion counter, a per-latency-bucket counter, the maximum latency, and
//! the error tally. Both counter arrays are allocated once when the run starts
//! and never grow, so recording a completion never allocates.
//!
//! An HDR histogram is kept next to the fixed buckets for percentile queries.
//!
//! # Example
//!
//! ```
//! use ioworker::config::EngineOptions;
//! use ioworker::driver::Direction;
//! use ioworker::stats::Accounting;
//! use std::time::Duration;
//!
//! let mut acct = Accounting::new(10, &EngineOptions::default());
//! acct.record_success(Direction::Read, Duration::from_millis(1500), Duration::from_micros(80));
//! assert_eq!(acct.io_count_read(), 1);
//! assert_eq!(acct.per_second(Duration::from_secs(2)), vec![0, 1]);
//! ```

pub mod histogram;
pub mod rate;

use crate::config::EngineOptions;
use crate::driver::Direction;
use crate::error::{ErrorKind, STATUS_DATA_CORRUPTION};
use crate::integrity::Corruption;
use histogram::LatencyHistogram;
use std::time::Duration;

#[derive(Debug)]
pub struct Accounting {
    io_count_read: u64,
    io_count_write: u64,
    /// Completions per elapsed second; the last slot absorbs overflow
    per_second: Box<[u32]>,
    /// Completions per latency bucket; the last slot absorbs overflow
    per_latency: Box<[u32]>,
    latency_bucket_us: u64,
    latency_max_us: u64,
    histogram: LatencyHistogram,
    error_count: u64,
    first_error: Option<(ErrorKind, u16)>,
    corruptions: Vec<Corruption>,
    corruption_limit: usize,
}

impl Accounting {
    /// Counters for a run tracking `seconds` per-second slots
    pub fn new(seconds: usize, options: &EngineOptions) -> Self {
        Self {
            io_count_read: 0,
            io_count_write: 0,
            per_second: vec![0; seconds.max(1)].into_boxed_slice(),
            per_latency: vec![0; options.latency_buckets.max(1)].into_boxed_slice(),
            latency_bucket_us: options.latency_bucket_us.max(1),
            latency_max_us: 0,
            histogram: LatencyHistogram::new(),
            error_count: 0,
            first_error: None,
            corruptions: Vec::with_capacity(options.corruption_log_limit),
            corruption_limit: options.corruption_log_limit,
        }
    }

    /// Count a successful completion
    ///
    /// `at` is the completion time relative to the start of the run.
    #[inline]
    pub fn record_success(&mut self, direction: Direction, at: Duration, latency: Duration) {
        match direction {
            Direction::Read => self.io_count_read += 1,
            Direction::Write => self.io_count_write += 1,
        }

        let second = (at.as_secs() as usize).min(self.per_second.len() - 1);
        self.per_second[second] = self.per_second[second].saturating_add(1);

        let latency_us = latency.as_micros() as u64;
        let bucket = ((latency_us / self.latency_bucket_us) as usize).min(self.per_latency.len() - 1);
        self.per_latency[bucket] = self.per_latency[bucket].saturating_add(1);

        self.latency_max_us = self.latency_max_us.max(latency_us);
        self.histogram.record(latency);
    }

    /// Count a failed command; the first failure is remembered
    #[inline]
    pub fn record_error(&mut self, kind: ErrorKind, code: u16) {
        self.error_count += 1;
        if self.first_error.is_none() {
            self.first_error = Some((kind, code));
        }
    }

    /// Count an integrity failure, keeping the details of the first few
    pub fn record_corruption(&mut self, corruption: Corruption) {
        self.record_error(ErrorKind::DataCorruption, STATUS_DATA_CORRUPTION);
        if self.corruptions.len() < self.corruption_limit {
            self.corruptions.push(corruption);
        }
    }

    pub fn io_count_read(&self) -> u64 {
        self.io_count_read
    }

    pub fn io_count_write(&self) -> u64 {
        self.io_count_write
    }

    /// Successful completions of either direction
    pub fn io_count(&self) -> u64 {
        self.io_count_read + self.io_count_write
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    pub fn first_error(&self) -> Option<(ErrorKind, u16)> {
        self.first_error
    }

    pub fn latency_max_us(&self) -> u64 {
        self.latency_max_us
    }

    pub fn histogram(&self) -> &LatencyHistogram {
        &self.histogram
    }

    pub fn corruptions(&self) -> &[Corruption] {
        &self.corruptions
    }

    /// Per-second counters covering a run of length `elapsed`
    pub fn per_second(&self, elapsed: Duration) -> Vec<u32> {
        let covered = (elapsed.as_secs() as usize + usize::from(elapsed.subsec_nanos() > 0))
            .clamp(1, self.per_second.len());
        self.per_second[..covered].to_vec()
    }

    /// Latency bucket counters up to the slowest non-empty bucket
    pub fn per_latency(&self) -> Vec<u32> {
        let used = self
            .per_latency
            .iter()
            .rposition(|&c| c > 0)
            .map_or(0, |i| i + 1);
        self.per_latency[..used].to_vec()
    }
}
