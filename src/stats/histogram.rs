//! Latency histogram using HdrHistogram
//!
//! Complements the fixed per-bucket counters in [`super::Accounting`] with
//! percentile queries. Range is 1ns to 1 hour at 3 significant digits, so
//! recording and querying are O(1) and the histogram stays a few KB.
//!
//! # Example
//!
//! ```
//! use ioworker::stats::histogram::LatencyHistogram;
//! use std::time::Duration;
//!
//! let mut hist = LatencyHistogram::new();
//! hist.record(Duration::from_micros(100));
//! hist.record(Duration::from_micros(200));
//! assert!(hist.percentile(50.0).is_some());
//! ```

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_TRACKED_NANOS: u64 = 3_600_000_000_000;

#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    histogram: Histogram<u64>,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, MAX_TRACKED_NANOS, 3)
            .expect("Failed to create histogram with valid bounds");
        Self { histogram }
    }

    /// Record one sample, clamped to the tracked range
    #[inline]
    pub fn record(&mut self, latency: Duration) {
        let nanos = latency.as_nanos().min(MAX_TRACKED_NANOS as u128) as u64;
        let _ = self.histogram.record(nanos.max(1));
    }

    /// `None` while empty
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        if self.histogram.len() == 0 {
            return None;
        }
        Some(Duration::from_nanos(self.histogram.value_at_percentile(percentile)))
    }

    pub fn max(&self) -> Option<Duration> {
        if self.histogram.len() == 0 {
            return None;
        }
        Some(Duration::from_nanos(self.histogram.max()))
    }

    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.len() == 0
    }

    /// Fold another worker's samples into this one
    pub fn merge(&mut self, other: &LatencyHistogram) {
        // Both sides share the same bounds, so the add cannot go out of range
        let _ = self.histogram.add(&other.histogram);
    }

    /// p50/p90/p99/p99.9 in microseconds
    pub fn summary(&self) -> LatencyPercentiles {
        let us = |p: f64| self.percentile(p).map(|d| d.as_micros() as u64).unwrap_or(0);
        LatencyPercentiles {
            p50_us: us(50.0),
            p90_us: us(90.0),
            p99_us: us(99.0),
            p999_us: us(99.9),
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency percentiles reported with a worker result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub p50_us: u64,
    pub p90_us: u64,
    pub p99_us: u64,
    pub p999_us: u64,
}
