//! Fast monotonic clock for per-command latency
//!
//! Every submission and completion is timestamped, so the clock sits on the hot
//! path. Uses direct clock_gettime(CLOCK_MONOTONIC) instead of going through
//! `std::time::Instant`.

use std::ops::Add;
use std::time::Duration;

/// Nanosecond timestamp on CLOCK_MONOTONIC
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FastInstant {
    nanos: u64,
}

impl FastInstant {
    #[inline(always)]
    pub fn now() -> Self {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };

        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }

        Self {
            nanos: (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64),
        }
    }

    /// Saturates to zero when `earlier` is actually later
    #[inline(always)]
    pub fn duration_since(&self, earlier: FastInstant) -> Duration {
        Duration::from_nanos(self.nanos.saturating_sub(earlier.nanos))
    }

    #[inline(always)]
    pub fn elapsed(&self) -> Duration {
        Self::now().duration_since(*self)
    }

    /// Microseconds between `epoch` and this instant, used for log timestamps
    #[inline(always)]
    pub fn micros_since(&self, epoch: FastInstant) -> u64 {
        self.nanos.saturating_sub(epoch.nanos) / 1_000
    }
}

impl Add<Duration> for FastInstant {
    type Output = FastInstant;

    #[inline(always)]
    fn add(self, rhs: Duration) -> FastInstant {
        FastInstant {
            nanos: self.nanos.saturating_add(rhs.as_nanos() as u64),
        }
    }
}
