//! Submission rate control
//!
//! Slots are `1 / iops` apart on a schedule anchored at the first submission.
//! The next slot follows the previous slot, not the submission time or the
//! completions, so late wakeups do not lose slots: every slot already due is
//! ready at once and the worker catches up as far as its queue depth allows.
//! Only a stall longer than `MAX_BACKLOG` drops the missed slots and
//! re-anchors the schedule at the current time.

use crate::util::fast_time::FastInstant;
use std::time::Duration;

/// Longest backlog of missed slots the schedule keeps
pub const MAX_BACKLOG: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// `None` when unthrottled
    interval: Option<Duration>,
    next_slot: Option<FastInstant>,
}

impl RateLimiter {
    /// `iops == 0` disables throttling
    pub fn new(iops: u32) -> Self {
        Self {
            interval: (iops > 0).then(|| Duration::from_nanos(1_000_000_000 / iops as u64)),
            next_slot: None,
        }
    }

    pub fn is_throttled(&self) -> bool {
        self.interval.is_some()
    }

    /// True when a command may be submitted at `now`
    #[inline]
    pub fn ready(&self, now: FastInstant) -> bool {
        match self.next_slot {
            Some(slot) => now >= slot,
            None => true,
        }
    }

    /// Time left until the next slot opens
    #[inline]
    pub fn wait_time(&self, now: FastInstant) -> Duration {
        match self.next_slot {
            Some(slot) => slot.duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Book the slot just used by a submission at `now`
    #[inline]
    pub fn on_submit(&mut self, now: FastInstant) {
        let Some(interval) = self.interval else {
            return;
        };
        let slot = match self.next_slot {
            Some(slot) if now.duration_since(slot) <= MAX_BACKLOG => slot,
            _ => now,
        };
        self.next_slot = Some(slot + interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unthrottled() {
        let mut limiter = RateLimiter::new(0);
        let now = FastInstant::now();
        limiter.on_submit(now);
        assert!(!limiter.is_throttled());
        assert!(limiter.ready(now));
        assert_eq!(limiter.wait_time(now), Duration::ZERO);
    }

    #[test]
    fn test_interval_spacing() {
        let mut limiter = RateLimiter::new(1000);
        let t0 = FastInstant::now();
        assert!(limiter.ready(t0));
        limiter.on_submit(t0);

        assert!(!limiter.ready(t0 + Duration::from_micros(500)));
        assert_eq!(limiter.wait_time(t0), Duration::from_millis(1));
        assert!(limiter.ready(t0 + Duration::from_millis(1)));
    }

    #[test]
    fn test_schedule_absorbs_late_wakeup() {
        let mut limiter = RateLimiter::new(1000);
        let t0 = FastInstant::now();
        limiter.on_submit(t0);
        // Woke 300us late for the 1ms slot; the following slot stays at 2ms
        limiter.on_submit(t0 + Duration::from_micros(1300));
        assert_eq!(limiter.wait_time(t0), Duration::from_millis(2));
    }

    #[test]
    fn test_late_wakeup_keeps_missed_slots() {
        let mut limiter = RateLimiter::new(10_000);
        let t0 = FastInstant::now();
        limiter.on_submit(t0);

        // Overslept by 5 intervals: all 5 due slots go out back to back
        let late = t0 + Duration::from_micros(550);
        let mut burst = 0;
        while limiter.ready(late) {
            limiter.on_submit(late);
            burst += 1;
        }
        assert_eq!(burst, 5);
        assert_eq!(limiter.wait_time(late), Duration::from_micros(50));
    }

    #[test]
    fn test_submissions_over_a_window_match_rate() {
        // Wakeups every 130us at 20k IOPS (50us slots)
        let mut limiter = RateLimiter::new(20_000);
        let t0 = FastInstant::now();
        let mut issued = 0u64;
        let mut now = t0;
        while now < t0 + Duration::from_secs(1) {
            while limiter.ready(now) {
                limiter.on_submit(now);
                issued += 1;
            }
            now = now + Duration::from_micros(130);
        }
        assert!((19_990..=20_001).contains(&issued), "issued {}", issued);
    }

    #[test]
    fn test_reanchors_after_stall() {
        let mut limiter = RateLimiter::new(1000);
        let t0 = FastInstant::now();
        limiter.on_submit(t0);
        let late = t0 + MAX_BACKLOG + Duration::from_millis(50);
        limiter.on_submit(late);
        assert_eq!(limiter.wait_time(late), Duration::from_millis(1));
    }
}
