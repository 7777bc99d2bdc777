//! Sequential addressing
//!
//! Walks the region from `lba_start` by a signed step. Moving past the top of
//! the region wraps to `region_start`; a negative step that would cross
//! `region_start` turns around and walks upward from there on.

use std::ops::Range;

#[derive(Debug, Clone)]
pub struct SequentialCursor {
    next: u64,
    /// `None` advances by the length of the previous transfer
    step: Option<i64>,
}

impl SequentialCursor {
    pub fn new(lba_start: u64, step: Option<i16>) -> Self {
        Self {
            next: lba_start,
            step: step.map(i64::from),
        }
    }

    /// Start address for a transfer of `blocks` inside `region`
    ///
    /// The returned range `[lba, lba + blocks)` lies inside the region as long
    /// as `blocks <= region.end - region.start`.
    pub fn next(&mut self, blocks: u64, region: &Range<u64>) -> u64 {
        let mut lba = self.next;
        if lba < region.start || lba + blocks > region.end {
            lba = region.start;
        }

        self.next = match self.step {
            None => lba + blocks,
            Some(step) if step >= 0 => lba + step as u64,
            Some(step) => {
                let back = step.unsigned_abs();
                if lba >= region.start + back {
                    lba - back
                } else {
                    self.step = Some(back as i64);
                    lba + back
                }
            }
        };
        lba
    }

    /// Current step; `None` means "transfer length"
    pub fn step(&self) -> Option<i64> {
        self.step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_by_transfer_length() {
        let mut cursor = SequentialCursor::new(0, None);
        let region = 0..100;
        assert_eq!(cursor.next(8, &region), 0);
        assert_eq!(cursor.next(8, &region), 8);
        assert_eq!(cursor.next(4, &region), 16);
        assert_eq!(cursor.next(4, &region), 20);
    }

    #[test]
    fn test_wraps_at_region_end() {
        let mut cursor = SequentialCursor::new(90, Some(8));
        let region = 10..100;
        assert_eq!(cursor.next(8, &region), 90);
        // 98 + 8 > 100
        assert_eq!(cursor.next(8, &region), 10);
        assert_eq!(cursor.next(8, &region), 18);
    }

    #[test]
    fn test_start_outside_region_snaps_to_start() {
        let mut cursor = SequentialCursor::new(5, Some(1));
        assert_eq!(cursor.next(1, &(10..20)), 10);
    }

    #[test]
    fn test_negative_step_reverses_at_lower_bound() {
        let mut cursor = SequentialCursor::new(24, Some(-8));
        let region = 10..100;
        let lbas: Vec<u64> = (0..5).map(|_| cursor.next(4, &region)).collect();
        assert_eq!(lbas, vec![24, 16, 24, 32, 40]);
        assert_eq!(cursor.step(), Some(8));
    }

    #[test]
    fn test_zero_step_repeats() {
        let mut cursor = SequentialCursor::new(3, Some(0));
        assert_eq!(cursor.next(1, &(0..10)), 3);
        assert_eq!(cursor.next(1, &(0..10)), 3);
    }
}
