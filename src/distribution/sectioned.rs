//! Region-weighted random distribution
//!
//! The region is cut into 100 equal sections (1% each) and every section gets
//! a weight; the weights sum to [`SECTION_WEIGHT_TOTAL`]. A draw first picks a
//! section in proportion to its weight, then a block uniformly inside it. This
//! lets a workload concentrate IO on hot parts of the device, e.g. 90% of the
//! traffic on the first 10% of the region.

use super::Distribution;
use crate::error::{WorkerError, WorkerResultOf};
use rand::distributions::{Distribution as _, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

pub const SECTION_COUNT: usize = 100;

pub const SECTION_WEIGHT_TOTAL: u32 = 10_000;

pub struct SectionedDistribution {
    rng: Xoshiro256PlusPlus,
    sections: WeightedIndex<u32>,
}

impl SectionedDistribution {
    /// # Errors
    /// `Config` when there are not exactly 100 weights or they do not sum to
    /// 10000.
    pub fn new(weights: &[u32], seed: u64) -> WorkerResultOf<Self> {
        if weights.len() != SECTION_COUNT {
            return Err(WorkerError::config(format!(
                "region distribution needs {} weights, got {}",
                SECTION_COUNT,
                weights.len()
            )));
        }
        let total: u64 = weights.iter().map(|&w| w as u64).sum();
        if total != SECTION_WEIGHT_TOTAL as u64 {
            return Err(WorkerError::config(format!(
                "region distribution weights sum to {}, expected {}",
                total, SECTION_WEIGHT_TOTAL
            )));
        }
        let sections = WeightedIndex::new(weights)
            .map_err(|e| WorkerError::config(format!("region distribution: {}", e)))?;

        Ok(Self {
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            sections,
        })
    }
}

impl Distribution for SectionedDistribution {
    fn next_block(&mut self, num_blocks: u64) -> u64 {
        if num_blocks == 0 {
            return 0;
        }
        let section = self.sections.sample(&mut self.rng) as u64;
        let lo = num_blocks * section / SECTION_COUNT as u64;
        let hi = num_blocks * (section + 1) / SECTION_COUNT as u64;
        if hi <= lo {
            // Region smaller than 100 blocks: the section rounds to nothing
            return lo.min(num_blocks - 1);
        }
        self.rng.gen_range(lo..hi)
    }
}
