//! Workload generator
//!
//! Produces the `(lba, blocks, direction)` of every command a worker issues.
//! Each generator owns its PRNGs, so a fixed `seed` reproduces the exact
//! command stream of a run.
//!
//! # Addressing
//!
//! - Random: draw a block in the region (uniformly, or weighted per section),
//!   align it down to the chosen transfer's alignment, and never go below the
//!   first aligned LBA of the region.
//! - Sequential: follow a [`SequentialCursor`] from `lba_start`.
//!
//! In both modes the length is trimmed so `[lba, lba + blocks)` stays inside
//! `[region_start, region_end)`.

use crate::config::validator::{align_up, check_fit};
use crate::config::WorkloadSpec;
use crate::distribution::sectioned::SectionedDistribution;
use crate::distribution::sequential::SequentialCursor;
use crate::distribution::size::SizeSampler;
use crate::distribution::uniform::UniformDistribution;
use crate::distribution::Distribution;
use crate::driver::Direction;
use crate::error::{WorkerError, WorkerResultOf};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::ops::Range;

/// One command to issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDescriptor {
    /// Position in the run's command stream, from 0
    pub index: u64,
    pub lba: u64,
    pub blocks: u32,
    pub direction: Direction,
}

pub struct Generator {
    region: Range<u64>,
    random: bool,
    addresses: Box<dyn Distribution>,
    cursor: SequentialCursor,
    sizes: SizeSampler,
    read_percentage: u8,
    rng: Xoshiro256PlusPlus,
    seed: u64,
    issued: u64,
}

impl Generator {
    /// # Errors
    /// `Config` for an empty region, a region smaller than one aligned
    /// transfer, or a size list without any non-zero ratio.
    pub fn new(spec: &WorkloadSpec) -> WorkerResultOf<Self> {
        if spec.region_end <= spec.region_start {
            return Err(WorkerError::config(format!(
                "region [{}, {}) is empty",
                spec.region_start, spec.region_end
            )));
        }
        let sizes = SizeSampler::new(&spec.size_entries())?;
        check_fit(spec)?;

        let seed = spec.seed.unwrap_or_else(rand::random);
        // Independent streams for addresses vs sizes and directions
        let address_seed = seed ^ 0xA5A5_A5A5_A5A5_A5A5;
        let addresses: Box<dyn Distribution> = match &spec.region_distribution {
            Some(weights) => Box::new(SectionedDistribution::new(weights, address_seed)?),
            None => Box::new(UniformDistribution::with_seed(address_seed)),
        };

        Ok(Self {
            region: spec.region(),
            random: spec.random,
            addresses,
            cursor: SequentialCursor::new(spec.lba_start, spec.lba_step),
            sizes,
            read_percentage: spec.read_percentage,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            seed,
            issued: 0,
        })
    }

    /// Seed in effect, for reproducing the run
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Descriptors produced so far
    pub fn issued(&self) -> u64 {
        self.issued
    }

    pub fn next_command(&mut self) -> CommandDescriptor {
        let size = self.sizes.sample(&mut self.rng);
        let lba = if self.random {
            self.random_lba(size.align as u64)
        } else {
            self.cursor.next(size.blocks as u64, &self.region)
        };
        let blocks = (size.blocks as u64).min(self.region.end - lba) as u32;
        let direction = if self.rng.gen_range(0..100u8) < self.read_percentage {
            Direction::Read
        } else {
            Direction::Write
        };

        let index = self.issued;
        self.issued += 1;
        CommandDescriptor {
            index,
            lba,
            blocks,
            direction,
        }
    }

    #[inline]
    fn random_lba(&mut self, align: u64) -> u64 {
        let span = self.region.end - self.region.start;
        let lba = self.region.start + self.addresses.next_block(span);
        (lba / align * align).max(align_up(self.region.start, align))
    }
}

impl Iterator for Generator {
    type Item = CommandDescriptor;

    fn next(&mut self) -> Option<CommandDescriptor> {
        Some(self.next_command())
    }
}
