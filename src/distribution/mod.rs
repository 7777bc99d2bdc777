//! Address and transfer-size distributions
//!
//! The workload generator combines three independent pieces:
//!
//! - a [`Distribution`] choosing a block offset inside the region for random
//!   addressing (uniform, or weighted per 1% section of the region)
//! - a [`sequential::SequentialCursor`] walking the region with a signed step
//! - a [`size::SizeSampler`] choosing a transfer size and alignment
//!
//! # Block-Based Design
//!
//! Distributions return block offsets relative to the region start, in
//! `[0, num_blocks)`. The generator adds `region_start` and applies alignment,
//! so a distribution never needs to know about either.
//!
//! # Example
//!
//! ```
//! use ioworker::distribution::{Distribution, uniform::UniformDistribution};
//!
//! let mut dist = UniformDistribution::with_seed(7);
//! let offset = dist.next_block(1024);
//! assert!(offset < 1024);
//! ```

/// Block offset generator for random addressing
///
/// # Thread Safety
///
/// Distributions must be `Send` so a worker can take one onto its thread.
/// Each worker owns its own instance.
pub trait Distribution: Send {
    /// Next block offset in `[0, num_blocks)`; 0 when `num_blocks` is 0
    fn next_block(&mut self, num_blocks: u64) -> u64;
}

pub mod sectioned;
pub mod sequential;
pub mod size;
pub mod uniform;
