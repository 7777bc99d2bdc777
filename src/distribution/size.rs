//! Weighted transfer-size selection
//!
//! Entries with a zero ratio are dropped before sampling, so they can never be
//! chosen. An entry's alignment may exceed its size; alignment only constrains
//! the start LBA.

use crate::config::SizeWeight;
use crate::error::{WorkerError, WorkerResultOf};
use rand::distributions::{Distribution as _, WeightedIndex};
use rand::Rng;

#[derive(Debug, Clone)]
pub struct SizeSampler {
    entries: Vec<SizeWeight>,
    /// `None` when only one entry is left
    weights: Option<WeightedIndex<u32>>,
}

impl SizeSampler {
    /// Build from a weighted list
    ///
    /// # Errors
    /// `Config` when no entry has a non-zero ratio.
    pub fn new(entries: &[SizeWeight]) -> WorkerResultOf<Self> {
        let entries: Vec<SizeWeight> = entries.iter().copied().filter(|e| e.ratio > 0).collect();
        match entries.len() {
            0 => Err(WorkerError::config("size distribution has no entry with a non-zero ratio")),
            1 => Ok(Self { entries, weights: None }),
            _ => {
                let weights = WeightedIndex::new(entries.iter().map(|e| e.ratio))
                    .map_err(|e| WorkerError::config(format!("size distribution: {}", e)))?;
                Ok(Self {
                    entries,
                    weights: Some(weights),
                })
            }
        }
    }

    /// Always the same size and alignment
    pub fn fixed(blocks: u32, align: u32) -> Self {
        Self {
            entries: vec![SizeWeight { blocks, ratio: 1, align }],
            weights: None,
        }
    }

    #[inline]
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> SizeWeight {
        match &self.weights {
            Some(weights) => self.entries[weights.sample(rng)],
            None => self.entries[0],
        }
    }

    /// Entries that can be drawn
    pub fn entries(&self) -> &[SizeWeight] {
        &self.entries
    }

    pub fn max_blocks(&self) -> u32 {
        self.entries.iter().map(|e| e.blocks).max().unwrap_or(0)
    }
}
