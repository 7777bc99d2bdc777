//! Data integrity: self-describing block payloads and expected-content records
//!
//! Every logical block written by a worker carries enough information to be
//! checked on its own:
//!
//! ```text
//! [0, 8)                      LBA, little-endian
//! [8, sector_size - 4)        pattern payload derived from (lba, seed, kind)
//! [sector_size - 4, sector)   CRC32 of the preceding bytes
//! ```
//!
//! `verify()` checks that shape only. The shared [`IntegrityMap`] additionally
//! remembers the checksum of the last completed write to each LBA, so a read
//! returning an older (but internally consistent) block is still caught.
//!
//! # Thread Safety
//!
//! The map is split into shards of `SHARD_SPAN` consecutive LBAs hashed onto a
//! fixed set of mutexes. Workers on disjoint regions rarely touch the same
//! shard; overlapping regions are still correct, just contended.

pub mod pattern;

pub use pattern::{DataPattern, PatternKind};

use crate::error::WorkerError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Bytes taken by the LBA stamp at the start of each block
pub const LBA_STAMP_LEN: usize = 8;

/// Bytes taken by the CRC32 trailer at the end of each block
pub const CRC_LEN: usize = 4;

/// Smallest sector that still leaves room for a payload
pub const MIN_SECTOR_SIZE: usize = 16;

/// Consecutive LBAs covered by one shard run
const SHARD_SPAN: u64 = 256;

const SHARD_COUNT: usize = 64;

/// How a block failed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionKind {
    /// Content checksum differs from the trailer or from the last write
    Checksum,
    /// Block is stamped with a different LBA (misdirected read or write)
    LbaMismatch { found: u64 },
    /// Deallocated block expected to read back as zeros
    NonZero,
}

/// Offending block and the expected vs observed checksum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Corruption {
    pub lba: u64,
    pub expected: u32,
    pub observed: u32,
    pub kind: CorruptionKind,
}

impl From<Corruption> for WorkerError {
    fn from(c: Corruption) -> Self {
        WorkerError::DataCorruption {
            lba: c.lba,
            expected: c.expected,
            observed: c.observed,
        }
    }
}

/// Expected content of one LBA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRecord {
    /// Last completed write stored a block with this checksum
    Written { crc: u32 },
    /// Content undefined after deallocate; `uncorr` blocks are never checked
    Deallocated { uncorr: bool },
}

#[inline]
fn stamped_lba(block: &[u8]) -> u64 {
    let mut stamp = [0u8; LBA_STAMP_LEN];
    stamp.copy_from_slice(&block[..LBA_STAMP_LEN]);
    u64::from_le_bytes(stamp)
}

#[inline]
fn trailer(block: &[u8]) -> u32 {
    let mut crc = [0u8; CRC_LEN];
    crc.copy_from_slice(&block[block.len() - CRC_LEN..]);
    u32::from_le_bytes(crc)
}

/// CRC32 over everything but the trailer
#[inline]
pub fn block_crc(block: &[u8]) -> u32 {
    crc32fast::hash(&block[..block.len() - CRC_LEN])
}

/// Write stamped, checksummed blocks for `[lba, lba + n)` into `buffer`
///
/// `n` is `buffer.len() / sector_size`; a trailing partial block is left
/// untouched.
pub fn fill(buffer: &mut [u8], lba: u64, pattern: &DataPattern, sector_size: usize) {
    for (i, block) in buffer.chunks_exact_mut(sector_size).enumerate() {
        let block_lba = lba + i as u64;
        block[..LBA_STAMP_LEN].copy_from_slice(&block_lba.to_le_bytes());

        let payload_end = sector_size - CRC_LEN;
        let offset = block_lba * sector_size as u64 + LBA_STAMP_LEN as u64;
        pattern::fill_payload(&mut block[LBA_STAMP_LEN..payload_end], block_lba, offset, pattern);

        let crc = block_crc(block);
        block[payload_end..].copy_from_slice(&crc.to_le_bytes());
    }
}

fn check_block(block: &[u8], lba: u64) -> Result<u32, Corruption> {
    let observed = block_crc(block);
    let expected = trailer(block);
    if observed != expected {
        return Err(Corruption {
            lba,
            expected,
            observed,
            kind: CorruptionKind::Checksum,
        });
    }
    let found = stamped_lba(block);
    if found != lba {
        return Err(Corruption {
            lba,
            expected,
            observed,
            kind: CorruptionKind::LbaMismatch { found },
        });
    }
    Ok(observed)
}

/// Check that every block in `buffer` is a consistent block for its LBA
pub fn verify(buffer: &[u8], lba: u64, sector_size: usize) -> Result<(), Corruption> {
    for (i, block) in buffer.chunks_exact(sector_size).enumerate() {
        check_block(block, lba + i as u64)?;
    }
    Ok(())
}

/// Expected-content records for every LBA of a namespace
pub struct IntegrityMap {
    sector_size: usize,
    shards: Box<[Mutex<HashMap<u64, BlockRecord>>]>,
}

impl IntegrityMap {
    pub fn new(sector_size: usize) -> Self {
        Self {
            sector_size,
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    #[inline]
    fn shard(&self, lba: u64) -> &Mutex<HashMap<u64, BlockRecord>> {
        &self.shards[((lba / SHARD_SPAN) as usize) % SHARD_COUNT]
    }

    /// Visit `[lba, lba + count)` one shard run at a time, locking each once
    fn for_each_run<E>(
        &self,
        lba: u64,
        count: u64,
        mut f: impl FnMut(&mut HashMap<u64, BlockRecord>, std::ops::Range<u64>) -> Result<(), E>,
    ) -> Result<(), E> {
        let end = lba.saturating_add(count);
        let mut start = lba;
        while start < end {
            let run_end = end.min((start / SHARD_SPAN + 1) * SHARD_SPAN);
            let mut map = self.shard(start).lock().unwrap_or_else(|e| e.into_inner());
            f(&mut map, start..run_end)?;
            start = run_end;
        }
        Ok(())
    }

    /// Remember the checksums of a completed write
    pub fn record_write(&self, buffer: &[u8], lba: u64, blocks: u32) {
        let sector = self.sector_size;
        let _ = self.for_each_run::<()>(lba, blocks as u64, |map, run| {
            for block_lba in run {
                let i = (block_lba - lba) as usize;
                let block = &buffer[i * sector..(i + 1) * sector];
                map.insert(block_lba, BlockRecord::Written { crc: trailer(block) });
            }
            Ok(())
        });
    }

    /// Verify a completed read against the recorded content
    ///
    /// Blocks with no record, or deallocated as `uncorr`, are not checked.
    /// With `strict_deallocate` the other deallocated blocks must read back
    /// as zeros.
    pub fn verify_read(
        &self,
        buffer: &[u8],
        lba: u64,
        blocks: u32,
        strict_deallocate: bool,
    ) -> Result<(), Corruption> {
        let sector = self.sector_size;
        self.for_each_run(lba, blocks as u64, |map, run| {
            for block_lba in run {
                let i = (block_lba - lba) as usize;
                let block = &buffer[i * sector..(i + 1) * sector];
                match map.get(&block_lba) {
                    Some(BlockRecord::Written { crc }) => {
                        let observed = check_block(block, block_lba)?;
                        if observed != *crc {
                            return Err(Corruption {
                                lba: block_lba,
                                expected: *crc,
                                observed,
                                kind: CorruptionKind::Checksum,
                            });
                        }
                    }
                    Some(BlockRecord::Deallocated { uncorr: false }) if strict_deallocate => {
                        if block.iter().any(|&b| b != 0) {
                            return Err(Corruption {
                                lba: block_lba,
                                expected: 0,
                                observed: block_crc(block),
                                kind: CorruptionKind::NonZero,
                            });
                        }
                    }
                    _ => {}
                }
            }
            Ok(())
        })
    }

    /// Mark `[lba, lba + count)` as content undefined
    pub fn deallocate(&self, lba: u64, count: u64, uncorr: bool) {
        let _ = self.for_each_run::<()>(lba, count, |map, run| {
            for block_lba in run {
                map.insert(block_lba, BlockRecord::Deallocated { uncorr });
            }
            Ok(())
        });
    }

    /// Forget every record
    pub fn sanitize(&self) {
        for shard in self.shards.iter() {
            shard.lock().unwrap_or_else(|e| e.into_inner()).clear();
        }
    }

    pub fn record(&self, lba: u64) -> Option<BlockRecord> {
        self.shard(lba)
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&lba)
            .copied()
    }

    /// Number of LBAs with a record
    pub fn tracked_blocks(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }
}

impl std::fmt::Debug for IntegrityMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityMap")
            .field("sector_size", &self.sector_size)
            .field("tracked_blocks", &self.tracked_blocks())
            .finish()
    }
}
