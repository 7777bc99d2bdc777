//! Payload patterns written between the LBA stamp and the checksum trailer

use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

/// Payload generator selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// All zeros
    Zeros,
    /// All ones (0xFF)
    Ones,
    /// Low 32 bits of the seed, little-endian, repeated
    Fixed32,
    /// Byte value of the absolute device offset modulo 256
    Sequential,
    /// Pseudo-random bytes keyed by (seed, lba)
    #[default]
    Random,
}

/// Data pattern descriptor: type plus seed value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPattern {
    #[serde(default)]
    pub kind: PatternKind,
    #[serde(default)]
    pub seed: u64,
}

impl DataPattern {
    pub fn new(kind: PatternKind, seed: u64) -> Self {
        Self { kind, seed }
    }
}

// Spreads neighbouring LBAs across the PRNG seed space
const LBA_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Fill the payload region of one block
///
/// `offset` is the byte offset of `payload[0]` on the device; only the
/// sequential pattern depends on it.
pub(crate) fn fill_payload(payload: &mut [u8], lba: u64, offset: u64, pattern: &DataPattern) {
    match pattern.kind {
        PatternKind::Zeros => payload.fill(0),
        PatternKind::Ones => payload.fill(0xFF),
        PatternKind::Fixed32 => {
            let word = (pattern.seed as u32).to_le_bytes();
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte = word[i % 4];
            }
        }
        PatternKind::Sequential => {
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte = ((offset + i as u64) % 256) as u8;
            }
        }
        PatternKind::Random => {
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(pattern.seed ^ lba.wrapping_mul(LBA_MIX));
            rng.fill_bytes(payload);
        }
    }
}
