use serde::{Deserialize, Serialize};

use super::BitVector;

/// Select support over a bit vector: the position of every one bit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectIndex {
    positions: Vec<u32>,
}

impl SelectIndex {
    /// Build the select index for `bv`.
    pub fn new(bv: &BitVector) -> Self {
        let mut positions = Vec::with_capacity(bv.count_ones());
        for (j, &word) in bv.words().iter().enumerate() {
            let mut word = word;
            while word != 0 {
                positions.push((j * 64 + word.trailing_zeros() as usize) as u32);
                word &= word - 1;
            }
        }
        Self { positions }
    }

    /// Position of the `k`-th one (zero-based). Out-of-range returns 0.
    #[inline]
    pub fn select(&self, k: usize) -> usize {
        if k < self.positions.len() {
            self.positions[k] as usize
        } else {
            0
        }
    }

    /// Number of ones indexed.
    pub fn num_ones(&self) -> usize {
        self.positions.len()
    }

    /// Storage cost in bits.
    pub fn num_bits(&self) -> u64 {
        self.positions.len() as u64 * 32
    }
}
