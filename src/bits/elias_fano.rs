use serde::{Deserialize, Serialize};

use super::{BitVector, CompactArray, SelectIndex};

/// Succinct storage for a list of non-negative integers.
///
/// The list is stored as the Elias-Fano encoding of its prefix sums: low bits
/// in a `CompactArray`, high bits in unary inside a bit vector with select
/// support. `get(i)` recovers the i-th original value as a difference of two
/// adjacent prefix sums.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EliasFanoList {
    low: CompactArray,
    high: BitVector,
    select: SelectIndex,
    low_width: u32,
    len: usize,
}

impl EliasFanoList {
    /// Encode `values`.
    pub fn new(values: &[u64]) -> Self {
        let mut sums = Vec::with_capacity(values.len() + 1);
        let mut total = 0u64;
        sums.push(0);
        for &v in values {
            total += v;
            sums.push(total);
        }

        let universe = total + 1;
        let m = sums.len() as u64;
        let low_width = if universe / m == 0 {
            0
        } else {
            63 - (universe / m).leading_zeros()
        };

        let mut low = CompactArray::new(low_width, sums.len());
        let high_len = sums.len() + (total >> low_width) as usize + 1;
        let mut high: BitVector = (0..high_len).map(|_| false).collect();
        for (i, &s) in sums.iter().enumerate() {
            if low_width > 0 {
                low.set(i, s & ((1u64 << low_width) - 1));
            }
            high.set((s >> low_width) as usize + i);
        }
        let select = SelectIndex::new(&high);

        Self {
            low,
            high,
            select,
            low_width,
            len: values.len(),
        }
    }

    /// The i-th prefix sum.
    #[inline]
    fn sum(&self, i: usize) -> u64 {
        let high = (self.select.select(i) - i) as u64;
        (high << self.low_width) | self.low.get(i)
    }

    /// The i-th original value.
    #[inline]
    pub fn get(&self, i: usize) -> u64 {
        debug_assert!(i < self.len);
        self.sum(i + 1) - self.sum(i)
    }

    /// Number of values stored.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the list has no values.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Storage cost in bits.
    pub fn num_bits(&self) -> u64 {
        self.low.num_bits() + self.high.num_bits() + self.select.num_bits()
    }
}
