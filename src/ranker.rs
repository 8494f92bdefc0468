//! Monotone minimal perfect ranking over a sorted bit-vector set.
//!
//! Maps every member of a sorted, distinct set to its rank; lookups outside
//! the set return unspecified values. Backed by a static function storing
//! each rank explicitly.

use serde::{Deserialize, Serialize};

use crate::bits::BitVector;
use crate::error::Result;
use crate::mwhc::Mwhc;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct MonotoneRanker {
    func: Mwhc,
    len: usize,
}

impl MonotoneRanker {
    /// Build over `sorted`, which must be strictly increasing.
    pub fn new(sorted: &[BitVector]) -> Result<Self> {
        debug_assert!(sorted.windows(2).all(|w| w[0] < w[1]));
        let width = if sorted.len() <= 1 {
            1
        } else {
            64 - ((sorted.len() - 1) as u64).leading_zeros()
        };
        let pairs: Vec<(BitVector, u64)> = sorted
            .iter()
            .enumerate()
            .map(|(rank, v)| (v.clone(), rank as u64))
            .collect();
        Ok(Self {
            func: Mwhc::from_pairs(&pairs, width)?,
            len: sorted.len(),
        })
    }

    /// Rank of a member key; unspecified for non-members.
    #[inline]
    pub fn get(&self, key: &BitVector) -> u64 {
        self.func.get(key)
    }

    /// Number of ranked strings.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Storage cost in bits.
    pub fn num_bits(&self) -> u64 {
        self.func.num_bits()
    }
}
