//! Transformation strategies mapping user elements to bit-vector keys.
//!
//! Distributors only ever see bit vectors; a strategy turns each element into
//! one. The caller is responsible for choosing a strategy under which the
//! input elements come out distinct, prefix-free and lexicographically
//! increasing.

use serde::{Deserialize, Serialize};

use crate::bits::BitVector;

/// Trait for element-to-bit-vector strategies
pub trait TransformationStrategy<T: ?Sized> {
    /// Map an element to its bit-vector key.
    fn to_bit_vector(&self, element: &T) -> BitVector;

    /// Metadata cost of the strategy itself, in bits.
    fn num_bits(&self) -> u64 {
        0
    }
}

/// Identity strategy - elements are already bit vectors
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Identity;

impl TransformationStrategy<BitVector> for Identity {
    fn to_bit_vector(&self, element: &BitVector) -> BitVector {
        element.clone()
    }
}

/// Prefix-free strategy over byte strings.
///
/// Bytes are read most-significant-bit-first (so byte order and bit order
/// agree), every bit `b` is emitted as the pair `1b`, and a final `0` closes
/// the vector. Doubling preserves lexicographic order and guarantees that no
/// encoding is a prefix of another, whatever the input lengths.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PrefixFreeBytes;

impl<T: AsRef<[u8]> + ?Sized> TransformationStrategy<T> for PrefixFreeBytes {
    fn to_bit_vector(&self, element: &T) -> BitVector {
        let bytes = element.as_ref();
        let mut bv = BitVector::with_capacity(bytes.len() * 16 + 1);
        for &byte in bytes {
            for shift in (0..8).rev() {
                bv.push(true);
                bv.push((byte >> shift) & 1 == 1);
            }
        }
        bv.push(false);
        bv
    }
}
