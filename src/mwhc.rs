//! Static functions over fixed bit-vector key sets (MWHC construction).
//!
//! An `Mwhc` maps every key of a static set to a caller-chosen fixed-width
//! value using about 1.23 bits per value bit per key. Lookup XORs three cells
//! of a packed value array, selected by a seeded triple hash of the key; a
//! random 3-partite hypergraph is peeled at construction so that the XOR
//! comes out right for every member key. Lookups on keys outside the set
//! return unspecified values.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::bits::{BitVector, CompactArray};
use crate::error::{DistributorError, Result};
use crate::hash::jenkins_triple;
use crate::stream::KeyStream;

/// Hypergraph expansion factor.
const GAMMA: f64 = 1.23;

/// Attempts at distinct signatures before concluding the keys collide.
const MAX_DUPLICATE_ROUNDS: u32 = 4;

/// Per-vertex incidence record: degree in the high bits, XOR of incident
/// edge indices in the low bits. When the degree drops to one the XOR is
/// exactly the remaining edge index.
#[derive(Debug, Default, Clone, Copy)]
struct EdgeList(usize);

impl EdgeList {
    const DEG_SHIFT: usize = usize::BITS as usize - 16;
    const EDGE_INDEX_MASK: usize = (1 << EdgeList::DEG_SHIFT) - 1;
    const DEG: usize = 1 << EdgeList::DEG_SHIFT;

    #[inline]
    fn add(&mut self, edge: usize) {
        self.0 += EdgeList::DEG;
        self.0 ^= edge;
    }

    #[inline]
    fn remove(&mut self, edge: usize) {
        debug_assert!(self.degree() > 0);
        self.0 -= EdgeList::DEG;
        self.0 ^= edge;
    }

    #[inline]
    fn degree(&self) -> usize {
        self.0 >> EdgeList::DEG_SHIFT
    }

    #[inline]
    fn edge_index(&self) -> usize {
        self.0 & EdgeList::EDGE_INDEX_MASK
    }

    #[inline]
    fn dec(&mut self) {
        debug_assert!(self.degree() > 0);
        self.0 -= EdgeList::DEG;
    }
}

/// A static function from bit-vector keys to fixed-width values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mwhc {
    seed: u64,
    num_keys: usize,
    width: u32,
    segment_len: usize,
    values: CompactArray,
}

impl Mwhc {
    /// Build from in-memory (key, value) pairs. Keys must be distinct;
    /// values must fit in `width` bits.
    pub fn from_pairs(pairs: &[(BitVector, u64)], width: u32) -> Result<Self> {
        Self::build(pairs.len(), width, |seed| {
            Ok(pairs
                .iter()
                .map(|(key, value)| (jenkins_triple(key, seed), *value))
                .collect())
        })
    }

    /// Build by replaying a spilled key stream.
    pub(crate) fn from_stream(stream: &mut KeyStream, width: u32) -> Result<Self> {
        let num_keys = stream.len();
        Self::build(num_keys, width, |seed| {
            stream.signatures(seed).map_err(DistributorError::from)
        })
    }

    fn build<F>(num_keys: usize, width: u32, mut signatures: F) -> Result<Self>
    where
        F: FnMut(u64) -> Result<Vec<([u64; 3], u64)>>,
    {
        if num_keys == 0 {
            return Ok(Self {
                seed: 0,
                num_keys: 0,
                width,
                segment_len: 0,
                values: CompactArray::new(width, 0),
            });
        }

        let segment_len = (num_keys as f64 * GAMMA).ceil() as usize / 3 + 1;
        let num_vertices = 3 * segment_len;
        let mut seed = 0u64;
        let mut duplicate_rounds = 0;

        loop {
            let sigs = signatures(seed)?;
            debug_assert_eq!(sigs.len(), num_keys);

            let mut sorted: Vec<[u64; 3]> = sigs.iter().map(|(sig, _)| *sig).collect();
            sorted.sort_unstable();
            if sorted.windows(2).any(|w| w[0] == w[1]) {
                duplicate_rounds += 1;
                if duplicate_rounds >= MAX_DUPLICATE_ROUNDS {
                    return Err(DistributorError::StaticFunction(format!(
                        "duplicate signatures with {} different seeds",
                        MAX_DUPLICATE_ROUNDS
                    )));
                }
                warn!("duplicate signature with seed {}, reseeding", seed);
                seed += 1;
                continue;
            }

            let mut edge_lists = vec![EdgeList::default(); num_vertices];
            for (edge_index, (sig, _)) in sigs.iter().enumerate() {
                for &v in &Self::edge(sig, segment_len) {
                    edge_lists[v].add(edge_index);
                }
            }

            // Peel degree-one vertices
            let mut stack = Vec::with_capacity(num_keys);
            for v in 0..num_vertices {
                if edge_lists[v].degree() != 1 {
                    continue;
                }
                let mut pos = stack.len();
                let mut curr = stack.len();
                stack.push(v);
                while pos < stack.len() {
                    let v = stack[pos];
                    pos += 1;
                    if edge_lists[v].degree() == 0 {
                        continue;
                    }
                    edge_lists[v].dec();
                    let edge_index = edge_lists[v].edge_index();
                    stack[curr] = v;
                    curr += 1;
                    for &x in &Self::edge(&sigs[edge_index].0, segment_len) {
                        if x != v {
                            edge_lists[x].remove(edge_index);
                            if edge_lists[x].degree() == 1 {
                                stack.push(x);
                            }
                        }
                    }
                }
                stack.truncate(curr);
            }

            if stack.len() != num_keys {
                debug!("hypergraph not peelable with seed {}, reseeding", seed);
                seed += 1;
                continue;
            }

            // Assign values in reverse peeling order
            let mut values = CompactArray::new(width, num_vertices);
            while let Some(v) = stack.pop() {
                let edge_index = edge_lists[v].edge_index();
                let edge = Self::edge(&sigs[edge_index].0, segment_len);
                let other = if v == edge[0] {
                    values.get(edge[1]) ^ values.get(edge[2])
                } else if v == edge[1] {
                    values.get(edge[0]) ^ values.get(edge[2])
                } else {
                    values.get(edge[0]) ^ values.get(edge[1])
                };
                values.set(v, sigs[edge_index].1 ^ other);
                debug_assert_eq!(
                    values.get(edge[0]) ^ values.get(edge[1]) ^ values.get(edge[2]),
                    sigs[edge_index].1
                );
            }

            return Ok(Self {
                seed,
                num_keys,
                width,
                segment_len,
                values,
            });
        }
    }

    /// The three vertices of a key's edge, one per segment.
    #[inline]
    fn edge(sig: &[u64; 3], segment_len: usize) -> [usize; 3] {
        [
            (sig[0] % segment_len as u64) as usize,
            segment_len + (sig[1] % segment_len as u64) as usize,
            2 * segment_len + (sig[2] % segment_len as u64) as usize,
        ]
    }

    /// Look up a key. Returns the stored value for member keys, an
    /// unspecified value for non-members, and `u64::MAX` when the
    /// function is empty.
    #[inline]
    pub fn get(&self, key: &BitVector) -> u64 {
        if self.num_keys == 0 {
            return u64::MAX;
        }
        let edge = Self::edge(&jenkins_triple(key, self.seed), self.segment_len);
        self.values.get(edge[0]) ^ self.values.get(edge[1]) ^ self.values.get(edge[2])
    }

    /// Number of keys the function was built from.
    pub fn len(&self) -> usize {
        self.num_keys
    }

    /// Check if the function was built from an empty key set.
    pub fn is_empty(&self) -> bool {
        self.num_keys == 0
    }

    /// Storage cost in bits.
    pub fn num_bits(&self) -> u64 {
        self.values.num_bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: usize) -> Vec<(BitVector, u64)> {
        (0..n)
            .map(|i| {
                let mut key = BitVector::new();
                key.push_word(i as u64, 37);
                (key, (i as u64 * 31) & 0b11)
            })
            .collect()
    }

    #[test]
    fn test_lookup_all_members() {
        let pairs = keys(1000);
        let func = Mwhc::from_pairs(&pairs, 2).unwrap();
        for (key, value) in &pairs {
            assert_eq!(func.get(key), *value);
        }
    }

    #[test]
    fn test_one_bit_values() {
        let pairs: Vec<_> = keys(257)
            .into_iter()
            .map(|(k, v)| (k, v & 1))
            .collect();
        let func = Mwhc::from_pairs(&pairs, 1).unwrap();
        for (key, value) in &pairs {
            assert_eq!(func.get(key), *value);
        }
    }

    #[test]
    fn test_tiny_sets() {
        for n in 1..10 {
            let pairs = keys(n);
            let func = Mwhc::from_pairs(&pairs, 2).unwrap();
            for (key, value) in &pairs {
                assert_eq!(func.get(key), *value, "n = {}", n);
            }
        }
    }

    #[test]
    fn test_empty() {
        let func = Mwhc::from_pairs(&[], 2).unwrap();
        assert!(func.is_empty());
        assert_eq!(func.get(&BitVector::new()), u64::MAX);
        assert_eq!(func.num_bits(), 0);
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let mut pairs = keys(10);
        pairs[7] = pairs[3].clone();
        assert!(matches!(
            Mwhc::from_pairs(&pairs, 2),
            Err(DistributorError::StaticFunction(_))
        ));
    }

    #[test]
    fn test_deterministic() {
        let pairs = keys(500);
        let a = Mwhc::from_pairs(&pairs, 2).unwrap();
        let b = Mwhc::from_pairs(&pairs, 2).unwrap();
        for (key, _) in &pairs {
            assert_eq!(a.get(key), b.get(key));
        }
    }
}
