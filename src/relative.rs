//! The relative-trie distributor.
//!
//! Instead of retaining the trie topology, this variant stores an
//! approximate signature table over the internal node strings, a one-bit
//! exit direction per key, and a monotone ranker over a set of strings
//! derived from the internal node labels. A query first recovers the length
//! of the node string at which its key exits (binary search over
//! power-of-two-aligned prefixes against the signature table), then builds a
//! canonical ranker string for its exit point and counts the delimiters to
//! its left. Keys for which the length recovery goes wrong are detected at
//! construction time and patched through a small correction table.

use std::collections::HashSet;
use std::marker::PhantomData;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::bits::{BitVector, RankIndex};
use crate::error::Result;
use crate::hash::{fingerprint, jenkins};
use crate::mwhc::Mwhc;
use crate::ranker::MonotoneRanker;
use crate::transform::TransformationStrategy;
use crate::trie::{Behaviour, IntermediateTrie};

/// A distributor mapping each original key to its bucket index through a
/// signature table and a monotone ranker.
#[derive(Serialize, Deserialize)]
#[serde(bound(
    serialize = "S: Serialize",
    deserialize = "S: serde::de::DeserializeOwned"
))]
pub struct RelativeTrieDistributor<T, S> {
    strategy: S,
    /// Number of trie nodes.
    size: usize,
    num_internal: usize,
    num_delimiters: u64,
    log_w: u32,
    log_w_mask: u64,
    log_log_w_mask: u64,
    /// Exit direction of every original key, one bit each.
    behaviour: Mwhc,
    /// Internal node key -> (path hash, path length) signatures.
    signatures: Mwhc,
    /// Monotone ranker over the derived strings.
    ranker: MonotoneRanker,
    /// Which ranked strings are delimiters.
    leaf_bits: BitVector,
    leaf_rank: RankIndex,
    /// Fingerprints of keys whose length recovery misbehaves.
    mistake_signatures: HashSet<u32>,
    /// Correct node-string lengths for the keys in the mistake set.
    corrections: Mwhc,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

/// Ceiling of the base-2 logarithm; zero for inputs below two.
fn ceil_log2(x: usize) -> u32 {
    if x <= 1 {
        0
    } else {
        64 - ((x - 1) as u64).leading_zeros()
    }
}

/// Per-internal-node output of the recursive labelling.
#[derive(Default)]
struct TrieLabels {
    /// Full root-to-node strings of the internal nodes.
    representations: Vec<BitVector>,
    /// Power-of-two-aligned keys for the signature table.
    keys: Vec<BitVector>,
    /// Signature values paired with `keys`.
    values: Vec<u64>,
    /// Canonical delimiter strings, in trie order.
    delimiters: Vec<BitVector>,
}

impl<T, S: TransformationStrategy<T>> RelativeTrieDistributor<T, S> {
    /// Build a distributor over `elements`, which the strategy must map to
    /// distinct, prefix-free, lexicographically increasing bit vectors.
    pub fn new(elements: &[T], bucket_size: usize, strategy: S) -> Result<Self> {
        assert!(bucket_size >= 1, "bucket size must be positive");

        let intermediate = IntermediateTrie::build(elements, bucket_size, &strategy)?;

        let log_log_w = ceil_log2(ceil_log2(intermediate.max_length) as usize);
        let log_w = 1u32 << log_log_w;
        debug_assert!(log_w + log_log_w <= 64);
        let log_w_mask = u64::MAX >> (64 - log_w);
        let log_log_w_mask = (1u64 << log_log_w) - 1;

        let mut distributor = Self {
            strategy,
            size: intermediate.size(),
            num_internal: 0,
            num_delimiters: 0,
            log_w,
            log_w_mask,
            log_log_w_mask,
            behaviour: Mwhc::default(),
            signatures: Mwhc::default(),
            ranker: MonotoneRanker::default(),
            leaf_bits: BitVector::new(),
            leaf_rank: RankIndex::default(),
            mistake_signatures: HashSet::new(),
            corrections: Mwhc::default(),
            _marker: PhantomData,
        };
        let root = match intermediate.root {
            Some(root) => root,
            None => return Ok(distributor),
        };

        info!("computing approximate structure");
        let mut labels = TrieLabels::default();
        let mut path = BitVector::new();
        label_trie(
            &intermediate,
            root,
            &mut path,
            &mut labels,
            true,
            log_w,
            log_w_mask,
            log_log_w_mask,
        );
        debug_assert!(labels.delimiters.windows(2).all(|w| w[0] < w[1]));
        distributor.num_internal = labels.representations.len();
        distributor.num_delimiters = labels.delimiters.len() as u64;

        info!("computing function keys");
        let keys: Vec<BitVector> = elements
            .iter()
            .map(|e| distributor.strategy.to_bit_vector(e))
            .collect();
        let (behaviours, parent_lengths) = exit_behaviours(&intermediate, &keys);
        drop(intermediate);

        let signature_pairs: Vec<(BitVector, u64)> = labels
            .keys
            .iter()
            .cloned()
            .zip(labels.values.iter().copied())
            .collect();
        distributor.signatures = Mwhc::from_pairs(&signature_pairs, log_w + log_log_w)?;
        drop(signature_pairs);

        let behaviour_pairs: Vec<(BitVector, u64)> = keys
            .iter()
            .cloned()
            .zip(behaviours.iter().map(|&b| b as u64))
            .collect();
        distributor.behaviour = Mwhc::from_pairs(&behaviour_pairs, 1)?;
        drop(behaviour_pairs);

        // Derived ranker strings: for every internal node string, its
        // truncation to the last one, its extension by a one, and its
        // last-zero-flipped truncation. The two root-boundary strings are
        // seeded unconditionally: keys exiting at the root build their ranker
        // key from the empty parent string, whose derived forms no internal
        // node generates.
        let mut ranker_set: HashSet<BitVector> = HashSet::new();
        ranker_set.insert(BitVector::new());
        ranker_set.insert([true].into_iter().collect());
        for v in &labels.representations {
            let last_one = v.last_one().map_or(0, |i| i + 1);
            ranker_set.insert(v.sub_vector(0, last_one));
            let mut plus_one = v.clone();
            plus_one.push(true);
            ranker_set.insert(plus_one);
            if let Some(last_zero) = v.last_zero() {
                let mut flipped = v.sub_vector(0, last_zero + 1);
                flipped.set(last_zero);
                ranker_set.insert(flipped);
            }
        }
        let mut rankers: Vec<BitVector> = ranker_set.into_iter().collect();
        rankers.sort();

        let delimiter_set: HashSet<&BitVector> = labels.delimiters.iter().collect();
        distributor.leaf_bits = rankers.iter().map(|v| delimiter_set.contains(v)).collect();
        distributor.leaf_rank = RankIndex::new(&distributor.leaf_bits);
        drop(delimiter_set);

        distributor.ranker = MonotoneRanker::new(&rankers)?;
        drop(rankers);

        // Detect keys whose length recovery misbehaves; corrections are
        // authoritative for every key whose fingerprint lands in the set,
        // false positives included.
        let mut mistake_signatures = HashSet::new();
        let mut mistakes = 0usize;
        for (c, key) in keys.iter().enumerate() {
            if distributor.raw_node_string_length(key) != parent_lengths[c] as i64 {
                mistake_signatures.insert(fingerprint(key));
                mistakes += 1;
            }
        }
        info!(
            "length-recovery errors: {} ({:.2}%)",
            mistakes,
            100.0 * mistakes as f64 / keys.len().max(1) as f64
        );

        let mut positives: Vec<(BitVector, u64)> = Vec::new();
        for (c, key) in keys.iter().enumerate() {
            if mistake_signatures.contains(&fingerprint(key)) {
                positives.push((key.clone(), parent_lengths[c] & log_w_mask));
            }
        }
        info!("false errors: {}", positives.len() - mistakes);
        distributor.mistake_signatures = mistake_signatures;
        distributor.corrections = Mwhc::from_pairs(&positives, log_w)?;

        debug!(
            "{} ranked strings; bits per element: behaviour {:.2}, signatures {:.2}, ranker {:.2}",
            distributor.ranker.len(),
            distributor.behaviour.num_bits() as f64 / keys.len() as f64,
            distributor.signatures.num_bits() as f64 / keys.len() as f64,
            distributor.ranker.num_bits() as f64 / keys.len() as f64,
        );

        #[cfg(debug_assertions)]
        for (i, element) in elements.iter().enumerate() {
            debug_assert_eq!(distributor.get(element), (i / bucket_size) as u64);
        }

        Ok(distributor)
    }

    /// Recover the node-string length of `v` without consulting corrections.
    fn raw_node_string_length(&self, v: &BitVector) -> i64 {
        let mut i = self.log_w as i32 - 1;
        let mut mask = 1u64 << i;
        let mut r = v.len() as i64;
        let mut l = 0i64;

        while r - l > 1 {
            debug_assert!(i > -1);
            if (l as u64 & mask) != ((r - 1) as u64 & mask) {
                // Highest power-of-two boundary inside (l, r)
                let f = (r - 1) & (-1i64 << i);
                let data = self.signatures.get(&v.sub_vector(0, f as usize));
                if data == u64::MAX {
                    r = f;
                } else {
                    let g = (data & self.log_w_mask) as i64;
                    if g > v.len() as i64 {
                        r = f;
                    } else {
                        let h = jenkins(&v.sub_vector(0, g as usize), 0);
                        if (data >> self.log_w) == (h & self.log_log_w_mask) && g >= f {
                            l = g;
                        } else {
                            r = f;
                        }
                    }
                }
            }
            i -= 1;
            mask >>= 1;
        }
        l
    }

    /// Recover the node-string length of `v`, patched by the corrections
    /// table when its fingerprint is in the mistake set.
    fn node_string_length(&self, v: &BitVector) -> i64 {
        if self.mistake_signatures.contains(&fingerprint(v)) {
            return (self.corrections.get(v) & self.log_w_mask) as i64;
        }
        self.raw_node_string_length(v)
    }

    /// Return the bucket index of `element`.
    ///
    /// Exact for the keys the distributor was built from; unspecified (but
    /// never trapping) on anything else. An empty distributor returns 0.
    pub fn get(&self, element: &T) -> u64 {
        if self.size == 0 {
            return 0;
        }
        let v = self.strategy.to_bit_vector(element);
        let behaviour = self.behaviour.get(&v);
        if self.num_internal == 0 {
            // Single-leaf trie: the exit direction alone decides the bucket
            return if behaviour == Behaviour::Left as u64 {
                0
            } else {
                self.num_delimiters
            };
        }

        let length = (self.node_string_length(&v).max(0) as usize).min(v.len());
        let bit = v.get(length);
        let mut key = v.sub_vector(0, length);

        if behaviour == Behaviour::Left as u64 {
            if bit {
                key.push(true);
            } else {
                key.truncate(key.last_one().map_or(0, |i| i + 1));
            }
            self.rank_delimiters(&key)
        } else if bit {
            match key.last_zero() {
                // Exiting at the right of an all-ones string
                None => self.num_delimiters,
                Some(last_zero) => {
                    key.truncate(last_zero + 1);
                    key.set(last_zero);
                    self.rank_delimiters(&key)
                }
            }
        } else {
            key.push(true);
            self.rank_delimiters(&key)
        }
    }

    /// Delimiters at or before the ranked string `key`.
    #[inline]
    fn rank_delimiters(&self, key: &BitVector) -> u64 {
        let pos = self.ranker.get(key);
        self.leaf_rank
            .rank(&self.leaf_bits, (pos as usize).min(self.leaf_bits.len())) as u64
    }

    /// Number of trie nodes (diagnostic).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Distributors rank every key; membership is never tested.
    pub fn contains_key(&self, _element: &T) -> bool {
        true
    }

    /// Total space, in bits.
    pub fn num_bits(&self) -> u64 {
        self.behaviour.num_bits()
            + self.signatures.num_bits()
            + self.ranker.num_bits()
            + self.leaf_bits.num_bits()
            + self.leaf_rank.num_bits()
            + self.corrections.num_bits()
            + self.mistake_signatures.len() as u64 * 32
            + self.strategy.num_bits()
    }
}

/// Walk the trie in order, accumulating internal node strings, their aligned
/// signature keys, and the canonical delimiter strings at the leaves.
#[allow(clippy::too_many_arguments)]
fn label_trie(
    trie: &IntermediateTrie,
    node_id: u32,
    path: &mut BitVector,
    labels: &mut TrieLabels,
    left: bool,
    log_w: u32,
    log_w_mask: u64,
    log_log_w_mask: u64,
) {
    let node = &trie.nodes[node_id as usize];
    debug_assert_eq!(node.left.is_some(), node.right.is_some());
    let parent_len = path.len() as i64 - 1;

    if let (Some(left_child), Some(right_child)) = (node.left, node.right) {
        path.append(&node.path);
        path.push(false);
        label_trie(
            trie, left_child, path, labels, true, log_w, log_w_mask, log_log_w_mask,
        );
        path.truncate(path.len() - 1);

        // Truncate the node string to the highest power-of-two boundary that
        // still exceeds the parent string's length
        let h = jenkins(path, 0);
        let msb = 63 - ((parent_len ^ path.len() as i64) as u64).leading_zeros();
        let aligned = ((-1i64 << msb) & path.len() as i64) as usize;
        debug_assert!(aligned <= path.len());
        debug_assert!(aligned as i64 > parent_len);
        debug_assert!(ceil_log2(path.len() + 1) <= log_w);

        labels.keys.push(path.sub_vector(0, aligned));
        labels.representations.push(path.clone());
        labels
            .values
            .push(((h & log_log_w_mask) << log_w) | (path.len() as u64 & log_w_mask));

        path.push(true);
        label_trie(
            trie,
            right_child,
            path,
            labels,
            false,
            log_w,
            log_w_mask,
            log_log_w_mask,
        );
        path.truncate(path.len() - 1 - node.path.len());
    } else if left {
        let last_one = path.last_one().map_or(0, |i| i + 1);
        labels.delimiters.push(path.sub_vector(0, last_one));
    } else {
        labels.delimiters.push(path.clone());
    }
}

/// Walk every key down the trie and record its exit direction together with
/// the length of its exit node's parent string.
fn exit_behaviours(trie: &IntermediateTrie, keys: &[BitVector]) -> (Vec<u8>, Vec<u64>) {
    let mut behaviours = Vec::with_capacity(keys.len());
    let mut parent_lengths = Vec::with_capacity(keys.len());
    let root = match trie.root {
        Some(root) => root,
        None => return (behaviours, parent_lengths),
    };

    let mut stack: Vec<u32> = vec![root];
    let mut starts: Vec<usize> = vec![0];
    let mut depth = 0usize;
    let mut first = true;
    let mut prev = BitVector::new();

    for curr in keys {
        if first {
            first = false;
        } else {
            let prefix = prev.longest_common_prefix(curr);
            while depth > 0 && starts[depth] > prefix {
                depth -= 1;
            }
        }
        let mut node = stack[depth];
        let mut pos = starts[depth];

        loop {
            let node_path = &trie.nodes[node as usize].path;
            let node_path_len = node_path.len();
            let prefix = curr.lcp_from(pos, node_path);
            let is_leaf = trie.nodes[node as usize].is_leaf();

            if prefix < node_path_len || is_leaf {
                let behaviour = if prefix < node_path_len && !node_path.get(prefix) {
                    Behaviour::Right
                } else {
                    Behaviour::Left
                };
                behaviours.push(behaviour as u8);
                let parent = if depth == 0 { pos } else { pos - 1 };
                parent_lengths.push(parent as u64);
                break;
            }

            pos += node_path_len + 1;
            debug_assert!(pos <= curr.len());
            let next = if curr.get(pos - 1) {
                trie.nodes[node as usize].right
            } else {
                trie.nodes[node as usize].left
            };
            node = next.expect("descended past a leaf");
            depth += 1;
            if depth == stack.len() {
                stack.push(node);
                starts.push(pos);
            } else {
                stack[depth] = node;
                starts[depth] = pos;
            }
        }

        prev = curr.clone();
    }

    (behaviours, parent_lengths)
}
