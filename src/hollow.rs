//! The hollow-trie distributor.
//!
//! The compacted trie over the delimiters is flattened to one bit per node in
//! breadth-first order (one = internal, zero = leaf) plus an Elias-Fano list
//! of the internal path lengths; the path bits themselves are discarded. Two
//! static functions keyed by (node position, consumed path) recover, for any
//! original key, how it behaved at every node it touched, which is enough to
//! count the leaves to its left without ever storing the keys.

use std::marker::PhantomData;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::bits::{BitVector, EliasFanoList, RankIndex, SelectIndex};
use crate::error::Result;
use crate::mwhc::Mwhc;
use crate::transform::TransformationStrategy;
use crate::trie::{label_behaviours, Behaviour, IntermediateTrie};

/// A distributor mapping each original key to its bucket index by walking a
/// hollow trie.
#[derive(Serialize, Deserialize)]
#[serde(bound(
    serialize = "S: Serialize",
    deserialize = "S: serde::de::DeserializeOwned"
))]
pub struct HollowTrieDistributor<T, S> {
    strategy: S,
    /// Topology, breadth-first: one bit per node, set on internal nodes.
    trie: BitVector,
    rank: RankIndex,
    select: SelectIndex,
    /// Path lengths of the internal nodes, breadth-first.
    skips: EliasFanoList,
    /// Behaviour of (node, path) pairs at internal nodes, two bits each.
    internal_behaviour: Mwhc,
    /// Behaviour of (node, path) pairs at leaves, one bit each.
    external_behaviour: Mwhc,
    /// Number of trie nodes.
    size: usize,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T, S: TransformationStrategy<T>> HollowTrieDistributor<T, S> {
    /// Build a distributor over `elements`, which the strategy must map to
    /// distinct, prefix-free, lexicographically increasing bit vectors.
    pub fn new(elements: &[T], bucket_size: usize, strategy: S) -> Result<Self> {
        Self::with_temp_dir(elements, bucket_size, strategy, None)
    }

    /// Like [`HollowTrieDistributor::new`], spilling the behaviour streams
    /// into `temp_dir` instead of the system default.
    pub fn with_temp_dir(
        elements: &[T],
        bucket_size: usize,
        strategy: S,
        temp_dir: Option<&Path>,
    ) -> Result<Self> {
        assert!(bucket_size >= 1, "bucket size must be positive");

        let mut intermediate = IntermediateTrie::build(elements, bucket_size, &strategy)?;
        let mut streams = label_behaviours(&mut intermediate, elements, &strategy, temp_dir)?;

        let size = intermediate.size();
        let mut trie = BitVector::with_capacity(size);
        let mut skips = Vec::new();
        for &id in &intermediate.bfs {
            let node = &intermediate.nodes[id as usize];
            trie.push(!node.is_leaf());
            if !node.is_leaf() {
                skips.push(node.path.len() as u64);
            }
        }
        debug!(
            "trie: {} nodes over {} elements, max key length {}",
            size, intermediate.num_elements, intermediate.max_length
        );
        drop(intermediate);

        let (rank, select, skips) = if size > 0 {
            (
                RankIndex::new(&trie),
                SelectIndex::new(&trie),
                EliasFanoList::new(&skips),
            )
        } else {
            Default::default()
        };

        let internal_behaviour = Mwhc::from_stream(&mut streams.internal, 2)?;
        let external_behaviour = Mwhc::from_stream(&mut streams.external, 1)?;
        debug!(
            "behaviour function bits: internal {}, external {}",
            internal_behaviour.num_bits(),
            external_behaviour.num_bits()
        );

        let distributor = Self {
            strategy,
            trie,
            rank,
            select,
            skips,
            internal_behaviour,
            external_behaviour,
            size,
            _marker: PhantomData,
        };
        if size > 0 {
            info!("bits per skip: {:.3}", distributor.bits_per_skip());
        }

        #[cfg(debug_assertions)]
        for (i, element) in elements.iter().enumerate() {
            debug_assert_eq!(distributor.get(element), (i / bucket_size) as u64);
        }

        Ok(distributor)
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
        let length = v.len();

        let mut p = 0usize; // position of the current node in the topology
        let mut r = 0usize; // rank of the current node among internal nodes
        let mut s = 0usize; // consumed bits of the query key
        let mut index = 0u64; // leaves accumulated to the left
        let (mut a, mut b) = (0usize, 0usize); // current breadth-first level window
        let behaviour;

        loop {
            let is_internal = self.trie.get(p);
            let mut key = BitVector::with_capacity(64 + 64);
            key.push_word(p as u64, 64);
            let beh = if is_internal {
                let skip = self.skips.get(r) as usize;
                key.append(&v.sub_vector(s.min(length), length.min(s + skip)));
                let beh = self.internal_behaviour.get(&key);
                if beh != Behaviour::Follow as u64 {
                    behaviour = beh;
                    break;
                }
                s += skip;
                if s >= length {
                    behaviour = beh;
                    break;
                }
                beh
            } else {
                key.append(&v.sub_vector(s.min(length), length));
                behaviour = self.external_behaviour.get(&key);
                break;
            };
            debug_assert_eq!(beh, Behaviour::Follow as u64);

            p = if v.get(s) { 2 * r + 2 } else { 2 * r + 1 };
            let t = 2 * self.rank.rank_range(&self.trie, a, b + 1);
            a = b + 1;
            b += t;
            index += (p - a - self.rank.rank_range(&self.trie, a, p)) as u64;
            r = self.rank.rank(&self.trie, p + 1) - 1;
            s += 1;
        }

        if behaviour == Behaviour::Left as u64 {
            // Descend the leftmost path below the exit node
            while self.trie.get(p) {
                let t = 2 * self.rank.rank_range(&self.trie, a, b + 1);
                a = b + 1;
                b += t;
                p = 2 * r + 1;
                index += (p - a - self.rank.rank_range(&self.trie, a, p)) as u64;
                r = self.rank.rank(&self.trie, p + 1) - 1;
            }
        } else if behaviour == Behaviour::Right as u64 {
            index += 1;
            // Descend the rightmost path below the exit node
            while self.trie.get(p) {
                let t = 2 * self.rank.rank_range(&self.trie, a, b + 1);
                a = b + 1;
                b += t;
                p = 2 * r + 2;
                index += (p - a - self.rank.rank_range(&self.trie, a, p)) as u64;
                r = self.rank.rank(&self.trie, p + 1) - 1;
            }
        }

        // Completion: count the leaves hanging off the levels below
        loop {
            let r = self.rank.rank(&self.trie, p + 1);
            if r == 0 || self.select.select(r - 1) < a {
                break;
            }
            p = 2 * r;
            let t = 2 * self.rank.rank_range(&self.trie, a, b + 1);
            a = b + 1;
            b += t;
            index += (p - a + 1 - self.rank.rank_range(&self.trie, a, p + 1)) as u64;
        }

        index
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
        self.trie.num_bits()
            + self.rank.num_bits()
            + self.select.num_bits()
            + self.skips.num_bits()
            + self.internal_behaviour.num_bits()
            + self.external_behaviour.num_bits()
            + self.strategy.num_bits()
    }

    /// Average cost of a stored skip, in bits.
    pub fn bits_per_skip(&self) -> f64 {
        self.skips.num_bits() as f64 / self.skips.len().max(1) as f64
    }
}
