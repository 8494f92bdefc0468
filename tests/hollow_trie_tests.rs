//! Integration tests for the hollow-trie distributor.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use trie_distributor::{
    BitVector, DistributorError, HollowTrieDistributor, Identity, PrefixFreeBytes,
};

fn bits(s: &str) -> BitVector {
    s.chars().map(|c| c == '1').collect()
}

/// Random distinct prefix-free keys of 20 to 200 bits, sorted.
fn random_prefix_free_keys(n: usize, seed: u64) -> Vec<BitVector> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut candidates = std::collections::BTreeSet::new();
    while candidates.len() < n + n / 4 {
        let len = rng.gen_range(20..=200);
        let key: BitVector = (0..len).map(|_| rng.gen::<bool>()).collect();
        candidates.insert(key);
    }
    // Sorted order puts a prefix right before its extensions, so one backward
    // pass keeping only non-prefixes of the previously kept key suffices.
    let sorted: Vec<BitVector> = candidates.into_iter().collect();
    let mut keys = Vec::with_capacity(sorted.len());
    let mut kept: Option<&BitVector> = None;
    for key in sorted.iter().rev() {
        let is_prefix = kept.map_or(false, |next| key.longest_common_prefix(next) == key.len());
        if !is_prefix {
            keys.push(key.clone());
            kept = Some(key);
        }
    }
    keys.reverse();
    keys.truncate(n);
    assert_eq!(keys.len(), n, "not enough prefix-free keys generated");
    keys
}

#[test]
fn test_four_keys_two_buckets() {
    let keys = vec![bits("0001"), bits("0010"), bits("0100"), bits("1000")];
    let distributor = HollowTrieDistributor::new(&keys, 2, Identity).unwrap();
    let expected = [0, 0, 1, 1];
    for (key, &bucket) in keys.iter().zip(expected.iter()) {
        assert_eq!(distributor.get(key), bucket);
    }
    assert!(distributor.contains_key(&keys[0]));
}

#[test]
fn test_sixty_four_values_eight_buckets() {
    let keys: Vec<BitVector> = (0..64u64)
        .map(|i| {
            let mut v = BitVector::new();
            for shift in (0..6).rev() {
                v.push((i >> shift) & 1 == 1);
            }
            v.push(true); // sentinel enforcing prefix-freedom
            v
        })
        .collect();
    let distributor = HollowTrieDistributor::new(&keys, 8, Identity).unwrap();
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(distributor.get(key), (i / 8) as u64, "key {}", i);
    }
}

#[test]
fn test_random_keys_roundtrip() {
    let keys = random_prefix_free_keys(10_000, 0xDEC0DE);
    let distributor = HollowTrieDistributor::new(&keys, 16, Identity).unwrap();
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(distributor.get(key), (i / 16) as u64, "key {}", i);
    }
}

#[test]
fn test_bucket_indices_are_monotone() {
    let keys = random_prefix_free_keys(1000, 42);
    let bucket_size = 8;
    let distributor = HollowTrieDistributor::new(&keys, bucket_size, Identity).unwrap();
    let mut prev = 0;
    for (i, key) in keys.iter().enumerate() {
        let bucket = distributor.get(key);
        assert!(bucket >= prev, "bucket sequence must be non-decreasing");
        if i % bucket_size == 0 {
            assert_eq!(bucket, (i / bucket_size) as u64);
        }
        prev = bucket;
    }
}

#[test]
fn test_space_bound() {
    let keys = random_prefix_free_keys(10_000, 7);
    let n = keys.len() as f64;
    let avg_len = keys.iter().map(|k| k.len()).sum::<usize>() as f64 / n;
    let distributor = HollowTrieDistributor::new(&keys, 16, Identity).unwrap();
    // c1 * n * log2(avg_len / bucket_size) + c2 * n, with generous constants
    let bound = 16.0 * n * (avg_len / 16.0).log2() + 48.0 * n;
    assert!(
        (distributor.num_bits() as f64) < bound,
        "{} bits exceeds the space bound of {} bits",
        distributor.num_bits(),
        bound
    );
}

#[test]
fn test_deterministic_construction() {
    let keys = random_prefix_free_keys(2000, 99);
    let a = HollowTrieDistributor::new(&keys, 16, Identity).unwrap();
    let b = HollowTrieDistributor::new(&keys, 16, Identity).unwrap();
    assert_eq!(a.num_bits(), b.num_bits());
    assert_eq!(a.size(), b.size());
    for key in &keys {
        assert_eq!(a.get(key), b.get(key));
    }
}

#[test]
fn test_empty_input() {
    let keys: Vec<BitVector> = Vec::new();
    let distributor = HollowTrieDistributor::new(&keys, 4, Identity).unwrap();
    assert_eq!(distributor.size(), 0);
    assert_eq!(distributor.get(&bits("10110")), 0);
    assert_eq!(distributor.num_bits(), 0);
}

#[test]
fn test_fewer_keys_than_bucket() {
    // No delimiters at all: everything lands in bucket zero
    let keys = vec![bits("000"), bits("010"), bits("101")];
    let distributor = HollowTrieDistributor::new(&keys, 16, Identity).unwrap();
    assert_eq!(distributor.size(), 0);
    for key in &keys {
        assert_eq!(distributor.get(key), 0);
    }
}

#[test]
fn test_bucket_size_one() {
    let keys = vec![bits("000"), bits("011"), bits("100"), bits("111")];
    let distributor = HollowTrieDistributor::new(&keys, 1, Identity).unwrap();
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(distributor.get(key), i as u64);
    }
}

#[test]
fn test_duplicate_keys_rejected() {
    let keys = vec![bits("01"), bits("01")];
    assert!(matches!(
        HollowTrieDistributor::new(&keys, 2, Identity),
        Err(DistributorError::Duplicate { .. })
    ));
}

#[test]
fn test_unsorted_keys_rejected() {
    let keys = vec![bits("10"), bits("01")];
    assert!(matches!(
        HollowTrieDistributor::new(&keys, 2, Identity),
        Err(DistributorError::NotSorted { .. })
    ));
}

#[test]
fn test_prefix_keys_rejected() {
    let keys = vec![bits("01"), bits("010")];
    assert!(matches!(
        HollowTrieDistributor::new(&keys, 2, Identity),
        Err(DistributorError::NotPrefixFree { .. })
    ));
}

#[test]
fn test_explicit_temp_dir() {
    let dir = tempfile::tempdir().unwrap();
    let keys = random_prefix_free_keys(500, 3);
    let distributor =
        HollowTrieDistributor::with_temp_dir(&keys, 8, Identity, Some(dir.path())).unwrap();
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(distributor.get(key), (i / 8) as u64);
    }
    // Anonymous temp files leave nothing behind
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_string_keys_via_prefix_free_strategy() {
    let words = vec![
        "almond", "apple", "apricot", "banana", "cherry", "damson", "date", "elderberry", "fig",
        "grape", "kiwi", "lemon", "lime", "mango", "melon", "orange",
    ];
    let distributor = HollowTrieDistributor::new(&words, 4, PrefixFreeBytes).unwrap();
    for (i, word) in words.iter().enumerate() {
        assert_eq!(distributor.get(word), (i / 4) as u64, "word {}", word);
    }
}

#[test]
fn test_serde_roundtrip() {
    let keys = random_prefix_free_keys(300, 11);
    let distributor = HollowTrieDistributor::new(&keys, 8, Identity).unwrap();
    let json = serde_json::to_string(&distributor).unwrap();
    let restored: HollowTrieDistributor<BitVector, Identity> =
        serde_json::from_str(&json).unwrap();
    assert_eq!(restored.num_bits(), distributor.num_bits());
    for key in &keys {
        assert_eq!(restored.get(key), distributor.get(key));
    }
}
