//! Property tests for trie contents, commitments and merging
//!
//! Every property compares the trie against a `BTreeMap` model or against a
//! trie built a different way from the same contents.

use ledger_trie::{AccountId, AccountTrie, Endowed, Hash, MerkleTrie, TrieConfig};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

fn new_trie<V: ledger_trie::TrieValue>() -> AccountTrie<V> {
    MerkleTrie::new(TrieConfig::compact()).unwrap()
}

/// Root of a trie holding exactly `contents`, inserted in key order
fn reference_root(contents: &BTreeMap<u64, u64>) -> Hash {
    let trie = new_trie();
    for (k, v) in contents {
        trie.insert(AccountId(*k), *v);
    }
    trie.freeze_and_hash()
}

/// Keys that mix random values with long shared prefixes and dense low bits
fn key() -> impl Strategy<Value = u64> {
    prop_oneof![
        any::<u64>(),
        (0u64..4096).prop_map(|k| k << 20),
        any::<u16>().prop_map(u64::from),
    ]
}

/// Keys packed into a few dense clusters, so shards collide deep in the trie
fn clustered_key() -> impl Strategy<Value = u64> {
    (0u64..4, 0u64..4, any::<u16>()).prop_map(|(top, mid, low)| {
        (top << 60) | (mid << 36) | u64::from(low % 512)
    })
}

fn shard_value(k: u64) -> u64 {
    k.rotate_left(13) ^ 0x5555
}

#[derive(Clone, Debug)]
enum Op {
    Insert(u64, u64),
    Delete(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (key(), any::<u64>()).prop_map(|(k, v)| Op::Insert(k, v)),
        1 => key().prop_map(Op::Delete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn trie_matches_model(ops in prop::collection::vec(op(), 0..400)) {
        let trie = new_trie();
        let mut model = BTreeMap::new();
        for op in &ops {
            match *op {
                Op::Insert(k, v) => {
                    trie.insert(AccountId(k), v);
                    model.insert(k, v);
                }
                Op::Delete(k) => {
                    prop_assert_eq!(trie.perform_deletion(&AccountId(k)), model.remove(&k));
                }
            }
        }

        prop_assert_eq!(trie.size(), model.len() as i64);
        let keys: Vec<u64> = trie.accumulate_keys().into_iter().map(|k| k.0).collect();
        prop_assert_eq!(keys, model.keys().copied().collect::<Vec<_>>());
        prop_assert_eq!(trie.accumulate_values(), model.values().copied().collect::<Vec<_>>());
        prop_assert_eq!(trie.get_lowest_key().map(|k| k.0), model.keys().next().copied());
        prop_assert!(trie.metadata_integrity_check());
        prop_assert!(trie.shape_integrity_check());

        // the root depends on contents only, not on history
        prop_assert_eq!(trie.freeze_and_hash(), reference_root(&model));
    }

    #[test]
    fn insertion_order_does_not_matter(
        contents in prop::collection::btree_map(key(), any::<u64>(), 0..300),
        seed in any::<u64>(),
    ) {
        let mut shuffled: Vec<(u64, u64)> = contents.iter().map(|(k, v)| (*k, *v)).collect();
        shuffled.sort_by_key(|(k, _)| k.wrapping_mul(seed | 1).rotate_left(17));

        let trie = new_trie();
        for (k, v) in shuffled {
            trie.insert(AccountId(k), v);
        }
        prop_assert_eq!(trie.freeze_and_hash(), reference_root(&contents));
        prop_assert_eq!(trie.hash_serial(), trie.freeze_and_hash());
    }

    #[test]
    fn batch_merge_matches_serial_insert(
        base in prop::collection::btree_map(key(), any::<u64>(), 0..200),
        incoming in prop::collection::btree_map(key(), any::<u64>(), 0..600),
        shards in 1usize..8,
    ) {
        let trie = new_trie();
        for (k, v) in &base {
            trie.insert(AccountId(*k), *v);
        }
        let serials: Vec<_> = (0..shards)
            .map(|shard| {
                let mut serial = trie.open_serial_subsidiary();
                for (k, v) in incoming.iter().skip(shard).step_by(shards) {
                    serial.insert(AccountId(*k), *v);
                }
                serial
            })
            .collect();
        trie.batch_merge_in(serials);

        let mut expected = base.clone();
        expected.extend(incoming.iter().map(|(k, v)| (*k, *v)));
        prop_assert_eq!(trie.size(), expected.len() as i64);
        prop_assert!(trie.metadata_integrity_check());
        prop_assert!(trie.shape_integrity_check());
        prop_assert_eq!(trie.freeze_and_hash(), reference_root(&expected));
    }

    #[test]
    fn batch_merge_with_deep_splitting_matches_model(
        base in prop::collection::btree_map(clustered_key(), any::<u64>(), 0..300),
        shards in prop::collection::vec(
            prop::collection::btree_set(clustered_key(), 0..400),
            1..12,
        ),
        split_threshold in 1i64..=20,
    ) {
        let config = TrieConfig {
            buffer_size: 1 << 12,
            batch_split_threshold: split_threshold,
            ..TrieConfig::default()
        };
        let trie: AccountTrie<u64> = MerkleTrie::new(config).unwrap();
        for (k, v) in &base {
            trie.insert(AccountId(*k), *v);
        }
        // shards overlap, so a key's value must not depend on which shard lands last
        let serials: Vec<_> = shards
            .iter()
            .map(|keys| {
                let mut serial = trie.open_serial_subsidiary();
                for k in keys {
                    serial.insert(AccountId(*k), shard_value(*k));
                }
                serial
            })
            .collect();
        trie.batch_merge_in(serials);

        let mut model = base.clone();
        for k in shards.iter().flatten() {
            model.insert(*k, shard_value(*k));
        }
        prop_assert!(trie.metadata_integrity_check());
        prop_assert!(trie.shape_integrity_check());
        prop_assert_eq!(trie.size(), model.len() as i64);
        let keys: Vec<u64> = trie.accumulate_keys().into_iter().map(|k| k.0).collect();
        prop_assert_eq!(keys, model.keys().copied().collect::<Vec<_>>());
        prop_assert_eq!(trie.accumulate_values(), model.values().copied().collect::<Vec<_>>());
        prop_assert_eq!(trie.freeze_and_hash(), reference_root(&model));
    }

    #[test]
    fn marked_deletions_remove_exactly_the_marked(
        contents in prop::collection::btree_map(key(), any::<u64>(), 1..300),
        mask in any::<u64>(),
    ) {
        let trie = new_trie();
        for (k, v) in &contents {
            trie.insert(AccountId(*k), *v);
        }
        let marked: BTreeSet<u64> = contents
            .keys()
            .enumerate()
            .filter(|(i, _)| mask.rotate_left(*i as u32) & 1 == 1)
            .map(|(_, k)| *k)
            .collect();
        for k in &marked {
            prop_assert!(trie.mark_for_deletion(&AccountId(*k)).is_some());
        }
        let mut remaining = contents.clone();
        remaining.retain(|k, _| !marked.contains(k));

        // marked leaves are already invisible to the commitment
        prop_assert_eq!(trie.live_size(), remaining.len() as i64);
        prop_assert_eq!(trie.freeze_and_hash(), reference_root(&remaining));

        let mut removed = Vec::new();
        trie.perform_marked_deletions(|k, _| removed.push(k.0));
        prop_assert_eq!(removed, marked.iter().copied().collect::<Vec<_>>());
        prop_assert_eq!(trie.size(), remaining.len() as i64);
        prop_assert!(trie.shape_integrity_check());
        prop_assert_eq!(trie.freeze_and_hash(), reference_root(&remaining));
    }

    #[test]
    fn rollback_removes_exactly_rollback_inserts(
        base in prop::collection::btree_map(key(), any::<u64>(), 0..200),
        extra in prop::collection::btree_map(key(), any::<u64>(), 0..200),
    ) {
        let trie = new_trie();
        for (k, v) in &base {
            trie.insert(AccountId(*k), *v);
        }
        for (k, v) in extra.iter().filter(|(k, _)| !base.contains_key(k)) {
            trie.insert_rollback(AccountId(*k), *v);
        }
        trie.do_rollback();
        prop_assert_eq!(trie.size(), base.len() as i64);
        prop_assert!(trie.metadata_integrity_check());
        prop_assert_eq!(trie.freeze_and_hash(), reference_root(&base));
    }

    #[test]
    fn endow_split_takes_a_key_prefix(
        contents in prop::collection::btree_map(key(), 1i64..100, 1..300),
        fraction in 0.0f64..=1.0,
    ) {
        let trie = new_trie::<Endowed<u64>>();
        for (k, endow) in &contents {
            trie.insert(AccountId(*k), Endowed { endow: *endow, value: *k });
        }
        let total: i64 = contents.values().sum();
        let threshold = (total as f64 * fraction) as i64;

        let split = trie.endow_split(threshold).unwrap();
        let moved = split.metadata().endow;
        prop_assert!(moved <= threshold);
        prop_assert_eq!(moved + trie.metadata().endow, total);
        prop_assert_eq!(split.size() + trie.size(), contents.len() as i64);

        let taken = split.accumulate_keys();
        let kept = trie.accumulate_keys();
        if let (Some(last_taken), Some(first_kept)) = (taken.last(), kept.first()) {
            prop_assert!(last_taken < first_kept);
        }
        prop_assert!(split.metadata_integrity_check());
        prop_assert!(trie.metadata_integrity_check());
        prop_assert!(trie.shape_integrity_check());
    }
}
