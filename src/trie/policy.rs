//! Insert and merge policies
//!
//! A policy decides what happens when a key is already present: the insert
//! policy folds an incoming input into the stored value, the merge policy
//! combines the values of two leaves with the same key when tries merge.
//! Both also decide the resulting leaf metadata.

use crate::model::{Metadata, TrieValue};

pub trait InsertPolicy<V: TrieValue> {
    /// What callers hand to `insert`
    type Input;

    /// Value for a key not yet present
    fn new_value(input: Self::Input) -> V;

    /// Combine `input` into the value already stored under the key
    fn fold(existing: &mut V, input: Self::Input);

    /// Metadata of a leaf holding `value` after an insert
    fn leaf_metadata(value: &V) -> Metadata {
        Metadata::leaf(value)
    }
}

/// Replace whatever is stored
pub struct OverwriteInsert;

impl<V: TrieValue> InsertPolicy<V> for OverwriteInsert {
    type Input = V;

    fn new_value(input: V) -> V {
        input
    }

    fn fold(existing: &mut V, input: V) {
        *existing = input;
    }
}

/// Overwrite and mark the leaf for rollback
pub struct RollbackInsert;

impl<V: TrieValue> InsertPolicy<V> for RollbackInsert {
    type Input = V;

    fn new_value(input: V) -> V {
        input
    }

    fn fold(existing: &mut V, input: V) {
        *existing = input;
    }

    fn leaf_metadata(value: &V) -> Metadata {
        Metadata {
            num_rollback_subnodes: 1,
            ..Metadata::leaf(value)
        }
    }
}

pub trait MergePolicy<V: TrieValue> {
    /// Combine the incoming value into the receiver's
    fn merge_values(main: &mut V, incoming: V);

    /// Metadata of the merged leaf. Marks follow the incoming leaf.
    fn merged_metadata(incoming: &Metadata, merged: &V) -> Metadata {
        Metadata {
            num_deleted_subnodes: incoming.num_deleted_subnodes,
            num_rollback_subnodes: incoming.num_rollback_subnodes,
            ..Metadata::leaf(merged)
        }
    }
}

/// The incoming trie wins
pub struct OverwriteMerge;

impl<V: TrieValue> MergePolicy<V> for OverwriteMerge {
    fn merge_values(main: &mut V, incoming: V) {
        *main = incoming;
    }
}
