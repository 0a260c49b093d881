//! Data-parallel passes over one trie
//!
//! Each pass cuts the trie into a frontier of disjoint subtrees no larger
//! than a grain, runs on the frontier with rayon, then finishes the few
//! nodes above the frontier from the root.

use super::node::{Contents, TrieNode};
use crate::config::{HashMode, HashSettings};
use crate::model::{Metadata, TrieKey, TrieValue};
use rayon::prelude::*;
use tracing::debug;

impl<'a, K: TrieKey, V: TrieValue> TrieNode<'a, K, V> {
    /// Push, in key order, the roots of maximal subtrees holding at most
    /// `grain` leaves. Subtrees for which `wanted` is false are skipped.
    fn frontier<W>(self, grain: i64, wanted: &W, out: &mut Vec<Self>)
    where
        W: Fn(TrieNode<'a, K, V>) -> bool,
    {
        if !wanted(self) {
            return;
        }
        let body = self.lock();
        body.check_live();
        match body.children() {
            Some(children) if self.size() > grain => {
                for branch in children.bv.iter() {
                    self.at_slot(children, branch).frontier(grain, wanted, out);
                }
            }
            _ => out.push(self),
        }
    }

    /// Hash every stale subtree of at most `grain` leaves in parallel. A
    /// following `compute_hash` from this node only visits the nodes above.
    pub fn precompute_hashes_parallel(self, settings: HashSettings, grain: i64) {
        let live_only = settings.mode == HashMode::LiveOnly;
        let mut work = Vec::new();
        self.frontier(
            grain,
            &|node: TrieNode<'a, K, V>| {
                !node.hash_valid() && !(live_only && node.metadata().fully_deleted())
            },
            &mut work,
        );
        debug!(subtrees = work.len(), "hashing in parallel");
        work.par_iter().for_each(|node| {
            node.compute_hash(settings);
        });
    }

    /// Every value in key order, collected in parallel
    pub fn accumulate_values_parallel(self, grain: i64) -> Vec<V> {
        let mut work = Vec::new();
        self.frontier(grain, &|_| true, &mut work);
        let parts: Vec<Vec<V>> = work
            .par_iter()
            .map(|node| {
                let mut values = Vec::with_capacity(node.size().max(0) as usize);
                node.accumulate_values(&mut values);
                values
            })
            .collect();
        parts.into_iter().flatten().collect()
    }

    /// Apply `f` to every value in place. Keys and structure stay; hashes
    /// are invalidated and endowments follow the new values.
    pub fn parallel_batch_value_modify<F>(self, f: &F, grain: i64)
    where
        F: Fn(&mut V) + Sync,
    {
        let mut work = Vec::new();
        self.frontier(grain, &|_| true, &mut work);
        let deltas: Vec<Metadata> = work.par_iter().map(|node| node.modify_values(f)).collect();
        for (node, delta) in work.iter().zip(&deltas) {
            self.propagate_metadata(node.at(), delta);
        }
    }

    /// Serial body of `parallel_batch_value_modify`
    pub fn modify_values<F: Fn(&mut V)>(self, f: &F) -> Metadata {
        let mut body = self.lock();
        body.check_live();
        self.invalidate_hash();
        let delta = match &mut body.contents {
            Contents::Value(value) => {
                let before = value.endowment();
                f(value);
                Metadata {
                    endow: value.endowment() - before,
                    ..Metadata::ZERO
                }
            }
            Contents::Children(children) => {
                let children = *children;
                let mut delta = Metadata::ZERO;
                for branch in children.bv.iter() {
                    delta += self.at_slot(children, branch).modify_values(f);
                }
                delta
            }
            _ => Metadata::ZERO,
        };
        self.add_metadata(&delta);
        delta
    }

    /// `clear_rollback_marks` with the bulk of the work done in parallel
    pub fn clear_rollback_parallel(self, grain: i64) {
        let mut work = Vec::new();
        self.frontier(
            grain,
            &|node: TrieNode<'a, K, V>| node.metadata().num_rollback_subnodes != 0,
            &mut work,
        );
        work.par_iter().for_each(|node| node.clear_rollback_marks());
        self.clear_rollback_marks();
    }
}
