//! Parallel batch merge
//!
//! A [`BatchMergeRange`] maps entry points (nodes of the canonical trie) to
//! the incoming sub-tries that will be merged there. Rayon splits ranges
//! recursively: first by handing whole entry points to the new range, then
//! by stealing. Stealing picks a child of the entry point, cuts every
//! pending sub-trie's part under that child out with
//! [`TrieNode::destructive_steal_child`], and gives the child to the new
//! range as an entry point. The donor bans the child so it never steals it
//! twice and never merges into it, which keeps concurrently executing
//! ranges on disjoint subtrees.
//!
//! A range merges at each entry point, then pushes the metadata delta down
//! from the root to the entry point, adding it at every node on the way.

use super::node::TrieNode;
use super::delete::Steal;
use super::policy::MergePolicy;
use crate::arena::{AllocCursor, Arena, CursorPool, NodeRef};
use crate::model::{Metadata, TrieKey, TrieValue, BRANCH_BITS};
use rayon::iter::ParallelIterator;
use std::collections::HashSet;
use tracing::{debug, trace};

pub(crate) struct BatchMergeRange<'a, K, V> {
    arena: &'a Arena<K, V>,
    root: NodeRef,
    cursors: &'a CursorPool,
    entry_points: Vec<(NodeRef, Vec<NodeRef>)>,
    /// Children of this range's entry points already given away
    banned: HashSet<NodeRef>,
    /// Leaves still pending in this range
    num_children: i64,
    split_threshold: i64,
}

impl<'a, K: TrieKey, V: TrieValue> BatchMergeRange<'a, K, V> {
    pub fn new(
        arena: &'a Arena<K, V>,
        root: NodeRef,
        cursors: &'a CursorPool,
        incoming: Vec<NodeRef>,
        split_threshold: i64,
    ) -> Self {
        let num_children = incoming
            .iter()
            .map(|at| TrieNode::new(arena, *at).size())
            .sum();
        BatchMergeRange {
            arena,
            root,
            cursors,
            entry_points: vec![(root, incoming)],
            banned: HashSet::new(),
            num_children,
            split_threshold,
        }
    }

    fn node(&self, at: NodeRef) -> TrieNode<'a, K, V> {
        TrieNode::new(self.arena, at)
    }

    fn empty_like(&self) -> Self {
        BatchMergeRange {
            arena: self.arena,
            root: self.root,
            cursors: self.cursors,
            entry_points: Vec::new(),
            banned: self.banned.clone(),
            num_children: 0,
            split_threshold: self.split_threshold,
        }
    }

    pub fn is_divisible(&self) -> bool {
        !self.entry_points.is_empty() && self.num_children >= self.split_threshold
    }

    pub fn num_children(&self) -> i64 {
        self.num_children
    }

    /// Divide this range in two for rayon
    pub fn split(mut self) -> (Self, Option<Self>) {
        if !self.is_divisible() {
            return (self, None);
        }
        let half = self.num_children / 2;
        let mut other = self.empty_like();

        while self.entry_points.len() > 1 && other.num_children < half {
            let Some((entry, pending)) = self.entry_points.pop() else {
                break;
            };
            let size: i64 = pending.iter().map(|at| self.node(*at).size()).sum();
            self.num_children -= size;
            other.num_children += size;
            other.entry_points.push((entry, pending));
        }

        if other.num_children < half && self.entry_points.len() == 1 {
            self.steal_into(&mut other, half);
        }

        if other.entry_points.is_empty() {
            return (self, None);
        }
        debug!(
            kept = self.num_children,
            given = other.num_children,
            entry_points = other.entry_points.len(),
            "split batch merge range"
        );
        (self, Some(other))
    }

    /// Move pending work under children of the sole entry point to `other`
    fn steal_into(&mut self, other: &mut Self, half: i64) {
        let arena = self.arena;
        let cursors = self.cursors;
        let mut theft_root = self.node(self.entry_points[0].0);

        let (children, prefix, prefix_len) = loop {
            let body = theft_root.lock();
            let children = match body.children() {
                Some(children) => children,
                None => return,
            };
            let open: Vec<u8> = children
                .bv
                .iter()
                .filter(|branch| !self.banned.contains(&children.slot(*branch)))
                .collect();
            match open.as_slice() {
                [] => return,
                [only] => {
                    let next = theft_root.at_slot(children, *only);
                    drop(body);
                    theft_root = next;
                }
                _ => break (children, body.prefix, body.prefix_len),
            }
        };

        let open: Vec<u8> = children
            .bv
            .iter()
            .filter(|branch| !self.banned.contains(&children.slot(*branch)))
            .collect();
        // the lowest open child always stays with the donor
        for branch in open.into_iter().skip(1).rev() {
            if other.num_children >= half {
                break;
            }
            let target = children.slot(branch);
            let mut stolen_prefix = prefix;
            stolen_prefix.set_branch_bits(prefix_len, branch);
            let steal_len = prefix_len + BRANCH_BITS;

            let mut pieces = Vec::new();
            let mut moved = 0;
            let pending = &mut self.entry_points[0].1;
            cursors.with_cursor(|cursor| {
                pending.retain(|at| {
                    let incoming = TrieNode::new(arena, *at);
                    match incoming.destructive_steal_child(cursor, &stolen_prefix, steal_len) {
                        Steal::Nothing => true,
                        Steal::Whole => {
                            moved += incoming.size();
                            pieces.push(*at);
                            false
                        }
                        Steal::Detached(piece, meta) => {
                            moved += meta.size;
                            pieces.push(piece);
                            true
                        }
                    }
                });
            });
            self.banned.insert(target);
            trace!(?target, pieces = pieces.len(), moved, "stole branch");
            if !pieces.is_empty() {
                self.num_children -= moved;
                other.num_children += moved;
                other.entry_points.push((target, pieces));
            }
        }
    }

    /// Merge every pending sub-trie at its entry point
    pub fn execute<M: MergePolicy<V>>(self, cursor: &mut AllocCursor) {
        let root = self.node(self.root);
        for (entry, pending) in self.entry_points {
            if pending.is_empty() {
                continue;
            }
            let node = TrieNode::new(self.arena, entry);
            let mut delta = Metadata::ZERO;
            for incoming in pending {
                delta += node.merge_from::<M>(cursor, TrieNode::new(self.arena, incoming));
            }
            if entry != self.root {
                root.propagate_metadata(entry, &delta);
            }
        }
    }

    /// Split with rayon and execute every piece on the worker it lands on
    pub fn run<M: MergePolicy<V>>(self) {
        let cursors = self.cursors;
        rayon::iter::split(self, BatchMergeRange::split)
            .for_each(|range| cursors.with_cursor(|cursor| range.execute::<M>(cursor)));
    }
}

impl<'a, K: TrieKey, V: TrieValue> TrieNode<'a, K, V> {
    /// Add `delta` to every node strictly between this root and `target`,
    /// invalidating their hashes. The path is found by the target's prefix.
    pub(crate) fn propagate_metadata(self, target: NodeRef, delta: &Metadata) {
        let target_prefix = TrieNode::new(self.arena(), target).lock().prefix;
        let mut node = self;
        while node.at() != target {
            let body = node.lock();
            body.check_live();
            let children = body.children().unwrap_or_else(|| {
                panic!("entry point {:?} not found below {}", target, body.describe())
            });
            if target_prefix.match_len(&body.prefix, body.prefix_len) < body.prefix_len {
                panic!("entry point {:?} not found below {}", target, body.describe());
            }
            let branch = target_prefix.branch_bits(body.prefix_len);
            if !children.bv.contains(branch) {
                panic!("entry point {:?} not found below {}", target, body.describe());
            }
            node.invalidate_hash();
            node.add_metadata(delta);
            node = node.at_slot(children, branch);
        }
    }
}
