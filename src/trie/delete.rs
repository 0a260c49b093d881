//! Removal: destructive deletes, deletion and rollback marks, subtree theft
//!
//! Every pass has the same shape. A node learns from its child whether the
//! child emptied itself and what metadata delta it caused, drops emptied
//! children, adds the delta, and collapses if it is left with one child.

use super::node::{Children, Contents, NodeBody, TrieNode};
use crate::arena::{AllocCursor, NodeRef};
use crate::model::{Metadata, PrefixLenBits, TrieKey, TrieValue};
use tracing::trace;

/// What a removal pass did to a subtree
pub(crate) struct Removal<V> {
    /// The subtree has no leaves left; its parent must drop it
    pub emptied: bool,
    pub value: Option<V>,
    pub delta: Metadata,
}

impl<V> Removal<V> {
    fn none() -> Self {
        Removal {
            emptied: false,
            value: None,
            delta: Metadata::ZERO,
        }
    }
}

/// Outcome of asking an incoming trie to give up the subtree under a prefix
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Steal {
    /// Nothing lives under the prefix
    Nothing,
    /// The whole node asked lives under the prefix
    Whole,
    /// A subtree was cut out; it heads the returned cell
    Detached(NodeRef, Metadata),
}

fn marks_deleted(meta: &Metadata) -> i64 {
    meta.num_deleted_subnodes
}

fn marks_rollback(meta: &Metadata) -> i64 {
    meta.num_rollback_subnodes
}

impl<'a, K: TrieKey, V: TrieValue> TrieNode<'a, K, V> {
    /// Write `children` back and restore the shape invariant. True when no
    /// children are left and the node is now empty.
    fn settle(self, body: &mut NodeBody<K, V>, children: Children) -> bool {
        body.contents = Contents::Children(children);
        match children.bv.len() {
            0 => {
                *body = NodeBody::default();
                self.store_metadata(Metadata::ZERO);
                true
            }
            1 => {
                trace!(node = %body.describe(), "collapsing single-child branch");
                self.pull_up_single_child(body);
                false
            }
            _ => false,
        }
    }

    /// Empty a leaf, handing back its value and the negated metadata
    fn clear_leaf(self, body: &mut NodeBody<K, V>) -> Removal<V> {
        let meta = self.metadata();
        let value = match std::mem::take(body).contents {
            Contents::Value(value) => Some(value),
            _ => None,
        };
        self.store_metadata(Metadata::ZERO);
        Removal {
            emptied: true,
            value,
            delta: -meta,
        }
    }

    // === Destructive delete ===

    pub fn perform_deletion(self, key: &K) -> Removal<V> {
        let mut body = self.lock();
        body.check_live();
        if body.is_cleared() {
            return Removal::none();
        }
        if body.is_leaf() {
            if body.prefix != *key {
                return Removal::none();
            }
            self.invalidate_hash();
            return self.clear_leaf(&mut body);
        }

        if key.match_len(&body.prefix, body.prefix_len) < body.prefix_len {
            return Removal::none();
        }
        let mut children = body.expect_children();
        let branch = key.branch_bits(body.prefix_len);
        if !children.bv.contains(branch) {
            return Removal::none();
        }
        let removal = self.at_slot(children, branch).perform_deletion(key);
        if removal.value.is_none() {
            return removal;
        }
        self.invalidate_hash();
        self.add_metadata(&removal.delta);
        if removal.emptied {
            children.bv.remove(branch);
        }
        Removal {
            emptied: self.settle(&mut body, children),
            ..removal
        }
    }

    // === Deletion marks ===

    /// Mark the leaf under `key`. Returns its value only if the mark was
    /// newly set.
    pub fn mark_for_deletion(self, key: &K) -> Option<V> {
        self.flip_deleted(key, true)
    }

    /// Clear the mark on the leaf under `key`. Returns its value only if a
    /// mark was actually cleared.
    pub fn unmark_for_deletion(self, key: &K) -> Option<V> {
        self.flip_deleted(key, false)
    }

    fn flip_deleted(self, key: &K, mark: bool) -> Option<V> {
        let body = self.lock();
        body.check_live();
        let out = match &body.contents {
            Contents::Value(value) => {
                if body.prefix != *key {
                    return None;
                }
                let flipped = if mark {
                    self.meta().try_mark_deleted()
                } else {
                    self.meta().try_unmark_deleted()
                };
                if !flipped {
                    return None;
                }
                Some(value.clone())
            }
            Contents::Children(children) => {
                if key.match_len(&body.prefix, body.prefix_len) < body.prefix_len {
                    return None;
                }
                let branch = key.branch_bits(body.prefix_len);
                if !children.bv.contains(branch) {
                    return None;
                }
                let out = self.at_slot(*children, branch).flip_deleted(key, mark)?;
                self.add_metadata(&Metadata {
                    num_deleted_subnodes: if mark { 1 } else { -1 },
                    ..Metadata::ZERO
                });
                Some(out)
            }
            _ => return None,
        };
        self.invalidate_hash();
        out
    }

    /// Mark every leaf below this node. Returns the number of new marks.
    pub fn mark_entire_subtree(self) -> i64 {
        let body = self.lock();
        body.check_live();
        let marked = match &body.contents {
            Contents::Value(_) => i64::from(self.meta().try_mark_deleted()),
            Contents::Children(children) => {
                let mut marked = 0;
                for branch in children.bv.iter() {
                    let child = self.at_slot(*children, branch);
                    if !child.metadata().fully_deleted() {
                        marked += child.mark_entire_subtree();
                    }
                }
                self.add_metadata(&Metadata {
                    num_deleted_subnodes: marked,
                    ..Metadata::ZERO
                });
                marked
            }
            _ => 0,
        };
        if marked > 0 {
            self.invalidate_hash();
        }
        marked
    }

    /// Mark every leaf whose key is strictly below `max_key`. Returns the
    /// number of new marks.
    pub fn mark_subtree_lt_key(self, max_key: &K) -> i64 {
        let body = self.lock();
        body.check_live();
        if body.is_cleared() {
            return 0;
        }
        let bound = max_key.truncated(body.prefix_len);
        if body.prefix < bound {
            drop(body);
            return self.mark_entire_subtree();
        }
        if body.prefix > bound || body.is_leaf() {
            return 0;
        }

        let children = body.expect_children();
        let split = max_key.branch_bits(body.prefix_len);
        let mut marked = 0;
        for branch in children.bv.iter().take_while(|b| *b <= split) {
            let child = self.at_slot(children, branch);
            marked += if branch < split {
                child.mark_entire_subtree()
            } else {
                child.mark_subtree_lt_key(max_key)
            };
        }
        if marked > 0 {
            self.invalidate_hash();
            self.add_metadata(&Metadata {
                num_deleted_subnodes: marked,
                ..Metadata::ZERO
            });
        }
        marked
    }

    /// Drop every deletion mark below this node
    pub fn clear_deletion_marks(self) {
        self.clear_marks(marks_deleted, |node| node.meta().clear_deleted());
    }

    /// Drop every rollback mark below this node
    pub fn clear_rollback_marks(self) {
        self.clear_marks(marks_rollback, |node| node.meta().clear_rollback());
    }

    fn clear_marks(self, count: fn(&Metadata) -> i64, clear: fn(TrieNode<'a, K, V>)) {
        let body = self.lock();
        if count(&self.metadata()) == 0 {
            return;
        }
        self.invalidate_hash();
        clear(self);
        if let Some(children) = body.children() {
            for branch in children.bv.iter() {
                self.at_slot(children, branch).clear_marks(count, clear);
            }
        }
    }

    // === Sweeps ===

    /// Remove every leaf carrying a deletion mark, reporting each to
    /// `on_removed`
    pub fn sweep_marked_deletions<F>(self, on_removed: &mut F) -> Removal<V>
    where
        F: FnMut(&K, &V),
    {
        self.sweep(marks_deleted, on_removed)
    }

    /// Remove every leaf inserted under the rollback policy
    pub fn sweep_rollback(self) -> Removal<V> {
        self.sweep(marks_rollback, &mut |_: &K, _: &V| {})
    }

    fn sweep<F>(self, count: fn(&Metadata) -> i64, on_removed: &mut F) -> Removal<V>
    where
        F: FnMut(&K, &V),
    {
        let mut body = self.lock();
        body.check_live();
        if count(&self.metadata()) == 0 {
            return Removal::none();
        }
        self.invalidate_hash();
        if let Contents::Value(value) = &body.contents {
            on_removed(&body.prefix, value);
            let removal = self.clear_leaf(&mut body);
            return Removal { value: None, ..removal };
        }

        let mut children = body.expect_children();
        let mut delta = Metadata::ZERO;
        for branch in children.bv.iter() {
            let child = self.at_slot(children, branch);
            if count(&child.metadata()) == 0 {
                continue;
            }
            let removal = child.sweep(count, on_removed);
            delta += removal.delta;
            if removal.emptied {
                children.bv.remove(branch);
            }
        }
        self.add_metadata(&delta);
        Removal {
            emptied: self.settle(&mut body, children),
            value: None,
            delta,
        }
    }

    // === Theft and splits ===

    /// Cut the subtree holding every key that starts with the first `len`
    /// bits of `prefix` out of this (incoming, not yet merged) trie.
    ///
    /// A detached subtree is moved into a fresh cell from `cursor` first. Its
    /// old slot stays in this trie's child block, which a later merge may
    /// adopt and reuse while the detached piece is still pending.
    pub(crate) fn destructive_steal_child(
        self,
        cursor: &mut AllocCursor,
        prefix: &K,
        len: PrefixLenBits,
    ) -> Steal {
        let mut body = self.lock();
        body.check_live();
        if body.is_cleared() {
            return Steal::Nothing;
        }
        let compare = body.prefix_len.min(len);
        if body.prefix.match_len(prefix, compare) < compare {
            return Steal::Nothing;
        }
        if body.prefix_len >= len {
            return Steal::Whole;
        }

        let mut children = body.expect_children();
        let branch = prefix.branch_bits(body.prefix_len);
        if !children.bv.contains(branch) {
            return Steal::Nothing;
        }
        let child = self.at_slot(children, branch);
        let (at, meta) = match child.destructive_steal_child(cursor, prefix, len) {
            Steal::Nothing => return Steal::Nothing,
            Steal::Whole => {
                let meta = child.metadata();
                let fresh = self.arena().allocate(cursor, 1);
                child.relocate(fresh);
                children.bv.remove(branch);
                (fresh, meta)
            }
            Steal::Detached(at, meta) => (at, meta),
        };
        self.invalidate_hash();
        self.sub_metadata(&meta);
        if self.settle(&mut body, children) {
            panic!("steal emptied node {:?}", self.at());
        }
        Steal::Detached(at, meta)
    }

    /// Detach the lowest-keyed subtrees whose endowments sum to at most
    /// `threshold`, appending their roots to `out` in key order. Returns the
    /// metadata removed.
    pub(crate) fn endow_split(self, threshold: i64, out: &mut Vec<NodeRef>) -> Metadata {
        let mut body = self.lock();
        body.check_live();
        let mut children = match body.children() {
            Some(children) => children,
            None => return Metadata::ZERO,
        };
        if threshold >= self.metadata().endow {
            panic!(
                "endowment split of {} reached node {:?} it should have consumed whole",
                threshold,
                self.at()
            );
        }
        self.invalidate_hash();

        let mut acc = 0;
        let mut removed = Metadata::ZERO;
        for branch in children.bv.iter() {
            let child = self.at_slot(children, branch);
            let meta = child.metadata();
            if acc + meta.endow <= threshold {
                children.bv.remove(branch);
                out.push(child.at());
                removed += meta;
            } else {
                removed += child.endow_split(threshold - acc, out);
            }
            acc += meta.endow;
            if acc >= threshold {
                break;
            }
        }
        self.sub_metadata(&removed);
        if self.settle(&mut body, children) {
            panic!("endowment split emptied node {:?}", self.at());
        }
        removed
    }
}
