//! Read-only traversals: lookups, ordered visits and integrity checks

use super::node::{Contents, TrieNode};
use crate::model::{Metadata, PrefixLenBits, TrieKey, TrieValue};
use std::cmp::Ordering;
use tracing::warn;

impl<'a, K: TrieKey, V: TrieValue> TrieNode<'a, K, V> {
    /// Follow `key` down to its leaf
    fn find<R>(self, key: &K, read: impl FnOnce(TrieNode<'a, K, V>, &V) -> R) -> Option<R> {
        let body = self.lock();
        body.check_live();
        match &body.contents {
            Contents::Value(value) if body.prefix == *key => Some(read(self, value)),
            Contents::Children(children) => {
                if key.match_len(&body.prefix, body.prefix_len) < body.prefix_len {
                    return None;
                }
                let branch = key.branch_bits(body.prefix_len);
                if !children.bv.contains(branch) {
                    return None;
                }
                let child = self.at_slot(*children, branch);
                drop(body);
                child.find(key, read)
            }
            _ => None,
        }
    }

    pub fn get_value(self, key: &K) -> Option<V> {
        self.find(key, |_, value| value.clone())
    }

    pub fn contains_key(self, key: &K) -> bool {
        self.find(key, |_, _| ()).is_some()
    }

    /// Whether the leaf under `key` carries a deletion mark
    pub fn is_marked_deleted(self, key: &K) -> Option<bool> {
        self.find(key, |leaf, _| leaf.metadata().num_deleted_subnodes > 0)
    }

    pub fn get_lowest_key(self) -> Option<K> {
        let body = self.lock();
        body.check_live();
        match &body.contents {
            Contents::Value(_) => Some(body.prefix),
            Contents::Children(children) => {
                let first = children.bv.iter().next()?;
                self.at_slot(*children, first).get_lowest_key()
            }
            _ => None,
        }
    }

    // === Ordered visits ===

    /// Visit every leaf in key order
    pub fn apply<F: FnMut(&K, &V)>(self, f: &mut F) {
        let body = self.lock();
        body.check_live();
        match &body.contents {
            Contents::Value(value) => f(&body.prefix, value),
            Contents::Children(children) => {
                for branch in children.bv.iter() {
                    self.at_slot(*children, branch).apply(f);
                }
            }
            _ => {}
        }
    }

    /// Visit, in key order, every leaf on the `keep` side of `bound`: below
    /// it when `keep` is `Less`, at or above it when `keep` is `Greater`.
    fn apply_bounded<F: FnMut(&K, &V)>(self, f: &mut F, bound: &K, keep: Ordering) {
        let body = self.lock();
        body.check_live();
        if body.is_cleared() {
            return;
        }
        let truncated = bound.truncated(body.prefix_len);
        match (body.prefix.cmp(&truncated), keep) {
            (Ordering::Less, Ordering::Less) | (Ordering::Greater, Ordering::Greater) => {
                drop(body);
                return self.apply(f);
            }
            (Ordering::Equal, _) => {}
            _ => return,
        }

        match &body.contents {
            Contents::Value(value) => {
                // exact match with the bound
                if keep == Ordering::Greater {
                    f(&body.prefix, value);
                }
            }
            Contents::Children(children) => {
                let split = bound.branch_bits(body.prefix_len);
                for branch in children.bv.iter() {
                    let child = self.at_slot(*children, branch);
                    match (branch.cmp(&split), keep) {
                        (Ordering::Equal, _) => child.apply_bounded(f, bound, keep),
                        (Ordering::Less, Ordering::Less) | (Ordering::Greater, Ordering::Greater) => {
                            child.apply(f)
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    /// Visit every leaf with key strictly below `bound`
    pub fn apply_lt_key<F: FnMut(&K, &V)>(self, f: &mut F, bound: &K) {
        self.apply_bounded(f, bound, Ordering::Less)
    }

    /// Visit every leaf with key at or above `bound`
    pub fn apply_geq_key<F: FnMut(&K, &V)>(self, f: &mut F, bound: &K) {
        self.apply_bounded(f, bound, Ordering::Greater)
    }

    pub fn accumulate_values(self, out: &mut Vec<V>) {
        self.apply(&mut |_, value: &V| out.push(value.clone()));
    }

    pub fn accumulate_keys(self, out: &mut Vec<K>) {
        self.apply(&mut |key: &K, _| out.push(*key));
    }

    /// Endowment held by leaves with key strictly below `max_key`
    pub fn endow_lt_key(self, max_key: &K) -> i64 {
        let body = self.lock();
        body.check_live();
        if body.is_cleared() {
            return 0;
        }
        match body.prefix.cmp(&max_key.truncated(body.prefix_len)) {
            Ordering::Less => return self.metadata().endow,
            Ordering::Greater => return 0,
            Ordering::Equal => {}
        }
        let children = match body.children() {
            Some(children) => children,
            None => return 0,
        };
        let split = max_key.branch_bits(body.prefix_len);
        children
            .bv
            .iter()
            .take_while(|branch| *branch <= split)
            .map(|branch| {
                let child = self.at_slot(children, branch);
                if branch < split {
                    child.metadata().endow
                } else {
                    child.endow_lt_key(max_key)
                }
            })
            .sum()
    }

    /// Metadata of every leaf whose first `len` bits are at or below those
    /// of `query`
    pub fn metadata_query(self, query: &K, len: PrefixLenBits) -> Metadata {
        let body = self.lock();
        body.check_live();
        if body.is_cleared() {
            return Metadata::ZERO;
        }
        let common = body.prefix_len.min(len);
        match body.prefix.truncated(common).cmp(&query.truncated(common)) {
            Ordering::Less => return self.metadata(),
            Ordering::Greater => return Metadata::ZERO,
            Ordering::Equal if body.prefix_len >= len => return self.metadata(),
            Ordering::Equal => {}
        }
        let children = match body.children() {
            Some(children) => children,
            None => return Metadata::ZERO,
        };
        let split = query.branch_bits(body.prefix_len);
        let mut out = Metadata::ZERO;
        for branch in children.bv.iter().take_while(|branch| *branch <= split) {
            let child = self.at_slot(children, branch);
            out += if branch < split {
                child.metadata()
            } else {
                child.metadata_query(query, len)
            };
        }
        out
    }

    /// Push a running total for every subtree cut at `len` bits, in key order
    pub fn metadata_traversal(
        self,
        len: PrefixLenBits,
        acc: &mut Metadata,
        out: &mut Vec<(K, Metadata)>,
    ) {
        let body = self.lock();
        body.check_live();
        if body.is_cleared() {
            return;
        }
        if body.prefix_len >= len {
            *acc += self.metadata();
            out.push((body.prefix.truncated(len), *acc));
            return;
        }
        if let Some(children) = body.children() {
            for branch in children.bv.iter() {
                self.at_slot(children, branch).metadata_traversal(len, acc, out);
            }
        }
    }

    // === Integrity checks ===

    /// Recompute every aggregate from the leaves and compare with what is
    /// stored. Requires exclusive access.
    pub fn check_metadata(self) -> bool {
        self.recompute_metadata().is_some()
    }

    fn recompute_metadata(self) -> Option<Metadata> {
        let body = self.lock();
        let stored = self.metadata();
        let expected = match &body.contents {
            Contents::Value(value) => {
                let marks_ok = (0..=1).contains(&stored.num_deleted_subnodes)
                    && (0..=1).contains(&stored.num_rollback_subnodes);
                if !marks_ok {
                    warn!(node = %body.describe(), ?stored, "leaf marks out of range");
                    return None;
                }
                Metadata {
                    num_deleted_subnodes: stored.num_deleted_subnodes,
                    num_rollback_subnodes: stored.num_rollback_subnodes,
                    ..Metadata::leaf(value)
                }
            }
            Contents::Children(children) => {
                let mut sum = Metadata::ZERO;
                for branch in children.bv.iter() {
                    sum += self.at_slot(*children, branch).recompute_metadata()?;
                }
                sum
            }
            Contents::Cleared => Metadata::ZERO,
            Contents::Stolen(_) => {
                warn!(node = %body.describe(), "reachable stolen node");
                return None;
            }
        };
        if expected != stored {
            warn!(node = %body.describe(), ?stored, ?expected, "metadata mismatch");
            return None;
        }
        Some(stored)
    }

    /// Check that this node heads a well-formed subtree: no reachable
    /// tombstones, no single-child branches, canonical prefixes and
    /// children that extend their parent's prefix.
    pub fn check_shape(self) -> bool {
        self.check_shape_below(None)
    }

    fn check_shape_below(self, parent: Option<(K, PrefixLenBits, u8)>) -> bool {
        let body = self.lock();
        let describe = || body.describe();
        if body.prefix != body.prefix.truncated(body.prefix_len) {
            warn!(node = %describe(), "prefix not truncated");
            return false;
        }
        if let Some((parent_prefix, parent_len, branch)) = parent {
            let extends = body.prefix.truncated(parent_len) == parent_prefix
                && body.prefix_len > parent_len
                && body.prefix.branch_bits(parent_len) == branch;
            if !extends {
                warn!(node = %describe(), "child does not extend its parent");
                return false;
            }
        }
        match &body.contents {
            Contents::Value(_) => body.prefix_len == K::key_len(),
            Contents::Cleared => parent.is_none() && body.prefix_len == PrefixLenBits::ZERO,
            Contents::Stolen(_) => {
                warn!(node = %describe(), "reachable stolen node");
                false
            }
            Contents::Children(children) => {
                if children.bv.len() < 2 || body.prefix_len >= K::key_len() {
                    warn!(node = %describe(), "malformed branch");
                    return false;
                }
                children.bv.iter().all(|branch| {
                    self.at_slot(*children, branch).check_shape_below(Some((
                        body.prefix,
                        body.prefix_len,
                        branch,
                    )))
                })
            }
        }
    }
}
