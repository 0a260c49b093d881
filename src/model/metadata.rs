//! Commutative subtree aggregates
//!
//! A branch's metadata is the sum of its children's; a leaf's is a function
//! of its value plus its marks. Mutations never recompute a subtree: they
//! return the delta they caused and every ancestor adds it.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::sync::atomic::{AtomicI64, Ordering};

use super::TrieValue;

/// Subtree aggregates: leaf count, deletion marks, rollback marks and
/// endowment sum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Metadata {
    pub size: i64,
    pub num_deleted_subnodes: i64,
    pub num_rollback_subnodes: i64,
    pub endow: i64,
}

impl Metadata {
    pub const ZERO: Metadata = Metadata {
        size: 0,
        num_deleted_subnodes: 0,
        num_rollback_subnodes: 0,
        endow: 0,
    };

    /// Metadata of an unmarked leaf holding `value`
    pub fn leaf<V: TrieValue>(value: &V) -> Self {
        Metadata {
            size: 1,
            endow: value.endowment(),
            ..Metadata::ZERO
        }
    }

    /// Leaves not marked for deletion
    pub fn live_size(&self) -> i64 {
        self.size - self.num_deleted_subnodes
    }

    /// True when every leaf below is marked for deletion
    pub fn fully_deleted(&self) -> bool {
        self.size == self.num_deleted_subnodes
    }

    pub fn is_zero(&self) -> bool {
        *self == Metadata::ZERO
    }
}

impl Add for Metadata {
    type Output = Metadata;

    fn add(mut self, rhs: Metadata) -> Metadata {
        self += rhs;
        self
    }
}

impl AddAssign for Metadata {
    fn add_assign(&mut self, rhs: Metadata) {
        self.size += rhs.size;
        self.num_deleted_subnodes += rhs.num_deleted_subnodes;
        self.num_rollback_subnodes += rhs.num_rollback_subnodes;
        self.endow += rhs.endow;
    }
}

impl Sub for Metadata {
    type Output = Metadata;

    fn sub(mut self, rhs: Metadata) -> Metadata {
        self -= rhs;
        self
    }
}

impl SubAssign for Metadata {
    fn sub_assign(&mut self, rhs: Metadata) {
        self.size -= rhs.size;
        self.num_deleted_subnodes -= rhs.num_deleted_subnodes;
        self.num_rollback_subnodes -= rhs.num_rollback_subnodes;
        self.endow -= rhs.endow;
    }
}

impl Neg for Metadata {
    type Output = Metadata;

    fn neg(self) -> Metadata {
        Metadata::ZERO - self
    }
}

/// Per-node metadata shared between concurrent merges.
///
/// `add`/`sub` commute, so sibling subtrees merged on different threads can
/// push deltas through a common ancestor in any order. Whole-value reads
/// (`peek`) and overwrites (`store`) are only meaningful while the caller
/// holds the node exclusively.
#[derive(Debug, Default)]
pub struct AtomicMetadata {
    size: AtomicI64,
    num_deleted_subnodes: AtomicI64,
    num_rollback_subnodes: AtomicI64,
    endow: AtomicI64,
}

impl AtomicMetadata {
    pub fn new(value: Metadata) -> Self {
        let out = AtomicMetadata::default();
        out.store(value);
        out
    }

    pub fn add(&self, delta: &Metadata) {
        self.size.fetch_add(delta.size, Ordering::Relaxed);
        self.num_deleted_subnodes
            .fetch_add(delta.num_deleted_subnodes, Ordering::Relaxed);
        self.num_rollback_subnodes
            .fetch_add(delta.num_rollback_subnodes, Ordering::Relaxed);
        self.endow.fetch_add(delta.endow, Ordering::Relaxed);
    }

    pub fn sub(&self, delta: &Metadata) {
        self.add(&-*delta);
    }

    /// Unsynchronized snapshot
    pub fn peek(&self) -> Metadata {
        Metadata {
            size: self.size.load(Ordering::Relaxed),
            num_deleted_subnodes: self.num_deleted_subnodes.load(Ordering::Relaxed),
            num_rollback_subnodes: self.num_rollback_subnodes.load(Ordering::Relaxed),
            endow: self.endow.load(Ordering::Relaxed),
        }
    }

    pub fn store(&self, value: Metadata) {
        self.size.store(value.size, Ordering::Relaxed);
        self.num_deleted_subnodes
            .store(value.num_deleted_subnodes, Ordering::Relaxed);
        self.num_rollback_subnodes
            .store(value.num_rollback_subnodes, Ordering::Relaxed);
        self.endow.store(value.endow, Ordering::Relaxed);
    }

    pub fn size(&self) -> i64 {
        self.size.load(Ordering::Relaxed)
    }

    /// Flip a leaf's deletion mark from 0 to 1. False if already marked.
    pub fn try_mark_deleted(&self) -> bool {
        self.num_deleted_subnodes
            .compare_exchange(0, 1, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    /// Flip a leaf's deletion mark from 1 to 0. False if not marked.
    pub fn try_unmark_deleted(&self) -> bool {
        self.num_deleted_subnodes
            .compare_exchange(1, 0, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    pub fn clear_deleted(&self) {
        self.num_deleted_subnodes.store(0, Ordering::Relaxed);
    }

    pub fn clear_rollback(&self) {
        self.num_rollback_subnodes.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(size: i64, deleted: i64, rollback: i64, endow: i64) -> Metadata {
        Metadata {
            size,
            num_deleted_subnodes: deleted,
            num_rollback_subnodes: rollback,
            endow,
        }
    }

    #[test]
    fn test_metadata_arithmetic() {
        let a = meta(3, 1, 0, 100);
        let b = meta(2, 0, 2, -40);
        assert_eq!(a + b, meta(5, 1, 2, 60));
        assert_eq!(a - b, meta(1, 1, -2, 140));
        assert_eq!(-a, meta(-3, -1, 0, -100));
        assert_eq!(a + b - b, a);
        assert!((a - a).is_zero());
        assert_eq!(a.live_size(), 2);
    }

    #[test]
    fn test_leaf_metadata() {
        let m = Metadata::leaf(&42u64);
        assert_eq!(m, meta(1, 0, 0, 0));
        assert!(!m.fully_deleted());
    }

    #[test]
    fn test_atomic_metadata_add_sub() {
        let m = AtomicMetadata::new(meta(1, 0, 0, 5));
        m.add(&meta(2, 1, 1, 10));
        assert_eq!(m.peek(), meta(3, 1, 1, 15));
        m.sub(&meta(1, 1, 0, 5));
        assert_eq!(m.peek(), meta(2, 0, 1, 10));
        assert_eq!(m.size(), 2);
    }

    #[test]
    fn test_atomic_metadata_deletion_flag() {
        let m = AtomicMetadata::new(meta(1, 0, 0, 0));
        assert!(m.try_mark_deleted());
        assert!(!m.try_mark_deleted());
        assert!(m.peek().fully_deleted());
        assert!(m.try_unmark_deleted());
        assert!(!m.try_unmark_deleted());
    }

    #[test]
    fn test_atomic_metadata_concurrent_adds_commute() {
        let m = AtomicMetadata::default();
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        m.add(&meta(1, 0, 1, 3));
                    }
                });
            }
        });
        assert_eq!(m.peek(), meta(4000, 0, 4000, 12000));
    }
}
