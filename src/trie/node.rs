//! Arena-resident trie nodes
//!
//! A node is a [`NodeCell`] in the arena. Its prefix and contents sit behind
//! a per-node lock; its metadata is atomic so that concurrent merges below a
//! shared ancestor can push deltas through it; its cached hash is guarded by
//! a validity latch.
//!
//! Branches own a contiguous block of [`BRANCH_FACTOR`] cells: the child for
//! selector `b` always lives at `base + b`. Adopting a subtree built elsewhere
//! moves the subtree root's contents into the slot and leaves a `Stolen`
//! tombstone at the old cell; the rest of the subtree stays where it is.

use crate::arena::{AllocCursor, Arena, NodeRef};
use crate::model::{AtomicMetadata, Hash, Metadata, PrefixLenBits, TrieKey, TrieValue, BRANCH_FACTOR};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};

/// Occupancy bitvector of a branch; bit `b` set iff selector `b` has a child
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BranchVector(u16);

impl BranchVector {
    pub const EMPTY: BranchVector = BranchVector(0);

    pub fn from_bits(bits: u16) -> Self {
        BranchVector(bits)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, branch: u8) -> bool {
        self.0 & (1 << branch) != 0
    }

    pub fn insert(&mut self, branch: u8) {
        self.0 |= 1 << branch;
    }

    pub fn remove(&mut self, branch: u8) {
        self.0 &= !(1 << branch);
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of occupied selectors below `branch`; the index of `branch`'s
    /// hash in an ascending hash list.
    pub fn rank(self, branch: u8) -> usize {
        (self.0 & ((1u32 << branch) - 1) as u16).count_ones() as usize
    }

    /// Occupied selectors in ascending order
    pub fn iter(self) -> impl Iterator<Item = u8> {
        (0..BRANCH_FACTOR as u8).filter(move |b| self.contains(*b))
    }

    pub fn to_be_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

/// Children of a branch: a 16-slot block plus its occupancy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Children {
    pub base: NodeRef,
    pub bv: BranchVector,
}

impl Children {
    pub fn slot(&self, branch: u8) -> NodeRef {
        self.base.slot(branch)
    }
}

pub(crate) enum Contents<V> {
    Value(V),
    Children(Children),
    /// Contents moved to another cell
    Stolen(NodeRef),
    /// No contents: an empty root or a never-used cell
    Cleared,
}

pub(crate) struct NodeBody<K, V> {
    pub prefix: K,
    pub prefix_len: PrefixLenBits,
    pub contents: Contents<V>,
    pub hash: Hash,
}

impl<K: Default, V> Default for NodeBody<K, V> {
    fn default() -> Self {
        NodeBody {
            prefix: K::default(),
            prefix_len: PrefixLenBits::ZERO,
            contents: Contents::Cleared,
            hash: Hash::ZERO,
        }
    }
}

impl<K: TrieKey, V> NodeBody<K, V> {
    pub fn leaf(key: K, value: V) -> Self {
        NodeBody {
            prefix: key,
            prefix_len: K::key_len(),
            contents: Contents::Value(value),
            hash: Hash::ZERO,
        }
    }

    pub fn branch(prefix: K, prefix_len: PrefixLenBits, children: Children) -> Self {
        NodeBody {
            prefix: prefix.truncated(prefix_len),
            prefix_len,
            contents: Contents::Children(children),
            hash: Hash::ZERO,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.contents, Contents::Value(_))
    }

    pub fn is_cleared(&self) -> bool {
        matches!(self.contents, Contents::Cleared)
    }

    pub fn children(&self) -> Option<Children> {
        match self.contents {
            Contents::Children(children) => Some(children),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&V> {
        match &self.contents {
            Contents::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn value_mut(&mut self) -> Option<&mut V> {
        match &mut self.contents {
            Contents::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Move everything out, leaving a tombstone that forwards to `forward`
    pub fn take(&mut self, forward: NodeRef) -> NodeBody<K, V> {
        NodeBody {
            prefix: self.prefix,
            prefix_len: self.prefix_len,
            contents: std::mem::replace(&mut self.contents, Contents::Stolen(forward)),
            hash: self.hash,
        }
    }

    pub fn describe(&self) -> String {
        let kind = match &self.contents {
            Contents::Value(_) => "leaf".to_string(),
            Contents::Children(c) => format!("branch, {} children", c.bv.len()),
            Contents::Stolen(to) => format!("stolen, moved to {:?}", to),
            Contents::Cleared => "cleared".to_string(),
        };
        format!("{:?}/{} ({})", self.prefix, self.prefix_len.0, kind)
    }

    /// Children of a node that must be a live branch
    pub fn expect_children(&self) -> Children {
        match self.contents {
            Contents::Children(children) => children,
            _ => panic!("expected a branch node, found {}", self.describe()),
        }
    }

    /// Fault on any state a reachable node must never be in
    pub fn check_live(&self) {
        match &self.contents {
            Contents::Stolen(_) => panic!("reached a stolen node: {}", self.describe()),
            Contents::Children(children) if children.bv.len() < 2 => {
                panic!("branch with fewer than two children: {}", self.describe())
            }
            Contents::Children(_) if self.prefix_len >= K::key_len() => {
                panic!("branch at full key length: {}", self.describe())
            }
            Contents::Value(_) if self.prefix_len != K::key_len() => {
                panic!("leaf above full key length: {}", self.describe())
            }
            Contents::Cleared if self.prefix_len != PrefixLenBits::ZERO => {
                panic!("empty node below the root: {}", self.describe())
            }
            _ => {}
        }
    }
}

pub(crate) struct NodeCell<K, V> {
    body: Mutex<NodeBody<K, V>>,
    metadata: AtomicMetadata,
    hash_valid: AtomicBool,
}

impl<K: Default, V> Default for NodeCell<K, V> {
    fn default() -> Self {
        NodeCell {
            body: Mutex::new(NodeBody::default()),
            metadata: AtomicMetadata::default(),
            hash_valid: AtomicBool::new(false),
        }
    }
}

/// A node: an arena plus a cell index
pub(crate) struct TrieNode<'a, K, V> {
    arena: &'a Arena<K, V>,
    at: NodeRef,
}

impl<K, V> Clone for TrieNode<'_, K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V> Copy for TrieNode<'_, K, V> {}

impl<'a, K: TrieKey, V: TrieValue> TrieNode<'a, K, V> {
    pub fn new(arena: &'a Arena<K, V>, at: NodeRef) -> Self {
        TrieNode { arena, at }
    }

    pub fn at(self) -> NodeRef {
        self.at
    }

    pub fn arena(self) -> &'a Arena<K, V> {
        self.arena
    }

    fn cell(self) -> &'a NodeCell<K, V> {
        self.arena.get(self.at)
    }

    pub fn lock(self) -> MutexGuard<'a, NodeBody<K, V>> {
        self.cell().body.lock()
    }

    pub fn at_slot(self, children: Children, branch: u8) -> Self {
        TrieNode::new(self.arena, children.slot(branch))
    }

    // === Metadata ===

    pub fn metadata(self) -> Metadata {
        self.cell().metadata.peek()
    }

    pub fn meta(self) -> &'a AtomicMetadata {
        &self.cell().metadata
    }

    pub fn size(self) -> i64 {
        self.cell().metadata.size()
    }

    pub fn add_metadata(self, delta: &Metadata) {
        self.cell().metadata.add(delta);
    }

    pub fn sub_metadata(self, delta: &Metadata) {
        self.cell().metadata.sub(delta);
    }

    pub fn store_metadata(self, value: Metadata) {
        self.cell().metadata.store(value);
    }

    // === Hash latch ===

    pub fn hash_valid(self) -> bool {
        self.cell().hash_valid.load(Ordering::Acquire)
    }

    pub fn set_hash_valid(self, valid: bool) {
        self.cell().hash_valid.store(valid, Ordering::Release);
    }

    /// Clear the latch, returning whether it was set
    pub fn invalidate_hash(self) -> bool {
        self.cell().hash_valid.swap(false, Ordering::AcqRel)
    }

    // === Cell state ===

    pub fn install(self, body: NodeBody<K, V>, metadata: Metadata, hash_valid: bool) {
        *self.lock() = body;
        self.store_metadata(metadata);
        self.set_hash_valid(hash_valid);
    }

    pub fn init_empty(self) {
        self.install(NodeBody::default(), Metadata::ZERO, false);
    }

    pub fn init_leaf(self, key: K, value: V, metadata: Metadata) {
        self.install(NodeBody::leaf(key, value), metadata, false);
    }

    /// Move this node (whose body the caller holds) into `target`
    pub fn relocate_locked(self, body: &mut NodeBody<K, V>, target: NodeRef) {
        if let Contents::Stolen(to) = body.contents {
            panic!("relocating a node already stolen to {:?}", to);
        }
        let moved = body.take(target);
        TrieNode::new(self.arena, target).install(moved, self.metadata(), self.hash_valid());
    }

    pub fn relocate(self, target: NodeRef) {
        let mut body = self.lock();
        self.relocate_locked(&mut body, target);
    }

    /// Replace a branch left with exactly one child by that child
    pub fn pull_up_single_child(self, body: &mut NodeBody<K, V>) {
        let children = body.expect_children();
        let only = match children.bv.iter().next() {
            Some(branch) if children.bv.len() == 1 => branch,
            _ => panic!("pull-up on a branch without exactly one child: {}", body.describe()),
        };
        let child = self.at_slot(children, only);
        let mut child_body = child.lock();
        *body = child_body.take(self.at);
        self.store_metadata(child.metadata());
        self.set_hash_valid(child.hash_valid());
    }

    /// Allocate an empty child block
    pub fn alloc_block(self, cursor: &mut AllocCursor) -> NodeRef {
        self.arena.allocate(cursor, BRANCH_FACTOR as u32)
    }

    /// Children that count towards hashes and proofs under `live_only`.
    /// A child with more deletion marks than leaves is corrupt.
    pub fn visible_children(self, children: Children, live_only: bool) -> Vec<(u8, Self)> {
        children
            .bv
            .iter()
            .map(|branch| (branch, self.at_slot(children, branch)))
            .filter(|(_, child)| {
                if !live_only {
                    return true;
                }
                let meta = child.metadata();
                if meta.size < meta.num_deleted_subnodes {
                    panic!(
                        "node {:?} has {} leaves but {} deletion marks",
                        child.at, meta.size, meta.num_deleted_subnodes
                    );
                }
                !meta.fully_deleted()
            })
            .collect()
    }
}
