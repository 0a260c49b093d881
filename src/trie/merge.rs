//! Recursive merge of one trie into another
//!
//! The receiver is a live node; the incoming node heads a trie nothing else
//! references any more, so its cells can be taken apart freely. Whole
//! incoming subtrees are adopted by moving their root into a child slot,
//! never re-inserted leaf by leaf.

use super::node::{BranchVector, Children, Contents, NodeBody, TrieNode};
use super::policy::MergePolicy;
use crate::arena::AllocCursor;
use crate::model::{Metadata, TrieKey, TrieValue};
use tracing::trace;

impl<'a, K: TrieKey, V: TrieValue> TrieNode<'a, K, V> {
    /// Merge the trie headed by `incoming` into this node and return the
    /// metadata delta this node gained.
    pub fn merge_from<M: MergePolicy<V>>(
        self,
        cursor: &mut AllocCursor,
        incoming: TrieNode<'a, K, V>,
    ) -> Metadata {
        if self.at() == incoming.at() {
            panic!("merging node {:?} into itself", self.at());
        }
        if !std::ptr::eq(self.arena(), incoming.arena()) {
            panic!("merging nodes from different arenas");
        }

        let mut body = self.lock();
        let mut other = incoming.lock();
        body.check_live();
        other.check_live();
        if body.is_cleared() {
            panic!("node-level merge into an empty node {:?}", self.at());
        }
        if other.is_cleared() {
            return Metadata::ZERO;
        }
        let was_valid = self.invalidate_hash();

        let match_len = body
            .prefix
            .match_len(&other.prefix, body.prefix_len.min(other.prefix_len));

        // Case 0: the same leaf on both sides
        if match_len == K::key_len() {
            let original = self.metadata();
            let incoming_meta = incoming.metadata();
            let value = match std::mem::replace(&mut other.contents, Contents::Stolen(self.at())) {
                Contents::Value(value) => value,
                _ => panic!("full-length match on a non-leaf"),
            };
            let main = body
                .value_mut()
                .unwrap_or_else(|| panic!("full-length match on a non-leaf"));
            M::merge_values(main, value);
            let merged = M::merged_metadata(&incoming_meta, main);
            self.store_metadata(merged);
            return merged - original;
        }

        // Case 1: equal prefixes, union the children
        if body.prefix_len == other.prefix_len && match_len == body.prefix_len {
            let mut children = body.expect_children();
            let theirs = other.expect_children();
            other.contents = Contents::Stolen(self.at());
            drop(other);

            let mut delta = Metadata::ZERO;
            for branch in theirs.bv.iter() {
                let their_child = incoming.at_slot(theirs, branch);
                if children.bv.contains(branch) {
                    delta += self
                        .at_slot(children, branch)
                        .merge_from::<M>(cursor, their_child);
                } else {
                    their_child.relocate(children.slot(branch));
                    children.bv.insert(branch);
                    delta += self.at_slot(children, branch).metadata();
                }
            }
            body.contents = Contents::Children(children);
            self.add_metadata(&delta);
            return delta;
        }

        // Case 2: the receiver's prefix is a strict prefix of the incoming one
        if match_len == body.prefix_len {
            let mut children = body.expect_children();
            let branch = other.prefix.branch_bits(body.prefix_len);
            drop(other);

            let delta = if children.bv.contains(branch) {
                self.at_slot(children, branch)
                    .merge_from::<M>(cursor, incoming)
            } else {
                incoming.relocate(children.slot(branch));
                children.bv.insert(branch);
                body.contents = Contents::Children(children);
                self.at_slot(children, branch).metadata()
            };
            self.add_metadata(&delta);
            return delta;
        }

        // Case 3: the incoming prefix is a strict prefix of the receiver's.
        // The receiver's contents move down under the incoming structure.
        if match_len == other.prefix_len {
            trace!(
                receiver = %body.describe(),
                incoming = %other.describe(),
                "merge: receiver moves under incoming branch"
            );
            let original = self.metadata();
            let incoming_meta = incoming.metadata();
            let mut theirs = other.expect_children();
            let branch = body.prefix.branch_bits(other.prefix_len);
            let new_body = NodeBody::branch(other.prefix, other.prefix_len, theirs);
            other.contents = Contents::Stolen(self.at());
            drop(other);

            // extract: park our old contents
            let extracted = body.take(self.at());
            let metadata = if theirs.bv.contains(branch) {
                // their matching subtree moves aside so our old contents can
                // take its slot and absorb it
                let matching = incoming.at_slot(theirs, branch);
                let matching_meta = matching.metadata();
                let parked = self.arena().allocate(cursor, 1);
                matching.relocate(parked);

                let slot = incoming.at_slot(theirs, branch);
                slot.install(extracted, original, was_valid);
                let merged = slot.merge_from::<M>(cursor, TrieNode::new(self.arena(), parked));
                incoming_meta - matching_meta + original + merged
            } else {
                incoming
                    .at_slot(theirs, branch)
                    .install(extracted, original, was_valid);
                theirs.bv.insert(branch);
                incoming_meta + original
            };

            // install: we now head the incoming structure
            *body = NodeBody {
                contents: Contents::Children(theirs),
                ..new_body
            };
            self.store_metadata(metadata);
            return metadata - original;
        }

        // Case 4: neither prefix covers the other; both become children of
        // a new branch at their common prefix
        trace!(
            receiver = %body.describe(),
            incoming = %other.describe(),
            match_len = match_len.0,
            "merge: synthesizing common branch"
        );
        let incoming_meta = incoming.metadata();
        let block = self.alloc_block(cursor);
        let our_branch = body.prefix.branch_bits(match_len);
        let their_branch = other.prefix.branch_bits(match_len);
        drop(other);

        self.set_hash_valid(was_valid);
        self.relocate_locked(&mut body, block.slot(our_branch));
        self.set_hash_valid(false);
        incoming.relocate(block.slot(their_branch));

        let mut bv = BranchVector::EMPTY;
        bv.insert(our_branch);
        bv.insert(their_branch);
        let prefix = body.prefix;
        *body = NodeBody::branch(prefix, match_len, Children { base: block, bv });
        self.add_metadata(&incoming_meta);
        incoming_meta
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{AccountId, Metadata, PrefixLenBits};
    use crate::trie::policy::{OverwriteInsert, OverwriteMerge};
    use crate::trie::test_util::Scratch;

    #[test]
    fn test_merge_same_leaf_overwrites() {
        let scratch = Scratch::new();
        let main = scratch.root();
        let other = scratch.fresh_root();
        let key = AccountId(0xFF00_0000_0000_0000);
        let mut cursor = scratch.cursor();
        main.insert::<OverwriteInsert>(&mut cursor, key, 1u64);
        other.insert::<OverwriteInsert>(&mut cursor, key, 2u64);

        let delta = main.merge_from::<OverwriteMerge>(&mut cursor, other);
        assert!(delta.is_zero());
        assert_eq!(main.size(), 1);
        assert_eq!(main.get_value(&key), Some(2));
    }

    #[test]
    fn test_merge_union_of_children() {
        let scratch = Scratch::new();
        let mut cursor = scratch.cursor();
        let main = scratch.build(&mut cursor, &[0x1000, 0x2000, 0x3000]);
        let other = scratch.build(&mut cursor, &[0x3000, 0x4000, 0x5000]);

        let delta = main.merge_from::<OverwriteMerge>(&mut cursor, other);
        assert_eq!(delta.size, 2);
        assert_eq!(main.size(), 5);
        for k in [0x1000u64, 0x2000, 0x3000, 0x4000, 0x5000] {
            assert!(main.contains_key(&AccountId(k)));
        }
        assert!(main.check_shape());
        assert!(main.check_metadata());
    }

    #[test]
    fn test_merge_incoming_below_receiver() {
        // receiver prefix is shorter: case 2
        let scratch = Scratch::new();
        let mut cursor = scratch.cursor();
        let main = scratch.build(&mut cursor, &[0x1000_0000_0000_0000, 0x2000_0000_0000_0000]);
        let other = scratch.build(&mut cursor, &[0x1100_0000_0000_0000, 0x1200_0000_0000_0000]);

        let delta = main.merge_from::<OverwriteMerge>(&mut cursor, other);
        assert_eq!(delta.size, 2);
        assert_eq!(main.size(), 4);
        assert!(main.check_shape());
        assert!(main.check_metadata());
    }

    #[test]
    fn test_merge_receiver_moves_under_incoming() {
        // incoming prefix is shorter: case 3, with and without a shared slot
        let scratch = Scratch::new();
        let mut cursor = scratch.cursor();
        let main = scratch.build(&mut cursor, &[0x1100_0000_0000_0000, 0x1200_0000_0000_0000]);
        let other = scratch.build(
            &mut cursor,
            &[0x1100_0000_0000_0000, 0x1300_0000_0000_0000, 0x2000_0000_0000_0000],
        );
        {
            let body = main.lock();
            assert_eq!(body.prefix_len, PrefixLenBits(4));
        }

        let before = main.metadata();
        let delta = main.merge_from::<OverwriteMerge>(&mut cursor, other);
        assert_eq!(main.metadata() - before, delta);
        assert_eq!(main.size(), 4);
        assert_eq!(main.lock().prefix_len, PrefixLenBits(0));
        assert!(main.check_shape());
        assert!(main.check_metadata());

        let main2 = scratch.build(&mut cursor, &[0x1100_0000_0000_0000, 0x1200_0000_0000_0000]);
        let other2 = scratch.build(&mut cursor, &[0x2000_0000_0000_0000, 0x3000_0000_0000_0000]);
        let delta = main2.merge_from::<OverwriteMerge>(&mut cursor, other2);
        assert_eq!(delta.size, 2);
        assert_eq!(main2.size(), 4);
        assert!(main2.check_shape());
    }

    #[test]
    fn test_merge_disjoint_prefixes_synthesizes_branch() {
        let scratch = Scratch::new();
        let mut cursor = scratch.cursor();
        let main = scratch.build(&mut cursor, &[0x1100_0000_0000_0000, 0x1200_0000_0000_0000]);
        let other = scratch.build(&mut cursor, &[0x2510_0000_0000_0000, 0x2520_0000_0000_0000]);

        let delta = main.merge_from::<OverwriteMerge>(&mut cursor, other);
        assert_eq!(
            delta,
            Metadata {
                size: 2,
                ..Metadata::ZERO
            }
        );
        let body = main.lock();
        assert_eq!(body.prefix_len, PrefixLenBits(0));
        assert_eq!(body.expect_children().bv.iter().collect::<Vec<_>>(), vec![1, 2]);
        drop(body);
        assert!(main.check_shape());
        assert!(main.check_metadata());
    }
}
