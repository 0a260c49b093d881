//! Single-threaded insert

use super::node::{BranchVector, Children, Contents, NodeBody, TrieNode};
use super::policy::InsertPolicy;
use crate::arena::AllocCursor;
use crate::model::{Metadata, TrieKey, TrieValue};
use tracing::trace;

impl<'a, K: TrieKey, V: TrieValue> TrieNode<'a, K, V> {
    /// Insert `key` below this node and return the metadata delta
    pub fn insert<P: InsertPolicy<V>>(
        self,
        cursor: &mut AllocCursor,
        key: K,
        input: P::Input,
    ) -> Metadata {
        let mut body = self.lock();
        body.check_live();
        self.invalidate_hash();

        if body.is_cleared() {
            let value = P::new_value(input);
            let metadata = P::leaf_metadata(&value);
            *body = NodeBody::leaf(key, value);
            self.store_metadata(metadata);
            return metadata;
        }

        let match_len = key.match_len(&body.prefix, body.prefix_len);

        if match_len == K::key_len() {
            let original = self.metadata();
            let value = body
                .value_mut()
                .unwrap_or_else(|| panic!("full-length match on a non-leaf"));
            P::fold(value, input);
            let updated = P::leaf_metadata(value);
            self.store_metadata(updated);
            return updated - original;
        }

        if match_len == body.prefix_len {
            let mut children = body.expect_children();
            let branch = key.branch_bits(match_len);
            let delta = if children.bv.contains(branch) {
                self.at_slot(children, branch).insert::<P>(cursor, key, input)
            } else {
                let value = P::new_value(input);
                let metadata = P::leaf_metadata(&value);
                self.at_slot(children, branch).init_leaf(key, value, metadata);
                children.bv.insert(branch);
                body.contents = Contents::Children(children);
                metadata
            };
            self.add_metadata(&delta);
            return delta;
        }

        trace!(
            node = %body.describe(),
            match_len = match_len.0,
            "splitting node for insert"
        );
        let value = P::new_value(input);
        let leaf_metadata = P::leaf_metadata(&value);
        let block = self.alloc_block(cursor);
        let old_branch = body.prefix.branch_bits(match_len);
        let new_branch = key.branch_bits(match_len);

        self.relocate_locked(&mut body, block.slot(old_branch));
        TrieNode::new(self.arena(), block.slot(new_branch)).init_leaf(key, value, leaf_metadata);

        let mut bv = BranchVector::EMPTY;
        bv.insert(old_branch);
        bv.insert(new_branch);
        *body = NodeBody::branch(key, match_len, Children { base: block, bv });
        self.add_metadata(&leaf_metadata);
        leaf_metadata
    }
}
