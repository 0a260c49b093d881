//! Node hashing and the root commitment
//!
//! ```text
//! header = be16(prefix_len) || prefix[..ceil(prefix_len / 8)]
//! leaf   = H(header || value bytes)
//! branch = H(header || be16(bitvector) || child hashes, ascending selector)
//! root   = SHA256(be32(count) || root node hash)
//! ```
//!
//! In live-only mode a child whose every leaf is marked for deletion is
//! left out of its parent, and a branch left with one visible child takes
//! that child's hash instead of hashing a one-entry branch.

use super::node::{BranchVector, Contents, TrieNode};
use crate::config::{HashMode, HashSettings};
use crate::model::{write_header, DigestScheme, Hash, Metadata, PrefixLenBits, TrieKey, TrieValue};

pub(crate) fn leaf_hash(
    scheme: DigestScheme,
    prefix_bytes: &[u8],
    len: PrefixLenBits,
    value_bytes: &[u8],
) -> Hash {
    let mut header = Vec::with_capacity(2 + prefix_bytes.len());
    write_header(prefix_bytes, len, &mut header);
    let mut hasher = scheme.hasher();
    hasher.update(&header);
    hasher.update(value_bytes);
    hasher.finalize()
}

pub(crate) fn branch_hash(
    scheme: DigestScheme,
    prefix_bytes: &[u8],
    len: PrefixLenBits,
    bv: BranchVector,
    children: &[Hash],
) -> Hash {
    let mut header = Vec::with_capacity(4 + prefix_bytes.len());
    write_header(prefix_bytes, len, &mut header);
    header.extend_from_slice(&bv.to_be_bytes());
    let mut hasher = scheme.hasher();
    hasher.update(&header);
    for child in children {
        hasher.update(child.as_bytes());
    }
    hasher.finalize()
}

/// Leaves a commitment counts under `mode`
pub fn committed_count(metadata: &Metadata, mode: HashMode) -> u32 {
    let count = match mode {
        HashMode::LiveOnly => metadata.live_size(),
        HashMode::Full => metadata.size,
    };
    u32::try_from(count)
        .unwrap_or_else(|_| panic!("leaf count {} does not fit a commitment", count))
}

/// SHA256(be32(count) || root node hash); the node hash is all zeros when
/// nothing is counted.
pub fn root_commitment(count: u32, root_node_hash: &Hash) -> Hash {
    let mut hasher = DigestScheme::Sha256.hasher();
    hasher.update(&count.to_be_bytes());
    if count == 0 {
        hasher.update(Hash::ZERO.as_bytes());
    } else {
        hasher.update(root_node_hash.as_bytes());
    }
    hasher.finalize()
}

impl<'a, K: TrieKey, V: TrieValue> TrieNode<'a, K, V> {
    /// Hash of this node as its parent sees it. Cached behind the validity
    /// latch; recomputed only where a mutation cleared it.
    pub fn compute_hash(self, settings: HashSettings) -> Hash {
        let mut body = self.lock();
        if self.hash_valid() {
            return body.hash;
        }
        body.check_live();

        let mut prefix_bytes = Vec::with_capacity(K::key_len().num_prefix_bytes());
        body.prefix.write_prefix_bytes(body.prefix_len, &mut prefix_bytes);

        let hash = match &body.contents {
            Contents::Value(value) => {
                leaf_hash(settings.scheme, &prefix_bytes, body.prefix_len, &value.to_bytes())
            }
            Contents::Children(children) => {
                let visible =
                    self.visible_children(*children, settings.mode == HashMode::LiveOnly);
                match visible.as_slice() {
                    [] => Hash::ZERO,
                    [(_, only)] => only.compute_hash(settings),
                    _ => {
                        let mut bv = BranchVector::EMPTY;
                        let mut hashes = Vec::with_capacity(visible.len());
                        for (branch, child) in &visible {
                            bv.insert(*branch);
                            hashes.push(child.compute_hash(settings));
                        }
                        branch_hash(settings.scheme, &prefix_bytes, body.prefix_len, bv, &hashes)
                    }
                }
            }
            Contents::Cleared => Hash::ZERO,
            Contents::Stolen(_) => unreachable!("check_live rejects stolen nodes"),
        };
        body.hash = hash;
        self.set_hash_valid(true);
        hash
    }

    /// Commitment of the trie headed by this node
    pub fn commitment(self, settings: HashSettings) -> Hash {
        let count = committed_count(&self.metadata(), settings.mode);
        let node_hash = if count == 0 {
            Hash::ZERO
        } else {
            self.compute_hash(settings)
        };
        root_commitment(count, &node_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AccountId;
    use crate::trie::policy::OverwriteInsert;
    use crate::trie::test_util::Scratch;

    fn live() -> HashSettings {
        HashSettings::default()
    }

    #[test]
    fn test_leaf_hash_layout() {
        let key = AccountId(0x0102_0304_0506_0708);
        let expected = {
            let mut buf = vec![0x00, 0x40];
            buf.extend_from_slice(&key.0.to_be_bytes());
            buf.extend_from_slice(&9u64.to_be_bytes());
            DigestScheme::Sha256.digest(&buf)
        };
        let scratch = Scratch::new();
        let root = scratch.root();
        root.insert::<OverwriteInsert>(&mut scratch.cursor(), key, 9u64);
        assert_eq!(root.compute_hash(live()), expected);
    }

    #[test]
    fn test_empty_commitment() {
        let mut buf = vec![0u8; 4];
        buf.extend_from_slice(&[0u8; 32]);
        assert_eq!(root_commitment(0, &Hash::ZERO), DigestScheme::Sha256.digest(&buf));

        let scratch = Scratch::new();
        assert_eq!(scratch.root().commitment(live()), DigestScheme::Sha256.digest(&buf));
    }

    #[test]
    fn test_hash_is_cached_and_invalidated() {
        let scratch = Scratch::new();
        let mut cursor = scratch.cursor();
        let root = scratch.build(&mut cursor, &[1, 2, 0x300]);
        let first = root.commitment(live());
        assert!(root.hash_valid());
        assert_eq!(root.commitment(live()), first);

        // same value again: new hash computation, same digest
        root.insert::<OverwriteInsert>(&mut cursor, AccountId(2), 2u64);
        assert!(!root.hash_valid());
        assert_eq!(root.commitment(live()), first);

        root.insert::<OverwriteInsert>(&mut cursor, AccountId(2), 3u64);
        assert_ne!(root.commitment(live()), first);
    }

    #[test]
    fn test_deleted_leaves_are_invisible_in_live_mode() {
        let scratch = Scratch::new();
        let mut cursor = scratch.cursor();
        let with_marked = scratch.build(&mut cursor, &[0x10, 0x20, 0x30]);
        with_marked.mark_for_deletion(&AccountId(0x30));
        let without = scratch.build(&mut cursor, &[0x10, 0x20]);
        assert_eq!(with_marked.commitment(live()), without.commitment(live()));

        // cached hashes are only valid for one mode, so use fresh tries
        let full = HashSettings {
            mode: HashMode::Full,
            ..live()
        };
        let with_marked = scratch.build(&mut cursor, &[0x10, 0x20, 0x30]);
        with_marked.mark_for_deletion(&AccountId(0x30));
        let without = scratch.build(&mut cursor, &[0x10, 0x20]);
        let unmarked = scratch.build(&mut cursor, &[0x10, 0x20, 0x30]);
        assert_ne!(with_marked.commitment(full), without.commitment(full));
        assert_eq!(with_marked.commitment(full), unmarked.commitment(full));
    }

    #[test]
    fn test_single_live_child_is_spliced() {
        let scratch = Scratch::new();
        let mut cursor = scratch.cursor();
        let root = scratch.build(&mut cursor, &[0x1000, 0x2000, 0x2100]);
        root.mark_for_deletion(&AccountId(0x1000));
        root.mark_for_deletion(&AccountId(0x2000));

        let single = scratch.build(&mut cursor, &[0x2100]);
        assert_eq!(root.compute_hash(live()), single.compute_hash(live()));
        assert_eq!(root.commitment(live()), single.commitment(live()));
    }

    #[test]
    #[should_panic(expected = "deletion marks")]
    fn test_more_marks_than_leaves_is_fatal() {
        let scratch = Scratch::new();
        let mut cursor = scratch.cursor();
        let root = scratch.build(&mut cursor, &[0x10, 0x20]);
        let children = root.lock().expect_children();
        root.at_slot(children, 1).add_metadata(&Metadata {
            num_deleted_subnodes: 2,
            ..Metadata::ZERO
        });
        root.compute_hash(live());
    }
}
