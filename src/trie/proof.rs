//! Membership and non-membership proofs
//!
//! A proof is the chain of branch records on the live path from the root
//! towards a key, plus a terminal that says how the path ends:
//!
//! - `Member`: the path reaches the key's leaf; carries the value bytes.
//! - `Absent`: the last record has no child under the key's next selector.
//! - `Diverged`: the path reaches a node whose prefix stops agreeing with
//!   the key; carries that node's prefix and contents so its hash can be
//!   rebuilt.
//!
//! Branches that hash as their single visible child emit no record: the
//! verifier sees exactly the tree the commitment hashes.

use super::hash::{branch_hash, leaf_hash, root_commitment};
use super::node::{BranchVector, Contents, TrieNode};
use crate::config::{HashMode, HashSettings};
use crate::model::{bytes_match_len, nibble_at, truncate_bytes, DigestScheme, Hash, PrefixLenBits, TrieKey, TrieValue, BRANCH_BITS};
use crate::Result;
use serde::{Deserialize, Serialize};

/// One branch on the path: its length, visible children and their hashes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofNode {
    pub prefix_len: u16,
    pub bv: u16,
    pub hashes: Vec<Hash>,
}

/// Contents of the node a non-member key diverges from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DivergedBody {
    Leaf { value: Vec<u8> },
    Branch { bv: u16, hashes: Vec<Hash> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Terminal {
    Member {
        value: Vec<u8>,
    },
    Absent,
    Diverged {
        prefix: Vec<u8>,
        prefix_len: u16,
        body: DivergedBody,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub scheme: DigestScheme,
    /// Full-width key bytes
    pub key: Vec<u8>,
    /// Leaf count committed to by the root commitment
    pub trie_size: u32,
    pub root_node_hash: Hash,
    /// Root-to-target branch records
    pub nodes: Vec<ProofNode>,
    pub terminal: Terminal,
}

impl Proof {
    pub fn is_membership(&self) -> bool {
        matches!(self.terminal, Terminal::Member { .. })
    }

    /// Value bytes of a membership proof
    pub fn value(&self) -> Option<&[u8]> {
        match &self.terminal {
            Terminal::Member { value } => Some(value),
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Check this proof against a root commitment
    pub fn verify(&self, commitment: &Hash) -> bool {
        verify_proof(self, commitment)
    }
}

/// Proof for a trie with nothing committed
pub(crate) fn empty_proof(scheme: DigestScheme, key: Vec<u8>) -> Proof {
    Proof {
        scheme,
        key,
        trie_size: 0,
        root_node_hash: Hash::ZERO,
        nodes: Vec::new(),
        terminal: Terminal::Absent,
    }
}

impl<'a, K: TrieKey, V: TrieValue> TrieNode<'a, K, V> {
    /// Walk towards `key`, pushing a record for every branch that hashes as
    /// a branch. Hashes below this node must be computable.
    pub(crate) fn prove(
        self,
        settings: HashSettings,
        key: &K,
        records: &mut Vec<ProofNode>,
    ) -> Terminal {
        let body = self.lock();
        body.check_live();
        let mut prefix = Vec::with_capacity(K::key_len().num_prefix_bytes());
        body.prefix.write_prefix_bytes(K::key_len(), &mut prefix);

        let children = match &body.contents {
            Contents::Value(value) if body.prefix == *key => {
                return Terminal::Member {
                    value: value.to_bytes(),
                }
            }
            Contents::Value(value) => {
                return Terminal::Diverged {
                    prefix,
                    prefix_len: body.prefix_len.0,
                    body: DivergedBody::Leaf {
                        value: value.to_bytes(),
                    },
                }
            }
            Contents::Children(children) => *children,
            _ => return Terminal::Absent,
        };

        let visible = self.visible_children(children, settings.mode == HashMode::LiveOnly);
        if visible.len() < 2 {
            let (_, only) = visible.first().copied().unwrap_or_else(|| {
                panic!("proof path reached a node with nothing visible: {}", body.describe())
            });
            drop(body);
            return only.prove(settings, key, records);
        }

        let mut bv = BranchVector::EMPTY;
        let mut hashes = Vec::with_capacity(visible.len());
        for (branch, child) in &visible {
            bv.insert(*branch);
            hashes.push(child.compute_hash(settings));
        }

        if key.match_len(&body.prefix, body.prefix_len) < body.prefix_len {
            return Terminal::Diverged {
                prefix,
                prefix_len: body.prefix_len.0,
                body: DivergedBody::Branch {
                    bv: bv.bits(),
                    hashes,
                },
            };
        }

        records.push(ProofNode {
            prefix_len: body.prefix_len.0,
            bv: bv.bits(),
            hashes,
        });
        let branch = key.branch_bits(body.prefix_len);
        match visible.iter().find(|(b, _)| *b == branch) {
            Some((_, next)) => {
                let next = *next;
                drop(body);
                next.prove(settings, key, records)
            }
            None => Terminal::Absent,
        }
    }
}

/// Where the record chain left the verifier
enum Walk {
    /// Descended into a child with this hash; next node is at least this long
    Child(Hash, PrefixLenBits),
    /// The last record has no child under the key
    Missing,
}

/// Check `proof` against the externally known `commitment`
pub fn verify_proof(proof: &Proof, commitment: &Hash) -> bool {
    if root_commitment(proof.trie_size, &proof.root_node_hash) != *commitment {
        return false;
    }
    let key_bits = match u16::try_from(proof.key.len() * 8) {
        Ok(bits) if bits > 0 => PrefixLenBits(bits),
        _ => return false,
    };
    if proof.trie_size == 0 {
        return proof.nodes.is_empty() && proof.terminal == Terminal::Absent;
    }

    let scheme = proof.scheme;
    let mut walk = Walk::Child(proof.root_node_hash, PrefixLenBits::ZERO);
    for record in &proof.nodes {
        let (expected, min_len) = match walk {
            Walk::Child(hash, min_len) => (hash, min_len),
            Walk::Missing => return false,
        };
        let len = PrefixLenBits(record.prefix_len);
        let bv = BranchVector::from_bits(record.bv);
        if len < min_len || len >= key_bits || len.0 % BRANCH_BITS != 0 {
            return false;
        }
        if bv.len() < 2 || record.hashes.len() != bv.len() {
            return false;
        }

        let mut prefix = proof.key.clone();
        truncate_bytes(&mut prefix, len);
        if branch_hash(scheme, &prefix, len, bv, &record.hashes) != expected {
            return false;
        }

        let branch = nibble_at(&proof.key, len);
        walk = if bv.contains(branch) {
            Walk::Child(record.hashes[bv.rank(branch)], len + BRANCH_BITS)
        } else {
            Walk::Missing
        };
    }

    match (&proof.terminal, walk) {
        (Terminal::Absent, Walk::Missing) => true,
        (Terminal::Member { value }, Walk::Child(expected, _)) => {
            leaf_hash(scheme, &proof.key, key_bits, value) == expected
        }
        (
            Terminal::Diverged {
                prefix,
                prefix_len,
                body,
            },
            Walk::Child(expected, min_len),
        ) => verify_diverged(scheme, &proof.key, key_bits, prefix, *prefix_len, body, expected, min_len),
        _ => false,
    }
}

#[allow(clippy::too_many_arguments)]
fn verify_diverged(
    scheme: DigestScheme,
    key: &[u8],
    key_bits: PrefixLenBits,
    prefix: &[u8],
    prefix_len: u16,
    body: &DivergedBody,
    expected: Hash,
    min_len: PrefixLenBits,
) -> bool {
    let len = PrefixLenBits(prefix_len);
    if prefix.len() != key.len() || len > key_bits || len < min_len || len.0 % BRANCH_BITS != 0 {
        return false;
    }
    let mut canonical = prefix.to_vec();
    truncate_bytes(&mut canonical, len);
    if canonical != prefix {
        return false;
    }
    // the node sits where the key's path leads, and the key leaves its
    // prefix strictly inside it
    let matched = bytes_match_len(key, prefix, len);
    if matched < min_len || matched >= len {
        return false;
    }

    let hash = match body {
        DivergedBody::Leaf { value } if len == key_bits => leaf_hash(scheme, prefix, len, value),
        DivergedBody::Branch { bv, hashes } if len < key_bits => {
            let bv = BranchVector::from_bits(*bv);
            if bv.len() < 2 || hashes.len() != bv.len() {
                return false;
            }
            branch_hash(scheme, prefix, len, bv, hashes)
        }
        _ => return false,
    };
    hash == expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AccountId;
    use crate::trie::hash::committed_count;
    use crate::trie::test_util::Scratch;

    fn prove(root: TrieNode<'_, AccountId, u64>, key: u64) -> (Proof, Hash) {
        let settings = HashSettings::default();
        let commitment = root.commitment(settings);
        let trie_size = committed_count(&root.metadata(), settings.mode);
        let k = AccountId(key);
        if trie_size == 0 {
            return (empty_proof(settings.scheme, k.to_key_bytes()), commitment);
        }
        let mut nodes = Vec::new();
        let terminal = root.prove(settings, &k, &mut nodes);
        let proof = Proof {
            scheme: settings.scheme,
            key: k.to_key_bytes(),
            trie_size,
            root_node_hash: root.compute_hash(settings),
            nodes,
            terminal,
        };
        (proof, commitment)
    }

    #[test]
    fn test_membership_round_trip() {
        let scratch = Scratch::new();
        let mut cursor = scratch.cursor();
        let keys: Vec<u64> = (0..200).map(|i| i * 0x0101_0101_0101).collect();
        let root = scratch.build(&mut cursor, &keys);
        for k in keys.iter().step_by(17) {
            let (proof, commitment) = prove(root, *k);
            assert!(proof.is_membership());
            assert_eq!(proof.value(), Some(&k.to_be_bytes()[..]));
            assert!(verify_proof(&proof, &commitment));
        }
    }

    #[test]
    fn test_absent_and_diverged_keys_verify() {
        let scratch = Scratch::new();
        let mut cursor = scratch.cursor();
        let root = scratch.build(
            &mut cursor,
            &[0x1100_0000_0000_0000, 0x1200_0000_0000_0000, 0x2000_0000_0000_0001],
        );
        // missing selector at the root
        let (proof, commitment) = prove(root, 0x3000_0000_0000_0000);
        assert_eq!(proof.terminal, Terminal::Absent);
        assert!(verify_proof(&proof, &commitment));

        // diverges inside the leaf under selector 2
        let (proof, commitment) = prove(root, 0x2000_0000_0000_0002);
        assert!(matches!(proof.terminal, Terminal::Diverged { .. }));
        assert!(verify_proof(&proof, &commitment));
    }

    #[test]
    fn test_diverged_inside_compressed_branch() {
        let scratch = Scratch::new();
        let mut cursor = scratch.cursor();
        let root = scratch.build(&mut cursor, &[0xAB00_0000_0000_0010, 0xAB00_0000_0000_0020]);
        let (proof, commitment) = prove(root, 0xAC00_0000_0000_0010);
        match &proof.terminal {
            Terminal::Diverged { body, .. } => {
                assert!(matches!(body, DivergedBody::Branch { .. }))
            }
            other => panic!("unexpected terminal {:?}", other),
        }
        assert!(proof.nodes.is_empty());
        assert!(verify_proof(&proof, &commitment));
    }

    #[test]
    fn test_tampered_proofs_fail() {
        let scratch = Scratch::new();
        let mut cursor = scratch.cursor();
        let root = scratch.build(&mut cursor, &[0x10, 0x20, 0x30, 0x3100]);
        let (proof, commitment) = prove(root, 0x20);

        let mut wrong_value = proof.clone();
        wrong_value.terminal = Terminal::Member {
            value: 99u64.to_be_bytes().to_vec(),
        };
        assert!(!verify_proof(&wrong_value, &commitment));

        let mut wrong_size = proof.clone();
        wrong_size.trie_size += 1;
        assert!(!verify_proof(&wrong_size, &commitment));

        let mut claims_absent = proof.clone();
        claims_absent.terminal = Terminal::Absent;
        assert!(!verify_proof(&claims_absent, &commitment));

        let mut other_key = proof;
        other_key.key = 0x21u64.to_be_bytes().to_vec();
        assert!(!verify_proof(&other_key, &commitment));
    }

    #[test]
    fn test_proofs_through_spliced_node() {
        let scratch = Scratch::new();
        let mut cursor = scratch.cursor();
        let root = scratch.build(&mut cursor, &[0x1000, 0x2000, 0x2100, 0x2200]);
        root.mark_for_deletion(&AccountId(0x1000));
        root.mark_for_deletion(&AccountId(0x2000));

        // the root now hashes as its child under selector 2
        for (key, member) in [(0x2100, true), (0x2200, true), (0x1000, false), (0x2000, false), (0x5000, false)] {
            let (proof, commitment) = prove(root, key);
            assert_eq!(proof.is_membership(), member, "key {:#x}", key);
            assert!(verify_proof(&proof, &commitment), "key {:#x}", key);
        }
    }

    #[test]
    fn test_empty_trie_proof() {
        let scratch = Scratch::new();
        let (proof, commitment) = prove(scratch.root(), 5);
        assert!(!proof.is_membership());
        assert!(verify_proof(&proof, &commitment));
    }

    #[test]
    fn test_proof_bincode_round_trip() {
        let scratch = Scratch::new();
        let mut cursor = scratch.cursor();
        let root = scratch.build(&mut cursor, &[1, 2, 3]);
        let (proof, commitment) = prove(root, 2);
        let decoded = Proof::from_bytes(&proof.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, proof);
        assert!(decoded.verify(&commitment));
    }
}
