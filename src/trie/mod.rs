//! Merkle radix trie over fixed-width keys
//!
//! This implements a 16-way, path-compressed trie where:
//! - Every node carries commutative metadata summed over its leaves
//! - Hashes are cached per node and recomputed only along mutated paths
//! - Sub-tries built on separate threads merge in without copying nodes
//! - Membership and non-membership are provable against the root commitment
//!
//! Node-level algorithms are `impl` blocks on `TrieNode`, split by concern
//! across the submodules; [`MerkleTrie`] and [`SerialTrie`] are the handles
//! callers use.

mod batch;
mod delete;
mod hash;
mod insert;
mod merge;
mod node;
mod parallel;
mod policy;
mod proof;
mod query;
mod tree;

pub(crate) use node::{NodeCell, TrieNode};
pub use node::BranchVector;
pub use hash::{committed_count, root_commitment};
pub use policy::{
    InsertPolicy, MergePolicy, OverwriteInsert, OverwriteMerge, RollbackInsert,
};
pub use proof::{verify_proof, DivergedBody, Proof, ProofNode, Terminal};
pub use tree::{AccountTrie, MerkleTrie, SerialTrie};
