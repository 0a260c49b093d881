//! # ledger_trie
//!
//! A parallel merkle radix trie for committing to ledger state.
//!
//! ledger_trie keeps account-like records in a 16-way, path-compressed trie
//! whose root hash commits to every live entry. Sub-tries are built on
//! independent threads and merged into the canonical trie in parallel, and
//! any key can be proven present or absent against the root commitment.
//!
//! ## Core Concepts
//!
//! - **Arena**: Append-only node storage shared by every trie of an epoch
//! - **Metadata**: Commutative per-subtree sums (size, endowment, marks)
//! - **Serial tries**: Single-threaded scratch tries merged in without copying
//! - **Commitments**: `SHA256(be32(live count) || root node hash)`
//! - **Proofs**: Self-contained membership and non-membership witnesses
//!
//! ## Example
//!
//! ```ignore
//! use ledger_trie::{AccountId, AccountTrie};
//!
//! let trie: AccountTrie<u64> = AccountTrie::with_default_config();
//! let mut serial = trie.open_serial_subsidiary();
//! serial.insert(AccountId(7), 100);
//! trie.batch_merge_in(vec![serial]);
//!
//! let root = trie.freeze_and_hash();
//! let proof = trie.generate_proof(&AccountId(7));
//! assert!(proof.verify(&root));
//! ```

pub mod config;
pub mod model;
pub mod trie;

mod arena;
mod error;

pub use config::{HashMode, HashSettings, TrieConfig};
pub use error::{Error, Result};
pub use model::{
    AccountId, ByteKey, DigestScheme, Endowed, Hash, Metadata, PrefixLenBits, TrieKey, TrieValue,
};
pub use trie::{
    verify_proof, AccountTrie, InsertPolicy, MergePolicy, MerkleTrie, OverwriteInsert,
    OverwriteMerge, Proof, ProofNode, RollbackInsert, SerialTrie, Terminal,
};

/// Version of the node hashing and proof layout
pub const VERSION: u32 = 1;
