//! Core data model types for ledger_trie

mod hash;
mod metadata;
mod prefix;
mod value;

pub use hash::{DigestScheme, Hash};
pub use metadata::{AtomicMetadata, Metadata};
pub use prefix::{AccountId, ByteKey, PrefixLenBits, TrieKey, BRANCH_BITS, BRANCH_FACTOR};
pub use value::{Endowed, TrieValue};

pub(crate) use prefix::{bytes_match_len, nibble_at, truncate_bytes, write_header};
