//! Digest type and the node hash functions behind it

use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use std::fmt;

type Blake2b256 = blake2::Blake2b<blake2::digest::consts::U32>;

/// A 32-byte digest: node hashes and root commitments
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Node hash standing in for an empty trie
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse 64 hex digits
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Hash(bytes))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash").field(&self.to_hex()).finish()
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Hash function used for trie nodes.
///
/// The scheme is part of the wire contract: commitments produced under one
/// scheme never verify under another, so every proof records the scheme
/// (by version byte) it was generated with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestScheme {
    /// SHA-256 node hashes
    #[default]
    Sha256,
    /// BLAKE2b with a 256-bit output
    Blake2b256,
    /// BLAKE3
    Blake3,
}

impl DigestScheme {
    /// Wire version byte
    pub fn version(self) -> u8 {
        match self {
            DigestScheme::Sha256 => 1,
            DigestScheme::Blake2b256 => 2,
            DigestScheme::Blake3 => 3,
        }
    }

    pub fn from_version(version: u8) -> Option<Self> {
        match version {
            1 => Some(DigestScheme::Sha256),
            2 => Some(DigestScheme::Blake2b256),
            3 => Some(DigestScheme::Blake3),
            _ => None,
        }
    }

    /// Hash one contiguous buffer
    pub fn digest(self, data: &[u8]) -> Hash {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }

    /// Start an incremental hasher
    pub(crate) fn hasher(self) -> NodeHasher {
        match self {
            DigestScheme::Sha256 => NodeHasher::Sha256(sha2::Sha256::new()),
            DigestScheme::Blake2b256 => NodeHasher::Blake2b(Blake2b256::new()),
            DigestScheme::Blake3 => NodeHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }
}

/// Incremental hasher for one [`DigestScheme`]
pub(crate) enum NodeHasher {
    Sha256(sha2::Sha256),
    Blake2b(Blake2b256),
    Blake3(Box<blake3::Hasher>),
}

impl NodeHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            NodeHasher::Sha256(h) => h.update(data),
            NodeHasher::Blake2b(h) => h.update(data),
            NodeHasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    pub fn finalize(self) -> Hash {
        let mut out = [0u8; 32];
        match self {
            NodeHasher::Sha256(h) => out.copy_from_slice(&h.finalize()),
            NodeHasher::Blake2b(h) => out.copy_from_slice(&h.finalize()),
            NodeHasher::Blake3(h) => out.copy_from_slice(h.finalize().as_bytes()),
        }
        Hash(out)
    }
}
