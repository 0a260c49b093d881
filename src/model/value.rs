//! Values stored at trie leaves

use super::Hash;

/// A leaf value.
///
/// `write_bytes` is the value's contribution to its leaf hash and the payload
/// of membership proofs, so it must be deterministic.
pub trait TrieValue: Clone + Send + Sync + 'static {
    fn write_bytes(&self, out: &mut Vec<u8>);

    /// Economic weight aggregated into subtree metadata
    fn endowment(&self) -> i64 {
        0
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_bytes(&mut out);
        out
    }
}

impl TrieValue for Vec<u8> {
    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl<const N: usize> TrieValue for [u8; N] {
    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl TrieValue for u64 {
    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }
}

impl TrieValue for Hash {
    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

/// Key-only tries (sets) store nothing at the leaves
impl TrieValue for () {
    fn write_bytes(&self, _out: &mut Vec<u8>) {}
}

/// A value paired with the endowment it carries, e.g. an offer and the
/// amount it sells.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endowed<T> {
    pub endow: i64,
    pub value: T,
}

impl<T: TrieValue> TrieValue for Endowed<T> {
    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.endow.to_be_bytes());
        self.value.write_bytes(out);
    }

    fn endowment(&self) -> i64 {
        self.endow
    }
}
