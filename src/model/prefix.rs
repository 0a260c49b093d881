//! Fixed-width keys viewed as big-endian bit strings
//!
//! Bit 0 is the most significant bit of byte 0, so the first branch selector
//! of any key is the high nibble of its first byte. Every prefix kept in the
//! trie is canonically truncated: all bits at or beyond its length are zero.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

/// Bits consumed by one branch selector
pub const BRANCH_BITS: u16 = 4;

/// Number of children a branch node may have
pub const BRANCH_FACTOR: usize = 1 << BRANCH_BITS;

/// Length of a prefix in bits
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PrefixLenBits(pub u16);

impl PrefixLenBits {
    pub const ZERO: PrefixLenBits = PrefixLenBits(0);

    pub fn bits(self) -> u16 {
        self.0
    }

    /// Bytes needed to hold a prefix of this length
    pub fn num_prefix_bytes(self) -> usize {
        (self.0 as usize + 7) / 8
    }

    /// Length after consuming one more branch selector
    pub fn next_branch(self) -> Self {
        PrefixLenBits(self.0 + BRANCH_BITS)
    }

    /// Wire form used in node headers
    pub fn to_be_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

impl Add<u16> for PrefixLenBits {
    type Output = PrefixLenBits;

    fn add(self, rhs: u16) -> PrefixLenBits {
        PrefixLenBits(self.0 + rhs)
    }
}

impl fmt::Display for PrefixLenBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bits", self.0)
    }
}

/// A fixed-width trie key.
///
/// Implementors are plain bit strings; the trie never looks at them any other
/// way. `Ord` must agree with big-endian numeric order of the key bytes.
pub trait TrieKey: Copy + Eq + Ord + Default + Send + Sync + fmt::Debug + 'static {
    /// Width of a full key
    const KEY_BITS: u16;

    fn key_len() -> PrefixLenBits {
        PrefixLenBits(Self::KEY_BITS)
    }

    /// Length of the common prefix with `other`, rounded down to a whole
    /// number of branch selectors and clamped to `max`.
    fn match_len(&self, other: &Self, max: PrefixLenBits) -> PrefixLenBits;

    /// The branch selector starting at bit `at`
    fn branch_bits(&self, at: PrefixLenBits) -> u8;

    /// Zero every bit at or after `to`
    fn truncate(&mut self, to: PrefixLenBits);

    /// Overwrite the branch selector starting at bit `at`
    fn set_branch_bits(&mut self, at: PrefixLenBits, branch: u8);

    /// Append the first `len.num_prefix_bytes()` bytes to `out`
    fn write_prefix_bytes(&self, len: PrefixLenBits, out: &mut Vec<u8>);

    /// Full-width big-endian bytes
    fn to_key_bytes(&self) -> Vec<u8>;

    fn from_key_bytes(bytes: &[u8]) -> Option<Self>;

    fn truncated(mut self, to: PrefixLenBits) -> Self {
        self.truncate(to);
        self
    }
}

// === Byte-level helpers ===
//
// Shared by `ByteKey` and by proof verification, which works on raw key bytes
// without knowing the key type.

pub(crate) fn nibble_at(bytes: &[u8], at: PrefixLenBits) -> u8 {
    let byte = bytes[at.0 as usize / 8];
    if at.0 % 8 == 0 {
        byte >> 4
    } else {
        byte & 0x0F
    }
}

pub(crate) fn bytes_match_len(a: &[u8], b: &[u8], max: PrefixLenBits) -> PrefixLenBits {
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let diff = x ^ y;
        if diff != 0 {
            let bits = (i * 8) as u16 + if diff & 0xF0 != 0 { 0 } else { BRANCH_BITS };
            return PrefixLenBits(bits).min(max);
        }
    }
    PrefixLenBits((a.len().min(b.len()) * 8) as u16).min(max)
}

pub(crate) fn truncate_bytes(bytes: &mut [u8], to: PrefixLenBits) {
    let mut first_zero = to.0 as usize / 8;
    if to.0 % 8 != 0 {
        if let Some(byte) = bytes.get_mut(first_zero) {
            *byte &= 0xF0;
        }
        first_zero += 1;
    }
    for byte in bytes.iter_mut().skip(first_zero) {
        *byte = 0;
    }
}

/// Header bytes of a node: big-endian length followed by the prefix bytes
pub(crate) fn write_header(prefix_bytes: &[u8], len: PrefixLenBits, out: &mut Vec<u8>) {
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&prefix_bytes[..len.num_prefix_bytes()]);
}

/// 64-bit account identifier, the key of the account hot path
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AccountId(pub u64);

impl From<u64> for AccountId {
    fn from(id: u64) -> Self {
        AccountId(id)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl TrieKey for AccountId {
    const KEY_BITS: u16 = 64;

    fn match_len(&self, other: &Self, max: PrefixLenBits) -> PrefixLenBits {
        let diff = self.0 ^ other.0;
        let bits = if diff == 0 {
            Self::KEY_BITS
        } else {
            (diff.leading_zeros() as u16) & !(BRANCH_BITS - 1)
        };
        PrefixLenBits(bits).min(max)
    }

    fn branch_bits(&self, at: PrefixLenBits) -> u8 {
        assert!(
            at.0 < Self::KEY_BITS,
            "branch selector requested past end of key ({})",
            at
        );
        ((self.0 >> (60 - at.0)) & 0x0F) as u8
    }

    fn truncate(&mut self, to: PrefixLenBits) {
        if to.0 == 0 {
            self.0 = 0;
        } else if to.0 < Self::KEY_BITS {
            self.0 &= u64::MAX << (Self::KEY_BITS - to.0);
        }
    }

    fn set_branch_bits(&mut self, at: PrefixLenBits, branch: u8) {
        let shift = 60 - at.0;
        self.0 = (self.0 & !(0x0Fu64 << shift)) | (((branch & 0x0F) as u64) << shift);
    }

    fn write_prefix_bytes(&self, len: PrefixLenBits, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_be_bytes()[..len.num_prefix_bytes()]);
    }

    fn to_key_bytes(&self) -> Vec<u8> {
        self.0.to_be_bytes().to_vec()
    }

    fn from_key_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 8] = bytes.try_into().ok()?;
        Some(AccountId(u64::from_be_bytes(arr)))
    }
}

/// An N-byte key, e.g. a composite order-book key
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteKey<const N: usize>(pub [u8; N]);

impl<const N: usize> ByteKey<N> {
    pub fn new(bytes: [u8; N]) -> Self {
        ByteKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }
}

impl<const N: usize> Default for ByteKey<N> {
    fn default() -> Self {
        ByteKey([0u8; N])
    }
}

impl<const N: usize> fmt::Debug for ByteKey<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteKey({})", hex::encode(self.0))
    }
}

impl<const N: usize> fmt::Display for ByteKey<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl<const N: usize> TrieKey for ByteKey<N> {
    // Headers carry the length in two bytes.
    const KEY_BITS: u16 = {
        assert!(N > 0 && N < 8192, "key width must fit a 16-bit bit count");
        (N * 8) as u16
    };

    fn match_len(&self, other: &Self, max: PrefixLenBits) -> PrefixLenBits {
        bytes_match_len(&self.0, &other.0, max)
    }

    fn branch_bits(&self, at: PrefixLenBits) -> u8 {
        assert!(
            at.0 < Self::KEY_BITS,
            "branch selector requested past end of key ({})",
            at
        );
        nibble_at(&self.0, at)
    }

    fn truncate(&mut self, to: PrefixLenBits) {
        truncate_bytes(&mut self.0, to);
    }

    fn set_branch_bits(&mut self, at: PrefixLenBits, branch: u8) {
        let byte = &mut self.0[at.0 as usize / 8];
        if at.0 % 8 == 0 {
            *byte = (*byte & 0x0F) | (branch << 4);
        } else {
            *byte = (*byte & 0xF0) | (branch & 0x0F);
        }
    }

    fn write_prefix_bytes(&self, len: PrefixLenBits, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0[..len.num_prefix_bytes()]);
    }

    fn to_key_bytes(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    fn from_key_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; N] = bytes.try_into().ok()?;
        Some(ByteKey(arr))
    }
}
