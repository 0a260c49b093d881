//! Trie configuration
//!
//! Arena sizing has to cover the worst-case volume of one commitment epoch:
//! running out of buffers is fatal, not retried.

use crate::arena::{MAX_BUFFERS, MAX_BUFFER_SIZE};
use crate::model::DigestScheme;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Smallest allowed buffer: one full child block plus room to spare
pub const MIN_BUFFER_SIZE: u32 = 64;

/// Which leaves contribute to hashes, proofs and the committed size
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashMode {
    /// Leaves marked for deletion are invisible; a branch left with one live
    /// child takes that child's hash.
    #[default]
    LiveOnly,
    /// Every leaf is hashed, marked or not.
    Full,
}

/// Settings node hashing needs; copied into hot loops
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HashSettings {
    pub scheme: DigestScheme,
    pub mode: HashMode,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrieConfig {
    /// Node cells per arena buffer
    pub buffer_size: u32,
    /// Buffers an arena may claim before allocation faults
    pub max_buffers: u16,
    pub digest_scheme: DigestScheme,
    pub hash_mode: HashMode,
    /// Batch-merge ranges covering fewer leaves than this are not split
    pub batch_split_threshold: i64,
    /// Subtrees up to this many leaves are hashed by a single task
    pub hash_grain: i64,
    /// Subtrees up to this many leaves are modified or collected by a single task
    pub apply_grain: i64,
}

impl Default for TrieConfig {
    fn default() -> Self {
        TrieConfig {
            buffer_size: 1 << 15,
            max_buffers: MAX_BUFFERS as u16,
            digest_scheme: DigestScheme::default(),
            hash_mode: HashMode::default(),
            batch_split_threshold: 100,
            hash_grain: 1000,
            apply_grain: 1000,
        }
    }
}

impl TrieConfig {
    /// Load a config from a JSON file and validate it
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let config: TrieConfig = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size < MIN_BUFFER_SIZE || self.buffer_size > MAX_BUFFER_SIZE {
            return Err(Error::Config(format!(
                "buffer_size must be in {}..={}, got {}",
                MIN_BUFFER_SIZE, MAX_BUFFER_SIZE, self.buffer_size
            )));
        }
        if self.max_buffers == 0 || self.max_buffers as usize > MAX_BUFFERS {
            return Err(Error::Config(format!(
                "max_buffers must be in 1..={}, got {}",
                MAX_BUFFERS, self.max_buffers
            )));
        }
        if self.batch_split_threshold < 1 || self.hash_grain < 1 || self.apply_grain < 1 {
            return Err(Error::Config(
                "split threshold and grain sizes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn hash_settings(&self) -> HashSettings {
        HashSettings {
            scheme: self.digest_scheme,
            mode: self.hash_mode,
        }
    }

    /// Small buffers, for tests and tools that build many short-lived tries
    pub fn compact() -> Self {
        TrieConfig {
            buffer_size: 1 << 10,
            ..TrieConfig::default()
        }
    }

    pub fn with_digest_scheme(mut self, scheme: DigestScheme) -> Self {
        self.digest_scheme = scheme;
        self
    }

    pub fn with_hash_mode(mut self, mode: HashMode) -> Self {
        self.hash_mode = mode;
        self
    }
}
