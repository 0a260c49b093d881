//! Error types for ledger_trie
//!
//! Only recoverable failures live here. Broken trie invariants and arena
//! exhaustion are programming or sizing errors and panic at the fault site.

use thiserror::Error;

/// Result type alias for ledger_trie operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ledger_trie operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Insufficient endowment: requested {requested}, available {available}")]
    InsufficientEndowment { requested: i64, available: i64 },

    #[error("Endowment threshold must not be negative: {0}")]
    NegativeEndowment(i64),

    #[error("Config error: {0}")]
    Config(String),
}
