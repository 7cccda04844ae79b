//! Error types for Owonero

use thiserror::Error;

/// Why a block was refused by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("genesis block must have index 0, got {0}")]
    GenesisIndex(u64),
    #[error("genesis block must have an empty prev_hash")]
    GenesisPrevHash,
    #[error("prev_hash mismatch: expected {expected}, got {actual}")]
    PrevHashMismatch { expected: String, actual: String },
    #[error("hash mismatch: stored {stored}, computed {computed}")]
    HashMismatch { stored: String, computed: String },
    #[error("index mismatch: expected {expected}, got {actual}")]
    IndexMismatch { expected: u64, actual: u64 },
    #[error("block {0} has no successor index")]
    IndexOverflow(u64),
    #[error("proof-of-work failure: {hash} does not satisfy difficulty {difficulty}")]
    ProofOfWork { hash: String, difficulty: u32 },
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Invalid block: {0}")]
    Validation(#[from] ValidationError),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Peer replied with error: {0}")]
    Remote(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Mining task failed: {0}")]
    Worker(String),
    #[error("Chain is empty")]
    ChainEmpty,
}

impl ChainError {
    /// Malformed replies get a shorter retry delay than unreachable peers.
    pub fn is_parse_error(&self) -> bool {
        matches!(self, ChainError::Serialization(_) | ChainError::Protocol(_))
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
