//! Error types for the credit ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Credit ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Balance below the required amount
    #[error("insufficient credits: required {required}, available {available}")]
    InsufficientCredits {
        /// Credits the operation needed
        required: i64,
        /// Credits the account had
        available: i64,
    },

    /// Account has no balance row (administrative paths only)
    #[error("account not found: {0}")]
    AccountNotFound(String),

    /// Rejected amount validation: zero or overdrawing adjustments, and
    /// non-positive grants. The message names the offending operation.
    #[error("invalid adjustment: {0}")]
    InvalidAdjustment(String),

    /// Storage error (RocksDB)
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
