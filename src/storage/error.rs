//! Storage layer error types
//!
//! Defines all errors that can occur while encoding chunks, decoding closed
//! chunks and reading or writing closed chunk indexes.

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected (checksum mismatch, invalid magic, truncated payload)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// First byte of a serialized chunk names an encoding this build does not know
    #[error("Unsupported chunk version: {0}")]
    UnsupportedChunkVersion(u8),

    /// Chunk already holds the maximum number of samples
    #[error("Chunk is full: {0} samples")]
    ChunkFull(usize),

    /// Closed chunk index layout or contents are invalid
    #[error("Invalid index: {0}")]
    InvalidIndex(String),

    /// Invalid time range (start >= end)
    #[error("Invalid time range: start must be less than end")]
    InvalidTimeRange,

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
