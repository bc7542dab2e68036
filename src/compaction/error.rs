//! Compaction configuration errors

use crate::storage::StorageError;
use thiserror::Error;

/// Errors raised while building or reconfiguring a compaction strategy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompactionError {
    /// Configured type name does not map to a known strategy
    #[error("Unknown compaction type: '{0}'")]
    UnknownType(String),

    /// Force-merge target exceeds its trigger, or either is zero
    #[error(
        "Invalid force merge bounds: max_segments_after_merge ({max}) must be between 1 and min_segment_count ({min})"
    )]
    InvalidForceMergeBounds { min: usize, max: usize },

    /// Compaction frequency below the one minute floor
    #[error("Invalid compaction frequency: {0}ms, must be at least 1m")]
    InvalidFrequency(u64),
}

impl From<CompactionError> for StorageError {
    fn from(err: CompactionError) -> Self {
        StorageError::Config(err.to_string())
    }
}
