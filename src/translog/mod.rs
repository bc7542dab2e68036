//! Write-ahead log retention
//!
//! The write-ahead log ("translog") is a sequence of generations: sealed,
//! read-only readers plus one active writer with the highest generation.
//! A deletion policy answers one question per trimming cycle: what is the
//! oldest generation that must survive? Everything below it may be closed
//! and deleted.
//!
//! - **deletion_policy**: [`DefaultDeletionPolicy`], size/age/file-count retention with retention locks
//! - **rate_limited**: [`RateLimitedRetentionPolicy`], caps how many generations one cycle may release

mod deletion_policy;
mod rate_limited;

pub use deletion_policy::{Clock, DefaultDeletionPolicy, RetentionLock};
pub use rate_limited::RateLimitedRetentionPolicy;

use serde::{Deserialize, Serialize};

/// A sealed log generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslogReader {
    pub generation: u64,
    pub size_in_bytes: u64,
    /// Last modification time, milliseconds since the Unix epoch
    pub last_modified_ms: i64,
}

impl TranslogReader {
    pub fn new(generation: u64, size_in_bytes: u64, last_modified_ms: i64) -> Self {
        Self {
            generation,
            size_in_bytes,
            last_modified_ms,
        }
    }
}

/// The active log generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslogWriter {
    pub generation: u64,
    pub size_in_bytes: u64,
}

impl TranslogWriter {
    pub fn new(generation: u64, size_in_bytes: u64) -> Self {
        Self {
            generation,
            size_in_bytes,
        }
    }
}

/// Decides the oldest generation that must be kept
pub trait DeletionPolicy: Send + Sync {
    /// `readers` are ordered by ascending generation, all below `writer`
    fn min_translog_gen_required(&self, readers: &[TranslogReader], writer: &TranslogWriter) -> u64;
}
