//! Closed chunk indexes
//!
//! A closed chunk index is the unit compaction works on: a directory of
//! immutable segment files covering one half-open time range.
//!
//! - **segment**: Segment file format (header, checksummed records, footer)
//! - **closed_index**: [`ClosedChunkIndex`], the manifest-committed index directory
//!
//! # Layout
//!
//! ```text
//! <data_dir>/
//!   index_<id>/meta.json, seg_000001.tsc, ...
//!   index_<id>/meta.json, seg_000001.tsc, ...
//! ```

mod closed_index;
mod segment;

pub use closed_index::{ClosedChunkIndex, INDEX_DIR_PREFIX, META_FILE};
pub use segment::{ChunkEntry, ChunkMeta, Segment, SegmentHeader, SEGMENT_EXTENSION};

use crate::storage::{StorageResult, TimeRange};
use std::path::Path;
use std::sync::Arc;

/// Open every index under `data_dir`, sorted by time range
///
/// Directories without a manifest are ignored. Indexes that fail to open
/// are logged and skipped so one damaged index cannot stall maintenance.
pub fn load_indexes(data_dir: impl AsRef<Path>) -> StorageResult<Vec<Arc<ClosedChunkIndex>>> {
    let data_dir = data_dir.as_ref();
    let mut indexes = Vec::new();

    if !data_dir.exists() {
        return Ok(indexes);
    }

    for entry in std::fs::read_dir(data_dir)? {
        let path = entry?.path();
        if !path.is_dir() || !path.join(META_FILE).exists() {
            continue;
        }

        match ClosedChunkIndex::open(&path) {
            Ok(index) => indexes.push(Arc::new(index)),
            Err(e) => {
                tracing::warn!("Failed to open index {:?}: {}", path, e);
            }
        }
    }

    indexes.sort_by_key(|i| (i.min_time(), i.max_time()));
    tracing::debug!("Loaded {} indexes from {:?}", indexes.len(), data_dir);
    Ok(indexes)
}

/// Smallest range covering every index, `None` for an empty slice
pub fn covering_range(indexes: &[Arc<ClosedChunkIndex>]) -> Option<TimeRange> {
    indexes
        .iter()
        .map(|i| i.time_range())
        .reduce(|acc, r| acc.union(&r))
}
