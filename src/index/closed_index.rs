//! Closed chunk index
//!
//! An index is a directory holding immutable segment files plus a
//! `meta.json` manifest. The manifest is the commit point: a segment file
//! that is not listed there does not exist as far as readers are concerned.
//!
//! ```text
//! <data_dir>/index_<id>/
//!   meta.json        id, time range, creation time, ordered segment list
//!   seg_000001.tsc
//!   seg_000002.tsc
//! ```

use crate::index::segment::{ChunkEntry, Segment, SEGMENT_EXTENSION};
use crate::storage::{StorageError, StorageResult, TimeRange, TimeResolution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// Manifest file name inside an index directory
pub const META_FILE: &str = "meta.json";

/// Prefix of index directory names created by [`ClosedChunkIndex::create_in`]
pub const INDEX_DIR_PREFIX: &str = "index_";

/// On-disk manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexMeta {
    id: Uuid,
    time_range: TimeRange,
    #[serde(default)]
    resolution: TimeResolution,
    created_at: DateTime<Utc>,
    segments: Vec<String>,
    next_segment: u64,
}

struct IndexState {
    segments: Vec<Segment>,
    next_segment: u64,
}

impl IndexState {
    fn last_min_time(&self) -> Option<i64> {
        self.segments.iter().rev().find_map(Segment::last_chunk_min_time)
    }
}

/// An immutable, time-bounded collection of closed chunks
///
/// Indexes are shared as `Arc<ClosedChunkIndex>` between the planner and
/// the compactor. All mutation goes through `&self`; the segment list sits
/// behind a lock and every change is committed by rewriting `meta.json`.
pub struct ClosedChunkIndex {
    dir: PathBuf,
    id: Uuid,
    time_range: TimeRange,
    resolution: TimeResolution,
    created_at: DateTime<Utc>,
    state: RwLock<IndexState>,
}

impl std::fmt::Debug for ClosedChunkIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosedChunkIndex")
            .field("id", &self.id)
            .field("dir", &self.dir)
            .field("time_range", &self.time_range)
            .field("segments", &self.segment_count())
            .finish()
    }
}

impl ClosedChunkIndex {
    /// Create a new, empty index in `dir`
    pub fn create(
        dir: impl AsRef<Path>,
        time_range: TimeRange,
        resolution: TimeResolution,
    ) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        if dir.join(META_FILE).exists() {
            return Err(StorageError::InvalidIndex(format!(
                "index already exists at {:?}",
                dir
            )));
        }
        std::fs::create_dir_all(&dir)?;

        let index = Self {
            dir,
            id: Uuid::new_v4(),
            time_range,
            resolution,
            created_at: Utc::now(),
            state: RwLock::new(IndexState {
                segments: Vec::new(),
                next_segment: 1,
            }),
        };

        let state = index.read_state()?;
        index.commit(&state)?;
        drop(state);

        tracing::debug!(
            "Created index {} covering [{}, {})",
            index.id,
            time_range.start,
            time_range.end
        );
        Ok(index)
    }

    /// Create a new index in a fresh directory under `data_dir`
    pub fn create_in(
        data_dir: impl AsRef<Path>,
        time_range: TimeRange,
        resolution: TimeResolution,
    ) -> StorageResult<Self> {
        let name = format!("{}{}", INDEX_DIR_PREFIX, Uuid::new_v4().simple());
        Self::create(data_dir.as_ref().join(name), time_range, resolution)
    }

    /// Open an existing index
    pub fn open(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let content = std::fs::read_to_string(dir.join(META_FILE))?;
        let meta: IndexMeta = serde_json::from_str(&content)?;

        if meta.time_range.start >= meta.time_range.end {
            return Err(StorageError::InvalidTimeRange);
        }

        let segments = meta
            .segments
            .iter()
            .map(|name| Segment::open(dir.join(name)))
            .collect::<StorageResult<Vec<_>>>()?;

        Ok(Self {
            dir,
            id: meta.id,
            time_range: meta.time_range,
            resolution: meta.resolution,
            created_at: meta.created_at,
            state: RwLock::new(IndexState {
                segments,
                next_segment: meta.next_segment,
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn time_range(&self) -> TimeRange {
        self.time_range
    }

    /// Inclusive lower bound, in this index's time unit
    pub fn min_time(&self) -> i64 {
        self.time_range.start
    }

    /// Exclusive upper bound, in this index's time unit
    pub fn max_time(&self) -> i64 {
        self.time_range.end
    }

    pub fn resolution(&self) -> TimeResolution {
        self.resolution
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Number of physical segments
    pub fn segment_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .segments
            .len()
    }

    /// Number of chunks across all segments
    pub fn chunk_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .segments
            .iter()
            .map(Segment::chunk_count)
            .sum()
    }

    /// Append chunks as one new segment
    ///
    /// Chunks must be ordered by `min_time`, continuing from the last chunk
    /// already in the index, and must lie inside the index time range. An
    /// empty slice is a no-op.
    pub fn add_chunks(&self, entries: &[ChunkEntry]) -> StorageResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut state = self.write_state()?;

        let mut previous = state.last_min_time();
        for entry in entries {
            if entry.min_time > entry.max_time {
                return Err(StorageError::InvalidIndex(format!(
                    "chunk bounds inverted: min={} max={}",
                    entry.min_time, entry.max_time
                )));
            }
            if !self.time_range.contains(entry.min_time) || !self.time_range.contains(entry.max_time) {
                return Err(StorageError::InvalidIndex(format!(
                    "chunk [{}, {}] outside index range [{}, {})",
                    entry.min_time, entry.max_time, self.time_range.start, self.time_range.end
                )));
            }
            if let Some(prev) = previous {
                if entry.min_time < prev {
                    return Err(StorageError::InvalidIndex(format!(
                        "chunk out of order: min_time {} after {}",
                        entry.min_time, prev
                    )));
                }
            }
            previous = Some(entry.min_time);
        }

        let path = self.segment_path(state.next_segment);
        let segment = Segment::write(&path, entries)?;
        state.segments.push(segment);
        state.next_segment += 1;

        if let Err(e) = self.commit(&state) {
            state.segments.pop();
            state.next_segment -= 1;
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }

        Ok(())
    }

    /// All chunks, in order
    pub fn chunks(&self) -> StorageResult<Vec<ChunkEntry>> {
        let segments = self.read_state()?.segments.clone();

        let mut entries = Vec::new();
        for segment in &segments {
            entries.extend(segment.read_chunks()?);
        }
        Ok(entries)
    }

    /// Rewrite the oldest segments into one so that at most `max_segments` remain
    ///
    /// Returns `true` when segments were merged. Superseded segment files are
    /// removed only after the new manifest is committed.
    pub fn force_merge(&self, max_segments: usize) -> StorageResult<bool> {
        if max_segments == 0 {
            return Err(StorageError::InvalidIndex(
                "force merge target must be at least one segment".into(),
            ));
        }

        let mut state = self.write_state()?;
        let count = state.segments.len();
        if count <= max_segments {
            return Ok(false);
        }

        let merge_count = count - max_segments + 1;
        let mut merged = Vec::new();
        for segment in &state.segments[..merge_count] {
            merged.extend(segment.read_chunks()?);
        }

        let path = self.segment_path(state.next_segment);
        let segment = Segment::write(&path, &merged)?;

        let previous_segments = state.segments.clone();
        let previous_next = state.next_segment;
        let superseded: Vec<Segment> = state.segments.drain(..merge_count).collect();
        state.segments.insert(0, segment);
        state.next_segment += 1;

        if let Err(e) = self.commit(&state) {
            state.segments = previous_segments;
            state.next_segment = previous_next;
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }

        for old in superseded {
            if let Err(e) = std::fs::remove_file(&old.path) {
                tracing::warn!("Failed to remove merged segment {:?}: {}", old.path, e);
            }
        }

        tracing::debug!(
            "Index {} merged {} segments, {} remain",
            self.id,
            merge_count,
            state.segments.len()
        );
        Ok(true)
    }

    /// Remove the index directory and everything in it
    pub fn delete(&self) -> StorageResult<()> {
        let mut state = self.write_state()?;
        std::fs::remove_dir_all(&self.dir)?;
        state.segments.clear();
        tracing::debug!("Deleted index {} at {:?}", self.id, self.dir);
        Ok(())
    }

    fn segment_path(&self, number: u64) -> PathBuf {
        self.dir
            .join(format!("seg_{:06}.{}", number, SEGMENT_EXTENSION))
    }

    /// Write `meta.json` through a temp file and rename
    fn commit(&self, state: &IndexState) -> StorageResult<()> {
        let segments = state
            .segments
            .iter()
            .map(|s| {
                s.file_name().ok_or_else(|| {
                    StorageError::InvalidIndex(format!("segment path has no file name: {:?}", s.path))
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;

        let meta = IndexMeta {
            id: self.id,
            time_range: self.time_range,
            resolution: self.resolution,
            created_at: self.created_at,
            segments,
            next_segment: state.next_segment,
        };

        let content = serde_json::to_string_pretty(&meta)?;
        let tmp_path = self.dir.join(format!("{}.tmp", META_FILE));
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, self.dir.join(META_FILE))?;
        Ok(())
    }

    fn read_state(&self) -> StorageResult<RwLockReadGuard<'_, IndexState>> {
        self.state
            .read()
            .map_err(|_| StorageError::Lock(format!("index {} state poisoned", self.id)))
    }

    fn write_state(&self) -> StorageResult<RwLockWriteGuard<'_, IndexState>> {
        self.state
            .write()
            .map_err(|_| StorageError::Lock(format!("index {} state poisoned", self.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ChunkAppender, ChunkIterator, XorChunk};
    use tempfile::tempdir;

    fn entry(start: i64, count: i64) -> ChunkEntry {
        let mut chunk = XorChunk::new();
        let mut appender = chunk.appender();
        for i in 0..count {
            appender.append(start + i * 10, (start + i) as f64).unwrap();
        }
        ChunkEntry::from_chunk(&chunk).unwrap()
    }

    fn new_index(dir: &Path) -> ClosedChunkIndex {
        ClosedChunkIndex::create(dir.join("idx"), TimeRange::new(0, 10_000), TimeResolution::Milliseconds)
            .unwrap()
    }

    #[test]
    fn test_create_and_reopen() {
        let dir = tempdir().unwrap();
        let index = new_index(dir.path());
        index.add_chunks(&[entry(0, 10), entry(100, 10)]).unwrap();
        index.add_chunks(&[entry(200, 10)]).unwrap();

        assert_eq!(index.segment_count(), 2);
        assert_eq!(index.chunk_count(), 3);

        let reopened = ClosedChunkIndex::open(index.dir()).unwrap();
        assert_eq!(reopened.id(), index.id());
        assert_eq!(reopened.time_range(), TimeRange::new(0, 10_000));
        assert_eq!(reopened.segment_count(), 2);

        let chunks = reopened.chunks().unwrap();
        let mins: Vec<i64> = chunks.iter().map(|c| c.min_time).collect();
        assert_eq!(mins, vec![0, 100, 200]);
    }

    #[test]
    fn test_create_rejects_existing() {
        let dir = tempdir().unwrap();
        let index = new_index(dir.path());
        let again = ClosedChunkIndex::create(index.dir(), TimeRange::new(0, 1), TimeResolution::Milliseconds);
        assert!(matches!(again, Err(StorageError::InvalidIndex(_))));
    }

    #[test]
    fn test_add_chunks_rejects_out_of_order() {
        let dir = tempdir().unwrap();
        let index = new_index(dir.path());
        index.add_chunks(&[entry(500, 5)]).unwrap();

        let result = index.add_chunks(&[entry(100, 5)]);
        assert!(matches!(result, Err(StorageError::InvalidIndex(_))));

        let result = index.add_chunks(&[entry(600, 5), entry(550, 5)]);
        assert!(matches!(result, Err(StorageError::InvalidIndex(_))));
        assert_eq!(index.segment_count(), 1);
    }

    #[test]
    fn test_add_chunks_rejects_out_of_range() {
        let dir = tempdir().unwrap();
        let index = new_index(dir.path());

        // max_time 10_000 equals the exclusive end
        let result = index.add_chunks(&[entry(9_910, 10)]);
        assert!(matches!(result, Err(StorageError::InvalidIndex(_))));
        assert_eq!(index.segment_count(), 0);
    }

    #[test]
    fn test_force_merge() {
        let dir = tempdir().unwrap();
        let index = new_index(dir.path());
        for i in 0..5 {
            index.add_chunks(&[entry(i * 1000, 20)]).unwrap();
        }
        assert_eq!(index.segment_count(), 5);

        assert!(index.force_merge(2).unwrap());
        assert_eq!(index.segment_count(), 2);
        assert_eq!(index.chunk_count(), 5);

        // Order and content survive the merge
        let chunks = index.chunks().unwrap();
        let mins: Vec<i64> = chunks.iter().map(|c| c.min_time).collect();
        assert_eq!(mins, vec![0, 1000, 2000, 3000, 4000]);
        let first: Vec<_> = chunks[0].chunk.chunk_iterator().samples().collect();
        assert_eq!(first.len(), 20);

        // Only committed segments remain on disk
        let seg_files = std::fs::read_dir(index.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == SEGMENT_EXTENSION).unwrap_or(false))
            .count();
        assert_eq!(seg_files, 2);

        let reopened = ClosedChunkIndex::open(index.dir()).unwrap();
        assert_eq!(reopened.segment_count(), 2);
        assert!(!reopened.force_merge(2).unwrap());
    }

    #[test]
    fn test_force_merge_rejects_zero() {
        let dir = tempdir().unwrap();
        let index = new_index(dir.path());
        assert!(index.force_merge(0).is_err());
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let index = new_index(dir.path());
        index.add_chunks(&[entry(0, 3)]).unwrap();

        index.delete().unwrap();
        assert!(!index.dir().exists());
        assert_eq!(index.segment_count(), 0);
    }
}
