//! Force-merge compaction
//!
//! Old indexes accumulate one physical segment per flush. Once an index is
//! safely outside the out-of-order window and has at least
//! `min_segment_count` segments, it is rewritten in place down to
//! `max_segments_after_merge` segments.

use crate::compaction::{CompactionError, CompactionStrategy};
use crate::index::ClosedChunkIndex;
use crate::storage::{StorageResult, TimeResolution};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct ForceMergeCompaction {
    frequency: AtomicU64,
    min_segment_count: usize,
    max_segments_after_merge: usize,
    ooo_cutoff_window_ms: u64,
    block_duration_ms: u64,
    resolution: TimeResolution,
}

impl ForceMergeCompaction {
    /// Build a force-merge strategy
    ///
    /// Fails when `max_segments_after_merge` is zero or larger than
    /// `min_segment_count`.
    pub fn new(
        frequency_ms: u64,
        min_segment_count: usize,
        max_segments_after_merge: usize,
        ooo_cutoff_window_ms: u64,
        block_duration_ms: u64,
        resolution: TimeResolution,
    ) -> Result<Self, CompactionError> {
        if max_segments_after_merge == 0 || max_segments_after_merge > min_segment_count {
            return Err(CompactionError::InvalidForceMergeBounds {
                min: min_segment_count,
                max: max_segments_after_merge,
            });
        }

        Ok(Self {
            frequency: AtomicU64::new(frequency_ms),
            min_segment_count,
            max_segments_after_merge,
            ooo_cutoff_window_ms,
            block_duration_ms,
            resolution,
        })
    }

    pub fn min_segment_count(&self) -> usize {
        self.min_segment_count
    }

    pub fn max_segments_after_merge(&self) -> usize {
        self.max_segments_after_merge
    }

    /// Indexes ending at or after this time are still too fresh to merge
    fn cutoff(&self, indexes: &[Arc<ClosedChunkIndex>]) -> Option<i64> {
        let reference = indexes.iter().map(|i| i.max_time()).max()?;
        Some(
            reference
                .saturating_sub(self.resolution.from_millis(self.ooo_cutoff_window_ms))
                .saturating_sub(self.resolution.from_millis(self.block_duration_ms)),
        )
    }
}

impl CompactionStrategy for ForceMergeCompaction {
    fn plan(&self, indexes: &[Arc<ClosedChunkIndex>]) -> Vec<Arc<ClosedChunkIndex>> {
        let Some(cutoff) = self.cutoff(indexes) else {
            return Vec::new();
        };

        indexes
            .iter()
            .filter(|i| i.max_time() < cutoff)
            .filter(|i| {
                let segments = i.segment_count();
                segments >= self.min_segment_count && segments > self.max_segments_after_merge
            })
            .min_by_key(|i| (i.min_time(), i.max_time()))
            .cloned()
            .into_iter()
            .collect()
    }

    fn compact(&self, sources: &[Arc<ClosedChunkIndex>], _dest: &ClosedChunkIndex) -> StorageResult<()> {
        for source in sources {
            let before = source.segment_count();
            if source.force_merge(self.max_segments_after_merge)? {
                tracing::info!(
                    "Force merged index {} from {} to {} segments",
                    source.id(),
                    before,
                    source.segment_count()
                );
            }
        }
        Ok(())
    }

    fn is_in_place_compaction(&self) -> bool {
        true
    }

    fn frequency(&self) -> u64 {
        self.frequency.load(Ordering::Relaxed)
    }

    fn set_frequency(&self, frequency_ms: u64) {
        self.frequency.store(frequency_ms, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ChunkEntry;
    use crate::storage::{ChunkAppender, TimeRange, XorChunk};
    use tempfile::{tempdir, TempDir};

    const HOUR: i64 = 3_600_000;
    const MINUTE: u64 = 60_000;

    fn index(dir: &TempDir, start_h: i64, end_h: i64, segments: usize) -> Arc<ClosedChunkIndex> {
        let index = ClosedChunkIndex::create_in(
            dir.path(),
            TimeRange::new(start_h * HOUR, end_h * HOUR),
            TimeResolution::Milliseconds,
        )
        .unwrap();

        for s in 0..segments {
            let mut chunk = XorChunk::new();
            chunk
                .appender()
                .append(start_h * HOUR + s as i64 * 1000, s as f64)
                .unwrap();
            index.add_chunks(&[ChunkEntry::from_chunk(&chunk).unwrap()]).unwrap();
        }
        Arc::new(index)
    }

    fn strategy(min: usize, max: usize) -> ForceMergeCompaction {
        ForceMergeCompaction::new(
            15 * MINUTE,
            min,
            max,
            20 * MINUTE,
            2 * HOUR as u64,
            TimeResolution::Milliseconds,
        )
        .unwrap()
    }

    #[test]
    fn test_bounds_validation() {
        let res = TimeResolution::Milliseconds;
        assert_eq!(
            ForceMergeCompaction::new(MINUTE, 2, 3, 0, 0, res).unwrap_err(),
            CompactionError::InvalidForceMergeBounds { min: 2, max: 3 }
        );
        assert!(ForceMergeCompaction::new(MINUTE, 2, 0, 0, 0, res).is_err());
        assert!(ForceMergeCompaction::new(MINUTE, 2, 2, 0, 0, res).is_ok());
    }

    #[test]
    fn test_plan_excludes_recent_window() {
        let dir = tempdir().unwrap();
        // reference = 10h, cutoff = 10h - 20m - 2h = 7h40m
        let indexes = vec![
            index(&dir, 0, 2, 3),
            index(&dir, 6, 8, 3),
            index(&dir, 8, 10, 3),
        ];

        let plan = strategy(2, 1).plan(&indexes);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].min_time(), 0);
    }

    #[test]
    fn test_plan_cutoff_is_strict() {
        let dir = tempdir().unwrap();
        // cutoff lands exactly on the first index's max_time
        let s = ForceMergeCompaction::new(MINUTE, 2, 1, 0, 2 * HOUR as u64, TimeResolution::Milliseconds).unwrap();
        let indexes = vec![index(&dir, 0, 2, 3), index(&dir, 2, 4, 1)];

        assert!(s.plan(&indexes).is_empty());
    }

    #[test]
    fn test_plan_requires_min_segments() {
        let dir = tempdir().unwrap();
        let indexes = vec![
            index(&dir, 0, 2, 1),
            index(&dir, 2, 4, 2),
            index(&dir, 20, 22, 1),
        ];

        let plan = strategy(2, 1).plan(&indexes);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].min_time(), 2 * HOUR);

        assert!(strategy(3, 1).plan(&indexes).is_empty());
        assert!(strategy(2, 1).plan(&[]).is_empty());
    }

    #[test]
    fn test_compact_in_place() {
        let dir = tempdir().unwrap();
        let old = index(&dir, 0, 2, 4);
        let s = strategy(2, 1);
        assert!(s.is_in_place_compaction());

        s.compact(std::slice::from_ref(&old), &old).unwrap();
        assert_eq!(old.segment_count(), 1);
        assert_eq!(old.chunk_count(), 4);
    }

    #[test]
    fn test_frequency_update() {
        let s = strategy(2, 1);
        assert_eq!(s.frequency(), 15 * MINUTE);
        s.set_frequency(5 * MINUTE);
        assert_eq!(s.frequency(), 5 * MINUTE);
    }
}
