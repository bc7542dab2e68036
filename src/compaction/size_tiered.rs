//! Size-tiered compaction
//!
//! Indexes are merged within duration tiers before being promoted to the
//! next tier, so data is rewritten roughly once per tier. Tiers grow by a
//! factor of three from 2h and stop at a tenth of the retention, or at a
//! hard 31 day cap.
//!
//! Planning follows the leveled compactor of Prometheus TSDB:
//!
//! 1. Overlapping indexes are always merged first.
//! 2. The newest index is held back, it may still be receiving data.
//! 3. For each tier after the first, indexes are bucketed into
//!    tier-aligned windows; the first bucket holding more than one index
//!    that either spans the full tier or ends before the newest
//!    considered index starts is selected.

use crate::compaction::CompactionStrategy;
use crate::index::{covering_range, ClosedChunkIndex};
use crate::storage::{StorageError, StorageResult, TimeRange, TimeResolution};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Largest tier in hours (31 days)
pub const MAX_TIER_HOURS: u64 = 744;

const FIRST_TIER_HOURS: u64 = 2;
const TIER_GROWTH: u64 = 3;

/// Derive tier durations, in hours, from a retention period
///
/// `None` means unbounded retention, which yields every tier up to the cap.
pub fn tiers_for_retention(retention_hours: Option<u64>) -> Vec<u64> {
    let cutoff = retention_hours.map_or(f64::INFINITY, |hours| hours as f64 * 0.1);

    let mut tiers = Vec::new();
    let mut tier = FIRST_TIER_HOURS;
    loop {
        if tier > MAX_TIER_HOURS {
            tiers.push(MAX_TIER_HOURS);
            break;
        }
        if tier as f64 > cutoff {
            break;
        }
        tiers.push(tier);
        tier *= TIER_GROWTH;
    }
    tiers
}

/// Merges indexes of similar time span into wider ones
#[derive(Debug)]
pub struct SizeTieredCompaction {
    /// Tier durations in hours, strictly increasing
    tiers: Vec<u64>,
    frequency: AtomicU64,
    resolution: TimeResolution,
}

impl SizeTieredCompaction {
    pub fn new(tiers: Vec<u64>, frequency_ms: u64, resolution: TimeResolution) -> Self {
        Self {
            tiers,
            frequency: AtomicU64::new(frequency_ms),
            resolution,
        }
    }

    pub fn tiers(&self) -> &[u64] {
        &self.tiers
    }

    pub fn resolution(&self) -> TimeResolution {
        self.resolution
    }

    /// Range a destination index must cover to receive `sources`
    pub fn destination_range(sources: &[Arc<ClosedChunkIndex>]) -> Option<TimeRange> {
        covering_range(sources)
    }

    fn select_tiered(&self, indexes: &[Arc<ClosedChunkIndex>]) -> Vec<Arc<ClosedChunkIndex>> {
        let Some(newest) = indexes.last() else {
            return Vec::new();
        };
        let high_time = newest.min_time();

        for &tier in self.tiers.iter().skip(1) {
            let width = self.resolution.from_hours(tier);
            for group in split_by_range(indexes, width) {
                let (Some(first), Some(last)) = (group.first(), group.last()) else {
                    continue;
                };
                let min_time = first.min_time();
                let max_time = last.max_time();
                if group.len() > 1 && (max_time.saturating_sub(min_time) == width || max_time <= high_time) {
                    return group;
                }
            }
        }

        Vec::new()
    }
}

impl CompactionStrategy for SizeTieredCompaction {
    fn plan(&self, indexes: &[Arc<ClosedChunkIndex>]) -> Vec<Arc<ClosedChunkIndex>> {
        if self.tiers.is_empty() || indexes.len() < 2 {
            return Vec::new();
        }

        let mut sorted = indexes.to_vec();
        sorted.sort_by_key(|i| (i.min_time(), i.max_time()));

        let overlapping = select_overlapping(&sorted);
        if !overlapping.is_empty() {
            return overlapping;
        }

        sorted.pop();
        self.select_tiered(&sorted)
    }

    fn compact(&self, sources: &[Arc<ClosedChunkIndex>], dest: &ClosedChunkIndex) -> StorageResult<()> {
        if sources.is_empty() {
            return Err(StorageError::InvalidIndex("nothing to compact".into()));
        }

        let dest_range = dest.time_range();
        if let Some(source) = sources.iter().find(|s| !dest_range.covers(&s.time_range())) {
            return Err(StorageError::InvalidIndex(format!(
                "destination [{}, {}) does not cover source {} [{}, {})",
                dest_range.start,
                dest_range.end,
                source.id(),
                source.min_time(),
                source.max_time()
            )));
        }

        let mut entries = Vec::new();
        for source in sources {
            entries.extend(source.chunks()?);
        }
        entries.sort_by_key(|e| e.min_time);

        dest.add_chunks(&entries)?;

        tracing::info!(
            "Compacted {} indexes ({} chunks) into {}",
            sources.len(),
            entries.len(),
            dest.id()
        );
        Ok(())
    }

    fn is_in_place_compaction(&self) -> bool {
        false
    }

    fn frequency(&self) -> u64 {
        self.frequency.load(Ordering::Relaxed)
    }

    fn set_frequency(&self, frequency_ms: u64) {
        self.frequency.store(frequency_ms, Ordering::Relaxed);
    }
}

/// First run of overlapping indexes in a `min_time`-sorted list
fn select_overlapping(sorted: &[Arc<ClosedChunkIndex>]) -> Vec<Arc<ClosedChunkIndex>> {
    let mut overlapping = Vec::new();
    let Some(first) = sorted.first() else {
        return overlapping;
    };

    let mut global_max = first.max_time();
    for pair in sorted.windows(2) {
        let (previous, current) = (&pair[0], &pair[1]);
        if current.min_time() < global_max {
            if overlapping.is_empty() {
                overlapping.push(Arc::clone(previous));
            }
            overlapping.push(Arc::clone(current));
        } else if !overlapping.is_empty() {
            break;
        }
        global_max = global_max.max(current.max_time());
    }
    overlapping
}

/// Bucket indexes into windows aligned to multiples of `width`
///
/// Indexes not fully contained in the window of their start are skipped.
fn split_by_range(indexes: &[Arc<ClosedChunkIndex>], width: i64) -> Vec<Vec<Arc<ClosedChunkIndex>>> {
    let mut groups = Vec::new();
    if width <= 0 {
        return groups;
    }

    let mut i = 0;
    while i < indexes.len() {
        let index = &indexes[i];
        let t0 = index.min_time().div_euclid(width).saturating_mul(width);

        if index.max_time() > t0.saturating_add(width) {
            i += 1;
            continue;
        }

        let mut group = Vec::new();
        while i < indexes.len() {
            let candidate = &indexes[i];
            if candidate.max_time() > t0.saturating_add(width) {
                break;
            }
            group.push(Arc::clone(candidate));
            i += 1;
        }

        if !group.is_empty() {
            groups.push(group);
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ChunkEntry;
    use crate::storage::{ChunkAppender, XorChunk};
    use tempfile::{tempdir, TempDir};

    const HOUR: i64 = 3_600_000;

    fn index(dir: &TempDir, start_h: i64, end_h: i64) -> Arc<ClosedChunkIndex> {
        Arc::new(
            ClosedChunkIndex::create_in(
                dir.path(),
                TimeRange::new(start_h * HOUR, end_h * HOUR),
                TimeResolution::Milliseconds,
            )
            .unwrap(),
        )
    }

    fn spans(plan: &[Arc<ClosedChunkIndex>]) -> Vec<(i64, i64)> {
        plan.iter()
            .map(|i| (i.min_time() / HOUR, i.max_time() / HOUR))
            .collect()
    }

    fn strategy(retention_hours: Option<u64>) -> SizeTieredCompaction {
        SizeTieredCompaction::new(
            tiers_for_retention(retention_hours),
            900_000,
            TimeResolution::Milliseconds,
        )
    }

    #[test]
    fn test_tiers_for_retention() {
        assert_eq!(tiers_for_retention(Some(10)), Vec::<u64>::new());
        assert_eq!(tiers_for_retention(Some(168)), vec![2, 6]);
        assert_eq!(tiers_for_retention(Some(200)), vec![2, 6, 18]);
        assert_eq!(tiers_for_retention(Some(720)), vec![2, 6, 18, 54]);
        assert_eq!(tiers_for_retention(Some(2400)), vec![2, 6, 18, 54, 162]);
        assert_eq!(
            tiers_for_retention(Some(8760)),
            vec![2, 6, 18, 54, 162, 486, 744]
        );
    }

    #[test]
    fn test_tiers_unbounded_and_monotonic() {
        assert_eq!(
            tiers_for_retention(None),
            vec![2, 6, 18, 54, 162, 486, 744]
        );

        for hours in [0, 1, 20, 60, 500, 5000, 100_000] {
            let tiers = tiers_for_retention(Some(hours));
            assert!(tiers.windows(2).all(|w| w[0] < w[1]));
            assert!(tiers.iter().all(|&t| t <= MAX_TIER_HOURS));
            assert_eq!(tiers, tiers_for_retention(Some(hours)));
        }
    }

    #[test]
    fn test_plan_empty_without_tiers() {
        let dir = tempdir().unwrap();
        let indexes = vec![index(&dir, 0, 2), index(&dir, 1, 3), index(&dir, 2, 4)];
        assert!(strategy(Some(10)).plan(&indexes).is_empty());
    }

    #[test]
    fn test_plan_full_tier() {
        let dir = tempdir().unwrap();
        let indexes = vec![
            index(&dir, 4, 6),
            index(&dir, 0, 2),
            index(&dir, 6, 8),
            index(&dir, 2, 4),
        ];

        let plan = strategy(Some(168)).plan(&indexes);
        assert_eq!(spans(&plan), vec![(0, 2), (2, 4), (4, 6)]);
    }

    #[test]
    fn test_plan_waits_for_incomplete_tier() {
        let dir = tempdir().unwrap();
        let indexes = vec![index(&dir, 0, 2), index(&dir, 2, 4), index(&dir, 4, 6)];

        assert!(strategy(Some(168)).plan(&indexes).is_empty());
    }

    #[test]
    fn test_plan_closed_partial_tier() {
        let dir = tempdir().unwrap();
        // Gap at 4h-6h: the [0, 6) bucket can no longer grow
        let indexes = vec![
            index(&dir, 0, 2),
            index(&dir, 2, 4),
            index(&dir, 6, 8),
            index(&dir, 8, 10),
        ];

        let plan = strategy(Some(168)).plan(&indexes);
        assert_eq!(spans(&plan), vec![(0, 2), (2, 4)]);
    }

    #[test]
    fn test_plan_overlapping_first() {
        let dir = tempdir().unwrap();
        let indexes = vec![
            index(&dir, 0, 2),
            index(&dir, 2, 4),
            index(&dir, 3, 5),
            index(&dir, 4, 6),
            index(&dir, 10, 12),
        ];

        let plan = strategy(Some(168)).plan(&indexes);
        assert_eq!(spans(&plan), vec![(2, 4), (3, 5), (4, 6)]);
    }

    #[test]
    fn test_plan_at_extreme_timestamps() {
        let dir = tempdir().unwrap();
        let res = TimeResolution::Milliseconds;
        let at = |start: i64, end: i64| {
            Arc::new(ClosedChunkIndex::create_in(dir.path(), TimeRange::new(start, end), res).unwrap())
        };

        let indexes = vec![
            at(i64::MIN, i64::MIN + HOUR),
            at(i64::MIN + HOUR, i64::MIN + 2 * HOUR),
            at(i64::MAX - 2 * HOUR, i64::MAX - HOUR),
            at(i64::MAX - HOUR, i64::MAX),
        ];

        let plan = strategy(None).plan(&indexes);
        let bounds: Vec<_> = plan.iter().map(|i| (i.min_time(), i.max_time())).collect();
        assert_eq!(
            bounds,
            vec![(i64::MIN, i64::MIN + HOUR), (i64::MIN + HOUR, i64::MIN + 2 * HOUR)]
        );
        assert_eq!(split_by_range(&indexes, 6 * HOUR).len(), 2);
    }

    #[test]
    fn test_plan_does_not_mutate_input() {
        let dir = tempdir().unwrap();
        let indexes = vec![index(&dir, 2, 4), index(&dir, 0, 2)];
        let _ = strategy(Some(168)).plan(&indexes);
        assert_eq!(spans(&indexes), vec![(2, 4), (0, 2)]);
    }

    #[test]
    fn test_compact_merges_sorted_chunks() {
        let dir = tempdir().unwrap();
        let a = index(&dir, 0, 2);
        let b = index(&dir, 2, 4);

        let chunk_at = |start: i64| {
            let mut chunk = XorChunk::new();
            let mut appender = chunk.appender();
            appender.append(start, 1.0).unwrap();
            appender.append(start + 1000, 2.0).unwrap();
            ChunkEntry::from_chunk(&chunk).unwrap()
        };
        a.add_chunks(&[chunk_at(0), chunk_at(HOUR)]).unwrap();
        b.add_chunks(&[chunk_at(2 * HOUR)]).unwrap();

        let sources = vec![b.clone(), a.clone()];
        let range = SizeTieredCompaction::destination_range(&sources).unwrap();
        assert_eq!(range, TimeRange::new(0, 4 * HOUR));

        let dest = ClosedChunkIndex::create_in(dir.path(), range, TimeResolution::Milliseconds).unwrap();
        strategy(Some(168)).compact(&sources, &dest).unwrap();

        assert_eq!(dest.segment_count(), 1);
        let mins: Vec<i64> = dest.chunks().unwrap().iter().map(|c| c.min_time).collect();
        assert_eq!(mins, vec![0, HOUR, 2 * HOUR]);
    }

    #[test]
    fn test_compact_rejects_uncovered_destination() {
        let dir = tempdir().unwrap();
        let a = index(&dir, 0, 2);
        let b = index(&dir, 2, 4);
        let dest = index(&dir, 0, 3);

        let result = strategy(Some(168)).compact(&[a, b], &dest);
        assert!(matches!(result, Err(StorageError::InvalidIndex(_))));
    }
}
