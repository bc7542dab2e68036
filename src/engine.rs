//! Maintenance Engine
//!
//! The owning unit for one data directory: it builds the compaction proxy
//! and the retention policy from its settings, wires their update
//! callbacks, and runs compaction cycles on request. Scheduling is left to
//! the caller; [`MaintenanceEngine::next_run_in`] reports the interval the
//! active strategy asks for.

use crate::compaction::{CompactionFactory, CompactionStrategy, CompactionType, DelegatingCompaction};
use crate::index::{covering_range, load_indexes, ClosedChunkIndex};
use crate::metrics::MetricTags;
use crate::settings::{IndexSettings, SettingUpdate, SettingsError};
use crate::storage::{StorageError, StorageResult};
use crate::translog::{DefaultDeletionPolicy, DeletionPolicy, RateLimitedRetentionPolicy, TranslogReader, TranslogWriter};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// What one compaction cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleOutcome {
    /// Indexes selected by the plan
    pub planned: Vec<Uuid>,
    /// Index created to receive the merge, for strategies that are not in place
    pub created: Option<Uuid>,
    pub in_place: bool,
}

impl CycleOutcome {
    pub fn is_empty(&self) -> bool {
        self.planned.is_empty()
    }
}

pub struct MaintenanceEngine {
    data_dir: PathBuf,
    settings: Arc<IndexSettings>,
    compaction: Arc<DelegatingCompaction>,
    retention: Arc<RateLimitedRetentionPolicy>,
}

impl std::fmt::Debug for MaintenanceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintenanceEngine")
            .field("data_dir", &self.data_dir)
            .field("compaction", &self.compaction.compaction_type())
            .finish()
    }
}

impl MaintenanceEngine {
    /// Open the engine for `data_dir`, creating the directory if needed
    pub fn open(data_dir: impl AsRef<Path>, settings: IndexSettings) -> StorageResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let settings = Arc::new(settings);
        let compaction = CompactionFactory::create(&settings)?;

        let translog = settings.get().translog;
        let tags = MetricTags::new().tag("index", settings.name());
        let retention = Arc::new(RateLimitedRetentionPolicy::new(
            DefaultDeletionPolicy::new(
                translog.retention_size,
                translog.retention_age.map(|age| age.millis()),
                translog.retention_total_files,
            ),
            translog.max_readers_to_close_percentage,
            tags,
        ));
        retention.register(&settings);

        tracing::info!(
            "Opened maintenance engine for [{}] at {:?}",
            settings.name(),
            data_dir
        );

        Ok(Self {
            data_dir,
            settings,
            compaction,
            retention,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn compaction(&self) -> Arc<DelegatingCompaction> {
        Arc::clone(&self.compaction)
    }

    pub fn compaction_type(&self) -> CompactionType {
        self.compaction.compaction_type()
    }

    pub fn retention_policy(&self) -> Arc<RateLimitedRetentionPolicy> {
        Arc::clone(&self.retention)
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub fn apply_setting(&self, update: SettingUpdate) -> Result<(), SettingsError> {
        self.settings.apply(update)
    }

    /// Interval until the next cycle; `None` when compaction is disabled
    pub fn next_run_in(&self) -> Option<Duration> {
        match self.compaction.frequency() {
            u64::MAX => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Current indexes, sorted by time range
    pub fn indexes(&self) -> StorageResult<Vec<Arc<ClosedChunkIndex>>> {
        load_indexes(&self.data_dir)
    }

    /// Indexes the active strategy would merge next
    pub fn plan(&self) -> StorageResult<Vec<Arc<ClosedChunkIndex>>> {
        let indexes = self.indexes()?;
        Ok(self.compaction.plan(&indexes))
    }

    /// Plan and compact once
    ///
    /// The strategy is loaded once at entry; a swap during the cycle takes
    /// effect on the next one. Sources of a non-in-place merge are deleted
    /// only after the destination is complete; if the merge fails the
    /// destination is removed and the sources stay untouched.
    pub fn run_compaction_cycle(&self) -> StorageResult<CycleOutcome> {
        let strategy = self.compaction.current();
        let indexes = self.indexes()?;
        let planned = strategy.plan(&indexes);

        let mut outcome = CycleOutcome {
            planned: planned.iter().map(|i| i.id()).collect(),
            created: None,
            in_place: strategy.is_in_place_compaction(),
        };
        if planned.is_empty() {
            tracing::debug!("No compaction candidates among {} indexes", indexes.len());
            return Ok(outcome);
        }

        if outcome.in_place {
            for index in &planned {
                strategy.compact(std::slice::from_ref(index), index)?;
            }
            return Ok(outcome);
        }

        let range = covering_range(&planned)
            .ok_or_else(|| StorageError::InvalidIndex("empty compaction plan".into()))?;
        let resolution = planned[0].resolution();
        let dest = ClosedChunkIndex::create_in(&self.data_dir, range, resolution)?;

        if let Err(e) = strategy.compact(&planned, &dest) {
            tracing::error!("Compaction into {} failed: {}", dest.id(), e);
            if let Err(cleanup) = dest.delete() {
                tracing::warn!("Failed to remove partial index {:?}: {}", dest.dir(), cleanup);
            }
            return Err(e);
        }

        delete_sources(&planned)?;

        tracing::info!(
            "Compaction cycle merged {} indexes into {}",
            planned.len(),
            dest.id()
        );
        outcome.created = Some(dest.id());
        Ok(outcome)
    }

    /// Oldest write-ahead log generation that must survive this trimming cycle
    pub fn min_translog_gen_required(&self, readers: &[TranslogReader], writer: &TranslogWriter) -> u64 {
        self.retention.min_translog_gen_required(readers, writer)
    }
}

/// Delete every merged source, reporting the first failure after trying them all
fn delete_sources(sources: &[Arc<ClosedChunkIndex>]) -> StorageResult<()> {
    let mut first_error = None;
    for source in sources {
        if let Err(e) = source.delete() {
            tracing::warn!(
                "Failed to delete merged index {} at {:?}: {}",
                source.id(),
                source.dir(),
                e
            );
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeValue;
    use crate::index::ChunkEntry;
    use crate::settings::EngineSettings;
    use crate::storage::{ChunkAppender, TimeRange, TimeResolution, XorChunk};
    use tempfile::tempdir;

    const HOUR: i64 = 3_600_000;

    fn engine_with(dir: &Path, compaction_type: &str) -> MaintenanceEngine {
        let mut engine = EngineSettings::default();
        engine.compaction.compaction_type = compaction_type.to_string();
        engine.compaction.retention_time = Some(TimeValue::from_days(7));
        let settings = IndexSettings::new("metrics", engine).unwrap();
        MaintenanceEngine::open(dir, settings).unwrap()
    }

    fn add_index(dir: &Path, start_h: i64, end_h: i64, segments: usize) -> Arc<ClosedChunkIndex> {
        let index = ClosedChunkIndex::create_in(
            dir,
            TimeRange::new(start_h * HOUR, end_h * HOUR),
            TimeResolution::Milliseconds,
        )
        .unwrap();
        for s in 0..segments as i64 {
            let mut chunk = XorChunk::new();
            let mut appender = chunk.appender();
            for i in 0..10 {
                appender
                    .append(start_h * HOUR + s * 60_000 + i * 1000, (s + i) as f64)
                    .unwrap();
            }
            index.add_chunks(&[ChunkEntry::from_chunk(&chunk).unwrap()]).unwrap();
        }
        Arc::new(index)
    }

    #[test]
    fn test_size_tiered_cycle_replaces_sources() {
        let dir = tempdir().unwrap();
        let engine = engine_with(dir.path(), "SizeTieredCompaction");
        for (start, end) in [(0, 2), (2, 4), (4, 6), (6, 8)] {
            add_index(dir.path(), start, end, 1);
        }

        let outcome = engine.run_compaction_cycle().unwrap();
        assert_eq!(outcome.planned.len(), 3);
        assert!(!outcome.in_place);
        let created = outcome.created.unwrap();

        let indexes = engine.indexes().unwrap();
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[0].id(), created);
        assert_eq!(indexes[0].time_range(), TimeRange::new(0, 6 * HOUR));
        assert_eq!(indexes[0].chunk_count(), 3);

        // nothing left to merge until the next tier fills up
        assert!(engine.run_compaction_cycle().unwrap().is_empty());
    }

    #[test]
    fn test_failed_source_delete_does_not_stop_the_rest() {
        let dir = tempdir().unwrap();
        let sources = vec![
            add_index(dir.path(), 0, 2, 1),
            add_index(dir.path(), 2, 4, 1),
            add_index(dir.path(), 4, 6, 1),
        ];
        std::fs::remove_dir_all(sources[1].dir()).unwrap();

        let err = delete_sources(&sources).unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        assert!(!sources[0].dir().exists());
        assert!(!sources[2].dir().exists());
    }

    #[test]
    fn test_force_merge_cycle_in_place() {
        let dir = tempdir().unwrap();
        let engine = engine_with(dir.path(), "ForceMergeCompaction");
        let old = add_index(dir.path(), 0, 2, 3);
        add_index(dir.path(), 10, 12, 3);

        let outcome = engine.run_compaction_cycle().unwrap();
        assert!(outcome.in_place);
        assert_eq!(outcome.planned, vec![old.id()]);
        assert_eq!(outcome.created, None);

        let reopened = ClosedChunkIndex::open(old.dir()).unwrap();
        assert_eq!(reopened.segment_count(), 1);
        assert_eq!(reopened.chunk_count(), 3);
    }

    #[test]
    fn test_swap_between_cycles() {
        let dir = tempdir().unwrap();
        let engine = engine_with(dir.path(), "SizeTieredCompaction");
        let proxy = engine.compaction();
        assert_eq!(engine.next_run_in(), Some(Duration::from_secs(15 * 60)));

        engine
            .apply_setting(SettingUpdate::CompactionType("Noop".into()))
            .unwrap();
        assert_eq!(proxy.compaction_type(), CompactionType::Noop);
        assert_eq!(engine.next_run_in(), None);

        add_index(dir.path(), 0, 2, 1);
        add_index(dir.path(), 1, 3, 1);
        assert!(engine.run_compaction_cycle().unwrap().is_empty());
        assert_eq!(engine.indexes().unwrap().len(), 2);
    }

    #[test]
    fn test_retention_follows_settings() {
        let dir = tempdir().unwrap();
        let mut engine_settings = EngineSettings::default();
        engine_settings.translog.retention_size = Some(0);
        engine_settings.translog.retention_age = Some(TimeValue::from_millis(0));
        engine_settings.translog.retention_total_files = 0;
        let engine = MaintenanceEngine::open(dir.path(), IndexSettings::new("t", engine_settings).unwrap()).unwrap();

        let readers: Vec<_> = (1..=10).map(|g| TranslogReader::new(g, 0, 0)).collect();
        let writer = TranslogWriter::new(11, 0);
        assert_eq!(engine.min_translog_gen_required(&readers, &writer), 11);

        engine
            .apply_setting(SettingUpdate::TranslogRateLimitPercentage(50))
            .unwrap();
        assert_eq!(engine.min_translog_gen_required(&readers, &writer), 6);
        assert_eq!(engine.retention_policy().max_readers_to_close_percentage(), 50);
    }

    #[test]
    fn test_open_rejects_unknown_type() {
        let dir = tempdir().unwrap();
        let mut engine = EngineSettings::default();
        engine.compaction.compaction_type = "Tiered".into();
        let settings = IndexSettings::new("x", engine).unwrap();

        let err = MaintenanceEngine::open(dir.path(), settings).unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }
}
