//! Building and hot-swapping compaction strategies

use crate::compaction::{
    tiers_for_retention, Compaction, CompactionError, CompactionStrategy, CompactionType,
    ForceMergeCompaction, NoopCompaction, SizeTieredCompaction,
};
use crate::config::CompactionConfig;
use crate::index::ClosedChunkIndex;
use crate::settings::{EngineSettings, IndexSettings, SettingKey, SettingsError};
use crate::storage::StorageResult;
use arc_swap::ArcSwap;
use std::sync::{Arc, Weak};

/// Proxy over the active strategy
///
/// Every call loads the current strategy once and runs entirely against
/// it; a concurrent swap is picked up by the next call. Holders of the
/// proxy never need to re-fetch it.
#[derive(Debug)]
pub struct DelegatingCompaction {
    current: ArcSwap<Compaction>,
}

impl DelegatingCompaction {
    pub fn new(compaction: Compaction) -> Self {
        Self {
            current: ArcSwap::from_pointee(compaction),
        }
    }

    /// Snapshot of the active strategy
    pub fn current(&self) -> Arc<Compaction> {
        self.current.load_full()
    }

    /// Install a new strategy
    pub fn set_compaction(&self, compaction: Compaction) {
        self.current.store(Arc::new(compaction));
    }

    pub fn compaction_type(&self) -> CompactionType {
        self.current.load().compaction_type()
    }
}

impl CompactionStrategy for DelegatingCompaction {
    fn plan(&self, indexes: &[Arc<ClosedChunkIndex>]) -> Vec<Arc<ClosedChunkIndex>> {
        self.current().plan(indexes)
    }

    fn compact(&self, sources: &[Arc<ClosedChunkIndex>], dest: &ClosedChunkIndex) -> StorageResult<()> {
        self.current().compact(sources, dest)
    }

    fn is_in_place_compaction(&self) -> bool {
        self.current().is_in_place_compaction()
    }

    fn frequency(&self) -> u64 {
        self.current().frequency()
    }

    fn set_frequency(&self, frequency_ms: u64) {
        self.current().set_frequency(frequency_ms)
    }
}

/// Builds strategies from configuration
pub struct CompactionFactory;

impl CompactionFactory {
    /// Build the strategy named by `config`
    pub fn compaction_for(config: &CompactionConfig) -> Result<Compaction, CompactionError> {
        let frequency = config.frequency.millis();
        let resolution = config.time_unit;

        match CompactionType::from_name(&config.compaction_type) {
            CompactionType::SizeTieredCompaction => {
                let retention_hours = config.retention_time.map(|t| t.hours());
                Ok(Compaction::SizeTiered(SizeTieredCompaction::new(
                    tiers_for_retention(retention_hours),
                    frequency,
                    resolution,
                )))
            }
            CompactionType::ForceMergeCompaction => Ok(Compaction::ForceMerge(ForceMergeCompaction::new(
                frequency,
                config.force_merge_min_segment_count,
                config.force_merge_max_segments_after_merge,
                config.ooo_cutoff.millis(),
                config.block_duration.millis(),
                resolution,
            )?)),
            CompactionType::Noop => Ok(Compaction::Noop(NoopCompaction::new())),
            CompactionType::Invalid => Err(CompactionError::UnknownType(config.compaction_type.clone())),
        }
    }

    /// Build the delegating proxy for a unit and keep it in sync with its settings
    pub fn create(settings: &IndexSettings) -> Result<Arc<DelegatingCompaction>, CompactionError> {
        let initial = Self::compaction_for(&settings.get().compaction)?;
        tracing::info!(
            "Index [{}] using {} compaction",
            settings.name(),
            initial.compaction_type()
        );

        let delegating = Arc::new(DelegatingCompaction::new(initial));
        let index = settings.name().to_string();

        for key in [
            SettingKey::CompactionType,
            SettingKey::ForceMergeMinSegmentCount,
            SettingKey::ForceMergeMaxSegmentsAfterMerge,
        ] {
            settings.add_update_consumer(key, rebuild_on_update(Arc::downgrade(&delegating), key, index.clone()));
        }

        let weak = Arc::downgrade(&delegating);
        settings.add_update_consumer(SettingKey::CompactionFrequency, move |updated: &EngineSettings| {
            if let Some(compaction) = weak.upgrade() {
                let frequency = updated.compaction.frequency;
                compaction.set_frequency(frequency.millis());
                tracing::info!("Index [{}] compaction frequency updated to {}", index, frequency);
            }
            Ok(())
        });

        Ok(delegating)
    }
}

fn rebuild_on_update(
    target: Weak<DelegatingCompaction>,
    key: SettingKey,
    index: String,
) -> impl Fn(&EngineSettings) -> Result<(), SettingsError> + Send + Sync + 'static {
    move |updated: &EngineSettings| {
        let Some(delegating) = target.upgrade() else {
            return Ok(());
        };
        let compaction = CompactionFactory::compaction_for(&updated.compaction)?;
        tracing::info!(
            "Index [{}] {} changed, switching to {} compaction",
            index,
            key,
            compaction.compaction_type()
        );
        delegating.set_compaction(compaction);
        Ok(())
    }
}
