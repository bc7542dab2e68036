//! Live per-index settings
//!
//! [`IndexSettings`] holds the current [`EngineSettings`] snapshot of one
//! storage unit and the callbacks that react to changes. Updates are
//! applied transactionally: the candidate snapshot is validated, every
//! callback registered for the changed key runs against it, and only then
//! is it committed. A failing callback leaves the stored snapshot as it was.

use crate::compaction::{CompactionError, MIN_FREQUENCY_MS};
use crate::config::{CompactionConfig, Config, TimeValue, TranslogConfig};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

/// Settings snapshot of one storage unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineSettings {
    pub compaction: CompactionConfig,
    pub translog: TranslogConfig,
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            compaction: config.compaction.clone(),
            translog: config.translog.clone(),
        }
    }
}

/// Dynamically updatable settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    CompactionType,
    CompactionFrequency,
    ForceMergeMinSegmentCount,
    ForceMergeMaxSegmentsAfterMerge,
    TranslogRateLimitPercentage,
}

impl SettingKey {
    pub fn name(&self) -> &'static str {
        match self {
            SettingKey::CompactionType => "compaction.type",
            SettingKey::CompactionFrequency => "compaction.frequency",
            SettingKey::ForceMergeMinSegmentCount => "compaction.force_merge_min_segment_count",
            SettingKey::ForceMergeMaxSegmentsAfterMerge => "compaction.force_merge_max_segments_after_merge",
            SettingKey::TranslogRateLimitPercentage => "translog.max_readers_to_close_percentage",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single settings change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingUpdate {
    CompactionType(String),
    CompactionFrequency(TimeValue),
    ForceMergeMinSegmentCount(usize),
    ForceMergeMaxSegmentsAfterMerge(usize),
    TranslogRateLimitPercentage(u8),
}

impl SettingUpdate {
    pub fn key(&self) -> SettingKey {
        match self {
            SettingUpdate::CompactionType(_) => SettingKey::CompactionType,
            SettingUpdate::CompactionFrequency(_) => SettingKey::CompactionFrequency,
            SettingUpdate::ForceMergeMinSegmentCount(_) => SettingKey::ForceMergeMinSegmentCount,
            SettingUpdate::ForceMergeMaxSegmentsAfterMerge(_) => SettingKey::ForceMergeMaxSegmentsAfterMerge,
            SettingUpdate::TranslogRateLimitPercentage(_) => SettingKey::TranslogRateLimitPercentage,
        }
    }

    fn apply_to(self, settings: &mut EngineSettings) {
        match self {
            SettingUpdate::CompactionType(name) => settings.compaction.compaction_type = name,
            SettingUpdate::CompactionFrequency(frequency) => settings.compaction.frequency = frequency,
            SettingUpdate::ForceMergeMinSegmentCount(count) => {
                settings.compaction.force_merge_min_segment_count = count
            }
            SettingUpdate::ForceMergeMaxSegmentsAfterMerge(count) => {
                settings.compaction.force_merge_max_segments_after_merge = count
            }
            SettingUpdate::TranslogRateLimitPercentage(percentage) => {
                settings.translog.max_readers_to_close_percentage = percentage
            }
        }
    }
}

/// Errors raised while applying settings
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error(transparent)]
    Compaction(#[from] CompactionError),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: SettingKey, reason: String },

    #[error("Settings lock poisoned")]
    Lock,
}

type UpdateConsumer = Arc<dyn Fn(&EngineSettings) -> Result<(), SettingsError> + Send + Sync>;

/// Settings holder of one storage unit
pub struct IndexSettings {
    name: String,
    current: RwLock<EngineSettings>,
    consumers: RwLock<Vec<(SettingKey, UpdateConsumer)>>,
    apply_lock: Mutex<()>,
}

impl fmt::Debug for IndexSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexSettings")
            .field("name", &self.name)
            .field("current", &self.get())
            .finish()
    }
}

impl IndexSettings {
    /// Create a settings holder, rejecting an invalid initial snapshot
    pub fn new(name: impl Into<String>, settings: EngineSettings) -> Result<Self, SettingsError> {
        validate(&settings)?;
        Ok(Self {
            name: name.into(),
            current: RwLock::new(settings),
            consumers: RwLock::new(Vec::new()),
            apply_lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current snapshot
    pub fn get(&self) -> EngineSettings {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Register a callback for changes to `key`
    ///
    /// Callbacks run in registration order against the candidate snapshot.
    pub fn add_update_consumer<F>(&self, key: SettingKey, consumer: F)
    where
        F: Fn(&EngineSettings) -> Result<(), SettingsError> + Send + Sync + 'static,
    {
        self.consumers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((key, Arc::new(consumer)));
    }

    /// Apply one update
    pub fn apply(&self, update: SettingUpdate) -> Result<(), SettingsError> {
        let _guard = self.apply_lock.lock().map_err(|_| SettingsError::Lock)?;
        let key = update.key();

        let mut candidate = self.get();
        update.apply_to(&mut candidate);

        if let Err(e) = validate(&candidate) {
            tracing::warn!("Index [{}] rejected update to {}: {}", self.name, key, e);
            return Err(e);
        }

        let consumers: Vec<UpdateConsumer> = self
            .consumers
            .read()
            .map_err(|_| SettingsError::Lock)?
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, c)| Arc::clone(c))
            .collect();

        for consumer in consumers {
            if let Err(e) = consumer(&candidate) {
                tracing::warn!("Index [{}] rejected update to {}: {}", self.name, key, e);
                return Err(e);
            }
        }

        *self.current.write().map_err(|_| SettingsError::Lock)? = candidate;
        Ok(())
    }
}

fn validate(settings: &EngineSettings) -> Result<(), SettingsError> {
    let frequency = settings.compaction.frequency.millis();
    if frequency < MIN_FREQUENCY_MS {
        return Err(CompactionError::InvalidFrequency(frequency).into());
    }

    let percentage = settings.translog.max_readers_to_close_percentage;
    if percentage > 100 {
        return Err(SettingsError::InvalidValue {
            key: SettingKey::TranslogRateLimitPercentage,
            reason: format!("{} is not between 0 and 100", percentage),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_invalid_initial_frequency() {
        let mut engine = EngineSettings::default();
        engine.compaction.frequency = TimeValue::from_secs(59);

        let err = IndexSettings::new("idx", engine).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Compaction(CompactionError::InvalidFrequency(59_000))
        ));
    }

    #[test]
    fn test_apply_commits_and_notifies_matching_key() {
        let settings = IndexSettings::new("idx", EngineSettings::default()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&calls);
        settings.add_update_consumer(SettingKey::TranslogRateLimitPercentage, move |s| {
            assert_eq!(s.translog.max_readers_to_close_percentage, 40);
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        settings.add_update_consumer(SettingKey::CompactionType, |_| {
            panic!("wrong key notified")
        });

        settings
            .apply(SettingUpdate::TranslogRateLimitPercentage(40))
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(settings.get().translog.max_readers_to_close_percentage, 40);
    }

    #[test]
    fn test_validation_failure_skips_consumers() {
        let settings = IndexSettings::new("idx", EngineSettings::default()).unwrap();
        settings.add_update_consumer(SettingKey::CompactionFrequency, |_| {
            panic!("consumer ran for an invalid value")
        });

        let err = settings
            .apply(SettingUpdate::CompactionFrequency(TimeValue::from_secs(10)))
            .unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Compaction(CompactionError::InvalidFrequency(_))
        ));

        let err = settings
            .apply(SettingUpdate::TranslogRateLimitPercentage(150))
            .unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue { .. }));
        assert_eq!(settings.get(), EngineSettings::default());
    }

    #[test]
    fn test_consumer_failure_rolls_back() {
        let settings = IndexSettings::new("idx", EngineSettings::default()).unwrap();
        settings.add_update_consumer(SettingKey::CompactionType, |s| {
            Err(CompactionError::UnknownType(s.compaction.compaction_type.clone()).into())
        });

        assert!(settings
            .apply(SettingUpdate::CompactionType("Other".into()))
            .is_err());
        assert_eq!(settings.get().compaction.compaction_type, "SizeTieredCompaction");
    }

    #[test]
    fn test_key_names() {
        assert_eq!(SettingKey::CompactionType.to_string(), "compaction.type");
        assert_eq!(
            SettingUpdate::ForceMergeMinSegmentCount(3).key(),
            SettingKey::ForceMergeMinSegmentCount
        );
    }
}
