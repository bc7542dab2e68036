//! Rate-limited retention
//!
//! Releasing many sealed generations in one trimming cycle holds the log's
//! write lock for a long time and shows up as write latency spikes. This
//! wrapper lets only a percentage of the eligible readers go per cycle;
//! the rest are released on later cycles.

use crate::metrics::{MetricTags, RetentionMetrics, TracingMetrics};
use crate::settings::{EngineSettings, IndexSettings, SettingKey};
use crate::translog::{DefaultDeletionPolicy, DeletionPolicy, TranslogReader, TranslogWriter};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub struct RateLimitedRetentionPolicy<P = DefaultDeletionPolicy> {
    inner: P,
    max_readers_to_close_percentage: AtomicU8,
    metric_tags: MetricTags,
    metrics: Arc<dyn RetentionMetrics>,
    evaluation: Mutex<()>,
}

impl<P: std::fmt::Debug> std::fmt::Debug for RateLimitedRetentionPolicy<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedRetentionPolicy")
            .field("inner", &self.inner)
            .field("percentage", &self.max_readers_to_close_percentage())
            .field("metric_tags", &self.metric_tags)
            .finish()
    }
}

impl<P: DeletionPolicy> RateLimitedRetentionPolicy<P> {
    /// Wrap `inner`, allowing `percentage` of eligible readers to close per cycle
    pub fn new(inner: P, percentage: u8, metric_tags: MetricTags) -> Self {
        tracing::info!(
            "Initialized rate limited retention policy with max_readers_to_close_percentage={}%",
            percentage
        );
        Self {
            inner,
            max_readers_to_close_percentage: AtomicU8::new(percentage),
            metric_tags,
            metrics: Arc::new(TracingMetrics),
            evaluation: Mutex::new(()),
        }
    }

    /// Send reader counts to `metrics` instead of the tracing sink
    pub fn with_metrics(mut self, metrics: Arc<dyn RetentionMetrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

impl<P> RateLimitedRetentionPolicy<P> {
    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn metric_tags(&self) -> &MetricTags {
        &self.metric_tags
    }

    pub fn max_readers_to_close_percentage(&self) -> u8 {
        self.max_readers_to_close_percentage.load(Ordering::Relaxed)
    }

    pub fn set_max_readers_to_close_percentage(&self, percentage: u8) {
        self.max_readers_to_close_percentage
            .store(percentage, Ordering::Relaxed);
        tracing::info!(
            "Updated rate limited retention policy with max_readers_to_close_percentage={}%",
            percentage
        );
    }
}

impl<P: DeletionPolicy + 'static> RateLimitedRetentionPolicy<P> {
    /// Follow percentage changes of `settings`
    pub fn register(self: &Arc<Self>, settings: &IndexSettings) {
        let weak = Arc::downgrade(self);
        settings.add_update_consumer(
            SettingKey::TranslogRateLimitPercentage,
            move |updated: &EngineSettings| {
                if let Some(policy) = weak.upgrade() {
                    policy.set_max_readers_to_close_percentage(updated.translog.max_readers_to_close_percentage);
                }
                Ok(())
            },
        );
    }
}

impl<P: DeletionPolicy> DeletionPolicy for RateLimitedRetentionPolicy<P> {
    fn min_translog_gen_required(&self, readers: &[TranslogReader], writer: &TranslogWriter) -> u64 {
        let _guard = self.evaluation.lock().unwrap_or_else(PoisonError::into_inner);

        self.metrics
            .record_reader_count(readers.len(), &self.metric_tags);

        let original_min_gen = self.inner.min_translog_gen_required(readers, writer);

        let percentage = self.max_readers_to_close_percentage();
        if percentage >= 100 || readers.is_empty() {
            return original_min_gen;
        }

        let eligible = readers
            .iter()
            .filter(|r| r.generation < original_min_gen)
            .count();
        if eligible == 0 {
            return original_min_gen;
        }

        let max_to_close = (eligible * percentage as usize / 100).max(1);
        if max_to_close >= eligible {
            return original_min_gen;
        }

        let adjusted_min_gen = readers[max_to_close].generation;

        tracing::debug!(
            "Rate limiting translog trimming: original_min_gen={}, adjusted_min_gen={}, eligible_readers={}, max_readers_to_close={}, percentage={}%",
            original_min_gen,
            adjusted_min_gen,
            eligible,
            max_to_close,
            percentage
        );

        adjusted_min_gen
    }
}
