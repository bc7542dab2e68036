//! Telemetry collaborator for retention evaluation
//!
//! The crate does not own a metrics pipeline. Callers hand in a
//! [`RetentionMetrics`] implementation; the default one turns every
//! observation into a `tracing` event on the `tsdb::metrics` target.

use std::collections::BTreeMap;
use std::fmt;

/// Target used by [`TracingMetrics`]
pub const METRICS_TARGET: &str = "tsdb::metrics";

/// Ordered set of key/value tags attached to every observation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricTags(BTreeMap<String, String>);

impl MetricTags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a tag
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MetricTags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Receives retention observations
pub trait RetentionMetrics: Send + Sync {
    /// Number of sealed log readers seen by one retention evaluation
    fn record_reader_count(&self, count: usize, tags: &MetricTags);
}

/// Emits observations as `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl RetentionMetrics for TracingMetrics {
    fn record_reader_count(&self, count: usize, tags: &MetricTags) {
        tracing::trace!(
            target: METRICS_TARGET,
            metric = "translog.readers.count",
            count,
            tags = %tags,
            "metric"
        );
    }
}
