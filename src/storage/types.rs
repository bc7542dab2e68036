//! Core data types for the storage layer
//!
//! - `Sample`: a single (timestamp, value) measurement inside a chunk
//! - `TimeRange`: a half-open time interval used for chunks and indexes
//! - `TimeResolution`: the unit an index expresses its timestamps in

use serde::{Deserialize, Serialize};

const MILLIS_PER_HOUR: u64 = 3_600_000;

/// A single time-series sample
///
/// Samples carry no identity beyond their position in a chunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    /// Timestamp in the owning index's time resolution (milliseconds by default)
    pub timestamp: i64,
    /// The measured value
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

impl From<(i64, f64)> for Sample {
    fn from((timestamp, value): (i64, f64)) -> Self {
        Self { timestamp, value }
    }
}

/// A time range `[start, end)`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: i64,
    /// End timestamp (exclusive)
    pub end: i64,
}

impl TimeRange {
    /// Create a new time range
    ///
    /// # Panics
    /// Panics if start >= end
    pub fn new(start: i64, end: i64) -> Self {
        assert!(start < end, "TimeRange: start must be less than end");
        Self { start, end }
    }

    /// Create a time range, returning None if invalid
    pub fn try_new(start: i64, end: i64) -> Option<Self> {
        if start < end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Check if a timestamp falls within this range
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Check if another range lies entirely inside this one
    pub fn covers(&self, other: &TimeRange) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    /// Check if this range overlaps with another
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Width of the range in its own time unit
    pub fn width(&self) -> i64 {
        self.end - self.start
    }

    /// Smallest range covering both
    pub fn union(&self, other: &TimeRange) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Unit of the timestamps stored in an index
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimeResolution {
    Seconds,
    #[default]
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

impl TimeResolution {
    /// Convert a millisecond duration into this resolution, saturating on overflow
    pub fn from_millis(&self, millis: u64) -> i64 {
        let converted = match self {
            TimeResolution::Seconds => millis / 1000,
            TimeResolution::Milliseconds => millis,
            TimeResolution::Microseconds => millis.saturating_mul(1_000),
            TimeResolution::Nanoseconds => millis.saturating_mul(1_000_000),
        };
        i64::try_from(converted).unwrap_or(i64::MAX)
    }

    /// Convert a whole number of hours into this resolution
    pub fn from_hours(&self, hours: u64) -> i64 {
        self.from_millis(hours.saturating_mul(MILLIS_PER_HOUR))
    }
}

impl std::fmt::Display for TimeResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeResolution::Seconds => write!(f, "seconds"),
            TimeResolution::Milliseconds => write!(f, "milliseconds"),
            TimeResolution::Microseconds => write!(f, "microseconds"),
            TimeResolution::Nanoseconds => write!(f, "nanoseconds"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_contains() {
        let range = TimeRange::new(1000, 2000);

        assert!(!range.contains(999));
        assert!(range.contains(1000));
        assert!(range.contains(1999));
        assert!(!range.contains(2000));
    }

    #[test]
    fn test_time_range_overlaps() {
        let range1 = TimeRange::new(1000, 2000);
        let range2 = TimeRange::new(1500, 2500);
        let range3 = TimeRange::new(2000, 3000);

        assert!(range1.overlaps(&range2));
        assert!(!range1.overlaps(&range3)); // Adjacent, not overlapping
        assert!(range1.union(&range3).covers(&range2));
        assert_eq!(range1.union(&range3).width(), 2000);
    }

    #[test]
    fn test_resolution_conversion() {
        assert_eq!(TimeResolution::Milliseconds.from_hours(2), 7_200_000);
        assert_eq!(TimeResolution::Seconds.from_hours(2), 7_200);
        assert_eq!(TimeResolution::Nanoseconds.from_millis(3), 3_000_000);
        assert_eq!(TimeResolution::Nanoseconds.from_millis(u64::MAX), i64::MAX);
    }

    #[test]
    fn test_sample_serialization() {
        let sample = Sample::new(1000, 7.5);
        let json = serde_json::to_string(&sample).unwrap();
        let restored: Sample = serde_json::from_str(&json).unwrap();
        assert_eq!(sample, restored);
    }
}
