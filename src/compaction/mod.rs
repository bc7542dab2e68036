//! Compaction strategies
//!
//! A compaction strategy decides which closed chunk indexes to merge
//! (`plan`) and performs the merge (`compact`). Strategies hold only
//! configuration, never index lists, so every call is independent.
//!
//! - **size_tiered**: Merge indexes within duration tiers derived from retention
//! - **force_merge**: Collapse physical segments of old indexes in place
//! - **noop**: Compaction disabled
//! - **factory**: Build strategies from configuration and keep them current
//!
//! # Hot swap
//!
//! ```text
//! settings update ──► consumer ──► CompactionFactory::compaction_for
//!                                         │
//!                                         ▼
//!                    DelegatingCompaction::set_compaction (atomic store)
//!                                         │
//! scheduler ──► plan/compact ──► load_full() ── one strategy per call
//! ```

mod error;
mod factory;
mod force_merge;
mod noop;
mod size_tiered;

pub use error::CompactionError;
pub use factory::{CompactionFactory, DelegatingCompaction};
pub use force_merge::ForceMergeCompaction;
pub use noop::NoopCompaction;
pub use size_tiered::{tiers_for_retention, SizeTieredCompaction, MAX_TIER_HOURS};

use crate::index::ClosedChunkIndex;
use crate::storage::StorageResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Minimum accepted compaction frequency
pub const MIN_FREQUENCY_MS: u64 = 60_000;

/// Contract shared by every compaction strategy
pub trait CompactionStrategy: Send + Sync {
    /// Select the indexes to merge next; empty when nothing is eligible
    fn plan(&self, indexes: &[Arc<ClosedChunkIndex>]) -> Vec<Arc<ClosedChunkIndex>>;

    /// Merge `sources` into `dest`
    ///
    /// In-place strategies rewrite the sources themselves and ignore `dest`.
    fn compact(&self, sources: &[Arc<ClosedChunkIndex>], dest: &ClosedChunkIndex) -> StorageResult<()>;

    /// Whether `compact` mutates existing indexes instead of filling a new one
    fn is_in_place_compaction(&self) -> bool;

    /// Desired scheduling interval in milliseconds
    fn frequency(&self) -> u64;

    fn set_frequency(&self, frequency_ms: u64);
}

/// Strategy selector parsed from the configured type name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompactionType {
    SizeTieredCompaction,
    ForceMergeCompaction,
    Noop,
    /// Any name that maps to nothing; always rejected
    Invalid,
}

impl CompactionType {
    pub fn from_name(name: &str) -> Self {
        match name {
            "SizeTieredCompaction" => CompactionType::SizeTieredCompaction,
            "ForceMergeCompaction" => CompactionType::ForceMergeCompaction,
            "Noop" => CompactionType::Noop,
            _ => CompactionType::Invalid,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CompactionType::SizeTieredCompaction => "SizeTieredCompaction",
            CompactionType::ForceMergeCompaction => "ForceMergeCompaction",
            CompactionType::Noop => "Noop",
            CompactionType::Invalid => "Invalid",
        }
    }
}

impl std::fmt::Display for CompactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The closed set of strategies
#[derive(Debug)]
pub enum Compaction {
    SizeTiered(SizeTieredCompaction),
    ForceMerge(ForceMergeCompaction),
    Noop(NoopCompaction),
}

impl Compaction {
    pub fn compaction_type(&self) -> CompactionType {
        match self {
            Compaction::SizeTiered(_) => CompactionType::SizeTieredCompaction,
            Compaction::ForceMerge(_) => CompactionType::ForceMergeCompaction,
            Compaction::Noop(_) => CompactionType::Noop,
        }
    }

    fn strategy(&self) -> &dyn CompactionStrategy {
        match self {
            Compaction::SizeTiered(c) => c,
            Compaction::ForceMerge(c) => c,
            Compaction::Noop(c) => c,
        }
    }
}

impl CompactionStrategy for Compaction {
    fn plan(&self, indexes: &[Arc<ClosedChunkIndex>]) -> Vec<Arc<ClosedChunkIndex>> {
        self.strategy().plan(indexes)
    }

    fn compact(&self, sources: &[Arc<ClosedChunkIndex>], dest: &ClosedChunkIndex) -> StorageResult<()> {
        self.strategy().compact(sources, dest)
    }

    fn is_in_place_compaction(&self) -> bool {
        self.strategy().is_in_place_compaction()
    }

    fn frequency(&self) -> u64 {
        self.strategy().frequency()
    }

    fn set_frequency(&self, frequency_ms: u64) {
        self.strategy().set_frequency(frequency_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_from_name() {
        assert_eq!(
            CompactionType::from_name("SizeTieredCompaction"),
            CompactionType::SizeTieredCompaction
        );
        assert_eq!(
            CompactionType::from_name("ForceMergeCompaction"),
            CompactionType::ForceMergeCompaction
        );
        assert_eq!(CompactionType::from_name("Noop"), CompactionType::Noop);
    }

    #[test]
    fn test_unmapped_names_are_invalid() {
        assert_eq!(CompactionType::from_name(""), CompactionType::Invalid);
        assert_eq!(CompactionType::from_name("noop"), CompactionType::Invalid);
        assert_eq!(CompactionType::from_name("Leveled"), CompactionType::Invalid);
    }

    #[test]
    fn test_enum_dispatch() {
        let noop = Compaction::Noop(NoopCompaction::new());
        assert_eq!(noop.compaction_type(), CompactionType::Noop);
        assert_eq!(noop.frequency(), u64::MAX);
        assert!(!noop.is_in_place_compaction());

        let tiered = Compaction::SizeTiered(SizeTieredCompaction::new(
            tiers_for_retention(Some(168)),
            900_000,
            Default::default(),
        ));
        tiered.set_frequency(120_000);
        assert_eq!(tiered.frequency(), 120_000);
        assert!(!tiered.is_in_place_compaction());
    }
}
