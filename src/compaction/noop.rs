//! Compaction disabled

use crate::compaction::CompactionStrategy;
use crate::index::ClosedChunkIndex;
use crate::storage::StorageResult;
use std::sync::Arc;

/// Never plans, never compacts, never scheduled
#[derive(Debug, Default)]
pub struct NoopCompaction;

impl NoopCompaction {
    pub fn new() -> Self {
        Self
    }
}

impl CompactionStrategy for NoopCompaction {
    fn plan(&self, _indexes: &[Arc<ClosedChunkIndex>]) -> Vec<Arc<ClosedChunkIndex>> {
        Vec::new()
    }

    fn compact(&self, _sources: &[Arc<ClosedChunkIndex>], _dest: &ClosedChunkIndex) -> StorageResult<()> {
        Ok(())
    }

    fn is_in_place_compaction(&self) -> bool {
        false
    }

    fn frequency(&self) -> u64 {
        u64::MAX
    }

    fn set_frequency(&self, _frequency_ms: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{TimeRange, TimeResolution};
    use tempfile::tempdir;

    #[test]
    fn test_noop() {
        let dir = tempdir().unwrap();
        let index = Arc::new(
            ClosedChunkIndex::create_in(dir.path(), TimeRange::new(0, 10), TimeResolution::Milliseconds).unwrap(),
        );
        let noop = NoopCompaction::new();

        assert!(noop.plan(&[index.clone(), index.clone()]).is_empty());
        noop.compact(&[index.clone()], &index).unwrap();
        assert_eq!(index.segment_count(), 0);

        noop.set_frequency(60_000);
        assert_eq!(noop.frequency(), u64::MAX);
        assert!(!noop.is_in_place_compaction());
    }
}
