//! Size, age and file-count based retention
//!
//! Each enabled criterion caps how much log is kept and proposes a minimum
//! generation; the policy takes the highest proposal, then lowers it again
//! for generations pinned by retention locks or needed for recovery.

use crate::translog::{DeletionPolicy, TranslogReader, TranslogWriter};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Source of "now" in milliseconds since the Unix epoch
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

type LockCounts = Arc<Mutex<BTreeMap<u64, usize>>>;

#[derive(Debug, Clone, Copy)]
struct Retention {
    size_in_bytes: Option<u64>,
    age_ms: Option<u64>,
    total_files: usize,
}

/// Keeps a generation (and everything above it) alive until dropped
#[derive(Debug)]
pub struct RetentionLock {
    generation: u64,
    locks: LockCounts,
}

impl RetentionLock {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for RetentionLock {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = locks.get_mut(&self.generation) {
            *count -= 1;
            if *count == 0 {
                locks.remove(&self.generation);
            }
        }
    }
}

/// Unbounded retention policy
///
/// `None` disables size or age retention. With both disabled nothing beyond
/// the writer is retained unless pinned by a lock or the recovery floor.
pub struct DefaultDeletionPolicy {
    retention: RwLock<Retention>,
    locks: LockCounts,
    /// `u64::MAX` when unset
    min_gen_for_recovery: AtomicU64,
    clock: Clock,
}

impl std::fmt::Debug for DefaultDeletionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultDeletionPolicy")
            .field("retention", &self.retention())
            .field("locks", &self.locks)
            .field("min_gen_for_recovery", &self.min_gen_for_recovery)
            .finish()
    }
}

impl DefaultDeletionPolicy {
    pub fn new(retention_size_in_bytes: Option<u64>, retention_age_ms: Option<u64>, retention_total_files: usize) -> Self {
        Self {
            retention: RwLock::new(Retention {
                size_in_bytes: retention_size_in_bytes,
                age_ms: retention_age_ms,
                total_files: retention_total_files,
            }),
            locks: Arc::new(Mutex::new(BTreeMap::new())),
            min_gen_for_recovery: AtomicU64::new(u64::MAX),
            clock: Arc::new(|| Utc::now().timestamp_millis()),
        }
    }

    /// Replace the clock used for age retention
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn set_retention_size(&self, bytes: Option<u64>) {
        self.retention_mut().size_in_bytes = bytes;
    }

    pub fn set_retention_age(&self, age_ms: Option<u64>) {
        self.retention_mut().age_ms = age_ms;
    }

    pub fn set_retention_total_files(&self, files: usize) {
        self.retention_mut().total_files = files;
    }

    pub fn retention_size(&self) -> Option<u64> {
        self.retention().size_in_bytes
    }

    pub fn retention_age(&self) -> Option<u64> {
        self.retention().age_ms
    }

    pub fn retention_total_files(&self) -> usize {
        self.retention().total_files
    }

    /// Pin `generation` until the returned lock is dropped
    pub fn acquire_retention_lock(&self, generation: u64) -> RetentionLock {
        *self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(generation)
            .or_insert(0) += 1;
        RetentionLock {
            generation,
            locks: Arc::clone(&self.locks),
        }
    }

    /// Generations at or above `generation` are needed to recover
    pub fn set_min_translog_generation_for_recovery(&self, generation: u64) {
        self.min_gen_for_recovery.store(generation, Ordering::Release);
    }

    /// Lowest generation pinned by a live lock, `u64::MAX` when none
    pub fn min_gen_required_by_locks(&self) -> u64 {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .next()
            .copied()
            .unwrap_or(u64::MAX)
    }

    fn retention(&self) -> Retention {
        *self.retention.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn retention_mut(&self) -> std::sync::RwLockWriteGuard<'_, Retention> {
        self.retention.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeletionPolicy for DefaultDeletionPolicy {
    fn min_translog_gen_required(&self, readers: &[TranslogReader], writer: &TranslogWriter) -> u64 {
        let retention = self.retention();
        let now = (self.clock)();

        let by_size = min_gen_by_size(readers, writer, retention.size_in_bytes);
        let by_age = min_gen_by_age(readers, writer, retention.age_ms, now);
        let by_age_and_size = match (by_size, by_age) {
            (None, None) => u64::MAX,
            (size, age) => size.unwrap_or(0).max(age.unwrap_or(0)),
        };
        let by_files = min_gen_by_total_files(readers, writer, retention.total_files);

        by_age_and_size
            .max(by_files)
            .min(self.min_gen_required_by_locks())
            .min(self.min_gen_for_recovery.load(Ordering::Acquire))
            .min(writer.generation)
    }
}

fn min_gen_by_size(readers: &[TranslogReader], writer: &TranslogWriter, retention: Option<u64>) -> Option<u64> {
    let limit = retention?;
    let mut total = writer.size_in_bytes;
    let mut min_gen = writer.generation;
    for reader in readers.iter().rev() {
        if total >= limit {
            break;
        }
        total = total.saturating_add(reader.size_in_bytes);
        min_gen = reader.generation;
    }
    Some(min_gen)
}

fn min_gen_by_age(
    readers: &[TranslogReader],
    writer: &TranslogWriter,
    retention: Option<u64>,
    now: i64,
) -> Option<u64> {
    let max_age = retention?;
    let within = |reader: &&TranslogReader| {
        let age = now.saturating_sub(reader.last_modified_ms);
        age <= 0 || age as u64 <= max_age
    };
    Some(
        readers
            .iter()
            .find(within)
            .map_or(writer.generation, |r| r.generation),
    )
}

fn min_gen_by_total_files(readers: &[TranslogReader], writer: &TranslogWriter, max_files: usize) -> u64 {
    let mut total = 1;
    let mut min_gen = writer.generation;
    for reader in readers.iter().rev() {
        if total >= max_files {
            break;
        }
        total += 1;
        min_gen = reader.generation;
    }
    min_gen
}
