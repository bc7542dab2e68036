//! # tsdb-core
//!
//! Storage maintenance core of a time-series engine: the chunk codec,
//! closed chunk indexes, pluggable compaction and write-ahead log retention.
//!
//! ## Features
//!
//! - **Compact chunks**: Delta-of-delta timestamps and XOR floats, versioned wire format
//! - **Durable indexes**: Checksummed segment files committed through a manifest
//! - **Pluggable compaction**: Size-tiered, force-merge or none, swappable at runtime
//! - **Bounded trimming**: Rate-limited write-ahead log retention
//!
//! ## Modules
//!
//! - [`storage`]: Chunk codec and closed chunks
//! - [`index`]: Closed chunk indexes on disk
//! - [`compaction`]: Compaction strategies and the hot-swappable proxy
//! - [`translog`]: Write-ahead log deletion policies
//! - [`settings`]: Live per-index settings with update callbacks
//! - [`engine`]: The maintenance engine tying it together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tsdb_core::engine::MaintenanceEngine;
//! use tsdb_core::settings::{EngineSettings, IndexSettings, SettingUpdate};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = IndexSettings::new("metrics", EngineSettings::default())?;
//!     let engine = MaintenanceEngine::open("/var/lib/tsdb", settings)?;
//!
//!     // Merge whatever the active strategy selects
//!     let outcome = engine.run_compaction_cycle()?;
//!     println!("Merged {} indexes", outcome.planned.len());
//!
//!     // Switch strategy; the engine's proxy picks it up on the next cycle
//!     engine.apply_setting(SettingUpdate::CompactionType("ForceMergeCompaction".into()))?;
//!
//!     Ok(())
//! }
//! ```

pub mod compaction;
pub mod config;
pub mod engine;
pub mod index;
pub mod logging;
pub mod metrics;
pub mod settings;
pub mod storage;
pub mod translog;

// Re-export top-level types for convenience
pub use storage::{
    closed_chunk_from_serialized, serialize_chunk, Chunk, ChunkAppender, ChunkIterator, ClosedChunk,
    Encoding, Sample, StorageError, StorageResult, TimeRange, TimeResolution, XorChunk,
};

pub use index::{load_indexes, ChunkEntry, ClosedChunkIndex};

pub use compaction::{
    Compaction, CompactionError, CompactionFactory, CompactionStrategy, CompactionType,
    DelegatingCompaction, ForceMergeCompaction, NoopCompaction, SizeTieredCompaction,
};

pub use translog::{
    DefaultDeletionPolicy, DeletionPolicy, RateLimitedRetentionPolicy, TranslogReader,
    TranslogWriter,
};

pub use settings::{EngineSettings, IndexSettings, SettingKey, SettingUpdate, SettingsError};

pub use metrics::{MetricTags, RetentionMetrics, TracingMetrics};

pub use config::{Config, ConfigError, LoggingConfig, TimeValue};

pub use engine::{CycleOutcome, MaintenanceEngine};
