//! Chunk storage
//!
//! This module provides the sample-level encoding used by every index:
//!
//! - **types**: Core data structures (Sample, TimeRange, TimeResolution)
//! - **chunk**: Chunk, appender and iterator contracts, encoding tags
//! - **xor**: Delta-of-delta + XOR float chunk encoding
//! - **closed**: Immutable closed chunks and their tagged wire format
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   Sample → XorAppender → XorChunk → ClosedChunk → serialize_chunk → segment file
//!
//! Read Path:
//!   segment file → closed_chunk_from_serialized → ClosedChunk → chunk_iterator()
//! ```
//!
//! # Example
//!
//! ```rust
//! use tsdb_core::storage::{
//!     closed_chunk_from_serialized, serialize_chunk, ChunkAppender, ChunkIterator, XorChunk,
//! };
//!
//! let mut chunk = XorChunk::new();
//! let mut appender = chunk.appender();
//! appender.append(1_000, 1.5).unwrap();
//! appender.append(2_000, 1.75).unwrap();
//!
//! let bytes = serialize_chunk(&chunk);
//! let closed = closed_chunk_from_serialized(&bytes).unwrap();
//! let samples: Vec<_> = closed.chunk_iterator().samples().collect();
//! assert_eq!(samples.len(), 2);
//! ```

mod bitstream;
pub mod chunk;
pub mod closed;
pub mod error;
pub mod types;
pub mod xor;

// Re-export commonly used types
pub use chunk::{Chunk, ChunkAppender, ChunkIterator, Encoding, Samples, ValueType};
pub use closed::{closed_chunk_from_serialized, serialize_chunk, ClosedChunk, ClosedChunkIterator};
pub use error::{StorageError, StorageResult};
pub use types::{Sample, TimeRange, TimeResolution};
pub use xor::{XorAppender, XorChunk, XorIterator, MAX_SAMPLES_PER_CHUNK};
