//! Closed chunks and their wire format
//!
//! A closed chunk is the immutable form of a finished chunk. On the wire it
//! is the chunk payload prefixed by a single encoding tag byte:
//!
//! ```text
//! ┌─────────┬──────────────────────────────┐
//! │ tag: u8 │ encoding-specific payload    │
//! └─────────┴──────────────────────────────┘
//! ```
//!
//! Unknown tags are rejected; they mean corruption or a format from a newer
//! build, and no attempt is made to guess.

use crate::storage::chunk::{Chunk, ChunkIterator, Encoding, ValueType};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::Sample;
use crate::storage::xor::XorIterator;
use std::sync::Arc;

/// Read-only access to encoded chunk data
#[derive(Debug, Clone)]
pub struct ClosedChunk {
    encoding: Encoding,
    data: Arc<[u8]>,
}

impl ClosedChunk {
    /// Wrap an encoded payload (tag excluded)
    pub fn new(data: impl Into<Arc<[u8]>>, encoding: Encoding) -> Self {
        Self {
            encoding,
            data: data.into(),
        }
    }

    /// Freeze an in-memory chunk
    pub fn from_chunk(chunk: &dyn Chunk) -> Self {
        Self::new(chunk.bytes(), chunk.encoding())
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Encoded payload, without the tag byte
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// A fresh iterator positioned before the first sample
    pub fn chunk_iterator(&self) -> ClosedChunkIterator<'_> {
        match self.encoding {
            Encoding::Xor => ClosedChunkIterator::Xor(XorIterator::new(&self.data)),
        }
    }

    /// Serialized form: tag byte followed by the payload
    pub fn to_bytes(&self) -> Vec<u8> {
        serialize_chunk(self)
    }
}

impl Chunk for ClosedChunk {
    fn encoding(&self) -> Encoding {
        self.encoding
    }

    fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn num_samples(&self) -> usize {
        match self.chunk_iterator() {
            ClosedChunkIterator::Xor(it) => it.num_samples(),
        }
    }
}

/// Iterator over a closed chunk, one variant per encoding
#[derive(Debug)]
pub enum ClosedChunkIterator<'a> {
    Xor(XorIterator<'a>),
}

impl ChunkIterator for ClosedChunkIterator<'_> {
    fn next(&mut self) -> ValueType {
        match self {
            ClosedChunkIterator::Xor(it) => it.next(),
        }
    }

    fn at(&self) -> Sample {
        match self {
            ClosedChunkIterator::Xor(it) => it.at(),
        }
    }

    fn err(&self) -> Option<&StorageError> {
        match self {
            ClosedChunkIterator::Xor(it) => it.err(),
        }
    }
}

/// Serialize any chunk into the closed-chunk wire format
pub fn serialize_chunk(chunk: &dyn Chunk) -> Vec<u8> {
    let payload = chunk.bytes();
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(chunk.encoding() as u8);
    out.extend_from_slice(payload);
    out
}

/// Decode a serialized chunk record
///
/// Fails with [`StorageError::UnsupportedChunkVersion`] when the tag byte is
/// not a known encoding.
pub fn closed_chunk_from_serialized(bytes: &[u8]) -> StorageResult<ClosedChunk> {
    let (&tag, payload) = bytes
        .split_first()
        .ok_or_else(|| StorageError::Corruption("empty chunk record".into()))?;
    let encoding = Encoding::try_from(tag)?;
    Ok(ClosedChunk::new(payload, encoding))
}
