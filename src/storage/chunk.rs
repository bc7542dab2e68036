//! Chunk abstractions shared by every encoding
//!
//! A chunk is an append-only run of samples owned by a single writer. The
//! write side is a [`ChunkAppender`], the read side a [`ChunkIterator`].
//! The iterator API mirrors how closed chunks are consumed during queries
//! and compaction: `next()` advances and reports whether a value is
//! available, `at()` returns the current sample.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::Sample;

/// Encoding tag written as the first byte of a serialized chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Encoding {
    /// Delta-of-delta timestamps + XOR float values
    Xor = 1,
}

impl TryFrom<u8> for Encoding {
    type Error = StorageError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Encoding::Xor),
            other => Err(StorageError::UnsupportedChunkVersion(other)),
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Encoding::Xor => write!(f, "xor"),
        }
    }
}

/// Result of advancing a [`ChunkIterator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// No more values; the iterator is exhausted (or failed, see `err()`)
    None,
    /// A float sample is available through `at()`
    Float,
}

/// Read-only view over an encoded chunk
pub trait Chunk {
    fn encoding(&self) -> Encoding;

    /// Encoded payload, without the encoding tag
    fn bytes(&self) -> &[u8];

    fn num_samples(&self) -> usize;
}

/// Write side of a chunk
pub trait ChunkAppender {
    /// Append a sample
    ///
    /// Timestamps must be non-decreasing; ordering is the caller's
    /// responsibility and is not checked here.
    fn append(&mut self, timestamp: i64, value: f64) -> StorageResult<()>;
}

/// Lazy, finite cursor over the samples of a chunk
pub trait ChunkIterator {
    /// Advance to the next sample
    fn next(&mut self) -> ValueType;

    /// Current sample; only meaningful right after `next()` returned `Float`
    fn at(&self) -> Sample;

    /// Error that terminated iteration early, if any
    fn err(&self) -> Option<&StorageError>;

    /// Adapt into a standard iterator of samples
    fn samples(self) -> Samples<Self>
    where
        Self: Sized,
    {
        Samples(self)
    }
}

/// `Iterator` adapter returned by [`ChunkIterator::samples`]
pub struct Samples<I>(I);

impl<I> Samples<I> {
    /// Recover the underlying chunk iterator, e.g. to inspect `err()`
    pub fn into_inner(self) -> I {
        self.0
    }
}

impl<I: ChunkIterator> Iterator for Samples<I> {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        match self.0.next() {
            ValueType::Float => Some(self.0.at()),
            ValueType::None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_tag() {
        assert_eq!(Encoding::Xor as u8, 1);
        assert_eq!(Encoding::try_from(1).unwrap(), Encoding::Xor);
    }

    #[test]
    fn test_unknown_encoding_names_tag() {
        let err = Encoding::try_from(99).unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedChunkVersion(99)));
        assert_eq!(err.to_string(), "Unsupported chunk version: 99");

        assert!(Encoding::try_from(0).is_err());
    }
}
