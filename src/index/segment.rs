//! Segment file format for closed chunk indexes
//!
//! A segment file is one immutable physical segment of an index. It is
//! written once, in full, and never appended to.
//!
//! Layout:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER (64 bytes)                       │
//! │   magic: [u8; 4] = "TSCI"               │
//! │   version: u16                          │
//! │   chunk_count: u32                      │
//! │   min_timestamp: i64                    │
//! │   max_timestamp: i64                    │
//! │   reserved: [u8; 34]                    │
//! │   checksum: u32                         │
//! ├─────────────────────────────────────────┤
//! │ CHUNK RECORDS (variable)                │
//! │   For each chunk:                       │
//! │     record_size: u32                    │
//! │     record: [u8; record_size]           │
//! │       (encoding tag + chunk payload)    │
//! │     record_checksum: u32                │
//! ├─────────────────────────────────────────┤
//! │ FOOTER                                  │
//! │   per chunk: offset u64, size u32,      │
//! │              min_ts i64, max_ts i64     │
//! │   footer_size: u32                      │
//! │   footer_checksum: u32                  │
//! └─────────────────────────────────────────┘
//! ```

use crate::storage::{closed_chunk_from_serialized, ClosedChunk, StorageError, StorageResult, XorChunk};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for segment file identification
const SEGMENT_MAGIC: [u8; 4] = *b"TSCI";

/// Current segment format version
const SEGMENT_VERSION: u16 = 1;

/// Header size in bytes
const HEADER_SIZE: usize = 64;

/// Footer bytes per chunk: offset(8) + size(4) + min_ts(8) + max_ts(8)
const FOOTER_ENTRY_SIZE: usize = 28;

/// Extension of segment files inside an index directory
pub const SEGMENT_EXTENSION: &str = "tsc";

/// A closed chunk together with its time bounds
#[derive(Debug, Clone)]
pub struct ChunkEntry {
    /// First sample timestamp
    pub min_time: i64,
    /// Last sample timestamp (inclusive)
    pub max_time: i64,
    pub chunk: ClosedChunk,
}

impl ChunkEntry {
    pub fn new(chunk: ClosedChunk, min_time: i64, max_time: i64) -> Self {
        Self {
            min_time,
            max_time,
            chunk,
        }
    }

    /// Close an in-memory chunk; `None` when it holds no samples
    pub fn from_chunk(chunk: &XorChunk) -> Option<Self> {
        let (min_time, max_time) = chunk.time_bounds()?;
        Some(Self::new(ClosedChunk::from_chunk(chunk), min_time, max_time))
    }
}

/// Segment file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHeader {
    pub version: u16,
    pub chunk_count: u32,
    pub min_timestamp: i64,
    pub max_timestamp: i64,
}

impl SegmentHeader {
    fn new() -> Self {
        Self {
            version: SEGMENT_VERSION,
            chunk_count: 0,
            min_timestamp: i64::MAX,
            max_timestamp: i64::MIN,
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];

        buf[0..4].copy_from_slice(&SEGMENT_MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..10].copy_from_slice(&self.chunk_count.to_le_bytes());
        buf[10..18].copy_from_slice(&self.min_timestamp.to_le_bytes());
        buf[18..26].copy_from_slice(&self.max_timestamp.to_le_bytes());
        // bytes 26-59 reserved

        let checksum = crc32fast::hash(&buf[0..60]);
        buf[60..64].copy_from_slice(&checksum.to_le_bytes());

        buf
    }

    /// Parse header from bytes
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> StorageResult<Self> {
        let stored_checksum = read_u32(buf, 60);
        let computed_checksum = crc32fast::hash(&buf[0..60]);
        if stored_checksum != computed_checksum {
            return Err(StorageError::Corruption(format!(
                "Header checksum mismatch: stored={}, computed={}",
                stored_checksum, computed_checksum
            )));
        }

        if buf[0..4] != SEGMENT_MAGIC {
            return Err(StorageError::InvalidIndex(format!(
                "Invalid segment magic: {:?}",
                &buf[0..4]
            )));
        }

        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version > SEGMENT_VERSION {
            return Err(StorageError::InvalidIndex(format!(
                "Unsupported segment version: {}",
                version
            )));
        }

        Ok(Self {
            version,
            chunk_count: read_u32(buf, 6),
            min_timestamp: read_i64(buf, 10),
            max_timestamp: read_i64(buf, 18),
        })
    }
}

/// Location and bounds of one chunk record inside a segment file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMeta {
    pub offset: u64,
    pub size: u32,
    pub min_timestamp: i64,
    pub max_timestamp: i64,
}

/// An opened segment file: header plus chunk directory
#[derive(Debug, Clone)]
pub struct Segment {
    pub path: PathBuf,
    pub header: SegmentHeader,
    pub chunks: Vec<ChunkMeta>,
}

impl Segment {
    /// Write a complete segment file
    ///
    /// The file is written under a temporary name, synced and renamed into
    /// place, so a crash never leaves a half-written segment at `path`.
    pub fn write(path: impl AsRef<Path>, entries: &[ChunkEntry]) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let tmp_path = path.with_extension("tmp");

        let mut header = SegmentHeader::new();
        let written = write_records(&tmp_path, entries, &mut header).and_then(|chunks| {
            std::fs::rename(&tmp_path, &path)?;
            Ok(chunks)
        });

        let chunks = match written {
            Ok(chunks) => chunks,
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_file(&tmp_path) {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!("Failed to remove {:?}: {}", tmp_path, cleanup);
                    }
                }
                return Err(e);
            }
        };

        Ok(Self {
            path,
            header,
            chunks,
        })
    }

    /// Open an existing segment file, reading only header and footer
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = BufReader::new(File::open(&path)?);

        let mut header_buf = [0u8; HEADER_SIZE];
        file.read_exact(&mut header_buf)?;
        let header = SegmentHeader::from_bytes(&header_buf)?;

        let chunks = read_footer(&mut file, &header)?;

        Ok(Self {
            path,
            header,
            chunks,
        })
    }

    /// Read and verify every chunk record
    pub fn read_chunks(&self) -> StorageResult<Vec<ChunkEntry>> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut entries = Vec::with_capacity(self.chunks.len());

        for (idx, meta) in self.chunks.iter().enumerate() {
            reader.seek(SeekFrom::Start(meta.offset))?;

            let mut size_buf = [0u8; 4];
            reader.read_exact(&mut size_buf)?;
            let size = u32::from_le_bytes(size_buf);
            if size != meta.size {
                return Err(StorageError::Corruption(format!(
                    "Chunk {} size mismatch in {:?}: footer={}, record={}",
                    idx, self.path, meta.size, size
                )));
            }

            let mut record = vec![0u8; size as usize];
            reader.read_exact(&mut record)?;

            let mut checksum_buf = [0u8; 4];
            reader.read_exact(&mut checksum_buf)?;
            if u32::from_le_bytes(checksum_buf) != crc32fast::hash(&record) {
                return Err(StorageError::Corruption(format!(
                    "Chunk {} checksum mismatch in {:?}",
                    idx, self.path
                )));
            }

            let chunk = closed_chunk_from_serialized(&record)?;
            entries.push(ChunkEntry::new(chunk, meta.min_timestamp, meta.max_timestamp));
        }

        Ok(entries)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Min timestamp of the last chunk, used to keep append order
    pub fn last_chunk_min_time(&self) -> Option<i64> {
        self.chunks.last().map(|c| c.min_timestamp)
    }

    /// File name within the index directory
    pub fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .and_then(|s| s.to_str())
            .map(str::to_string)
    }
}

/// Write header, records and footer to `tmp_path`, returning the chunk table
fn write_records(tmp_path: &Path, entries: &[ChunkEntry], header: &mut SegmentHeader) -> StorageResult<Vec<ChunkMeta>> {
    let mut chunks = Vec::with_capacity(entries.len());
    let file = File::create(tmp_path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&[0u8; HEADER_SIZE])?;

    let mut offset = HEADER_SIZE as u64;
    for entry in entries {
        let record = entry.chunk.to_bytes();
        let size = u32::try_from(record.len()).map_err(|_| {
            StorageError::InvalidIndex(format!("chunk record too large: {} bytes", record.len()))
        })?;

        writer.write_all(&size.to_le_bytes())?;
        writer.write_all(&record)?;
        writer.write_all(&crc32fast::hash(&record).to_le_bytes())?;

        chunks.push(ChunkMeta {
            offset,
            size,
            min_timestamp: entry.min_time,
            max_timestamp: entry.max_time,
        });
        header.min_timestamp = header.min_timestamp.min(entry.min_time);
        header.max_timestamp = header.max_timestamp.max(entry.max_time);
        offset += size as u64 + 8;
    }
    header.chunk_count = chunks.len() as u32;

    write_footer(&mut writer, &chunks)?;

    writer.seek(SeekFrom::Start(0))?;
    writer.write_all(&header.to_bytes())?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(chunks)
}

fn write_footer<W: Write>(writer: &mut W, chunks: &[ChunkMeta]) -> StorageResult<()> {
    let mut footer_data = Vec::with_capacity(chunks.len() * FOOTER_ENTRY_SIZE);

    for chunk in chunks {
        footer_data.extend_from_slice(&chunk.offset.to_le_bytes());
        footer_data.extend_from_slice(&chunk.size.to_le_bytes());
        footer_data.extend_from_slice(&chunk.min_timestamp.to_le_bytes());
        footer_data.extend_from_slice(&chunk.max_timestamp.to_le_bytes());
    }

    let checksum = crc32fast::hash(&footer_data);

    writer.write_all(&footer_data)?;
    writer.write_all(&(footer_data.len() as u32).to_le_bytes())?;
    writer.write_all(&checksum.to_le_bytes())?;

    Ok(())
}

fn read_footer(file: &mut BufReader<File>, header: &SegmentHeader) -> StorageResult<Vec<ChunkMeta>> {
    file.seek(SeekFrom::End(-8))?;

    let mut footer_size_buf = [0u8; 4];
    file.read_exact(&mut footer_size_buf)?;
    let footer_size = u32::from_le_bytes(footer_size_buf) as usize;

    let mut checksum_buf = [0u8; 4];
    file.read_exact(&mut checksum_buf)?;
    let stored_checksum = u32::from_le_bytes(checksum_buf);

    let expected_size = header.chunk_count as usize * FOOTER_ENTRY_SIZE;
    if footer_size != expected_size {
        return Err(StorageError::Corruption(format!(
            "Footer size {} does not match {} chunks",
            footer_size, header.chunk_count
        )));
    }

    file.seek(SeekFrom::End(-(footer_size as i64) - 8))?;
    let mut footer_data = vec![0u8; footer_size];
    file.read_exact(&mut footer_data)?;

    if stored_checksum != crc32fast::hash(&footer_data) {
        return Err(StorageError::Corruption("Footer checksum mismatch".into()));
    }

    let chunks = footer_data
        .chunks_exact(FOOTER_ENTRY_SIZE)
        .map(|entry| ChunkMeta {
            offset: read_u64(entry, 0),
            size: read_u32(entry, 8),
            min_timestamp: read_i64(entry, 12),
            max_timestamp: read_i64(entry, 20),
        })
        .collect();

    Ok(chunks)
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn read_i64(buf: &[u8], at: usize) -> i64 {
    read_u64(buf, at) as i64
}
