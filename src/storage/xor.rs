//! XOR chunk encoding
//!
//! Gorilla-style compression for (timestamp, float) samples:
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ num_samples: u16 (BE)        │
//! ├──────────────────────────────┤
//! │ sample 0: varint ts, 64b val │
//! │ sample 1: uvarint Δts, xor   │
//! │ sample n: Δ²ts prefix, xor   │
//! └──────────────────────────────┘
//! ```
//!
//! Delta-of-delta buckets: `0` (unchanged interval), `10` + 14 bits,
//! `110` + 17 bits, `1110` + 20 bits, `1111` + 64 bits.
//!
//! Values: `0` when equal to the previous value, `10` + meaningful bits when
//! they fit the previous leading/trailing-zero window, otherwise `11` +
//! 5-bit leading zeros + 6-bit length + meaningful bits.

use crate::storage::bitstream::{BitReader, BitWriter};
use crate::storage::chunk::{Chunk, ChunkAppender, ChunkIterator, Encoding, ValueType};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::Sample;

/// Maximum number of samples a single chunk can hold
pub const MAX_SAMPLES_PER_CHUNK: usize = u16::MAX as usize;

const HEADER_SIZE: usize = 2;

/// Leading-zero window not established yet
const WINDOW_UNSET: u8 = 0xff;

/// Encoder state carried between appends
#[derive(Debug, Clone, Copy)]
struct AppendState {
    first_t: i64,
    t: i64,
    v: f64,
    t_delta: i64,
    leading: u8,
    trailing: u8,
}

impl Default for AppendState {
    fn default() -> Self {
        Self {
            first_t: 0,
            t: 0,
            v: 0.0,
            t_delta: 0,
            leading: WINDOW_UNSET,
            trailing: 0,
        }
    }
}

/// In-memory, append-only XOR chunk
#[derive(Debug, Clone)]
pub struct XorChunk {
    stream: BitWriter,
    num_samples: u16,
    state: AppendState,
}

impl Default for XorChunk {
    fn default() -> Self {
        Self::new()
    }
}

impl XorChunk {
    pub fn new() -> Self {
        Self {
            stream: BitWriter::with_header(HEADER_SIZE),
            num_samples: 0,
            state: AppendState::default(),
        }
    }

    /// Write handle for this chunk
    pub fn appender(&mut self) -> XorAppender<'_> {
        XorAppender { chunk: self }
    }

    /// Fresh iterator over the samples appended so far
    pub fn iterator(&self) -> XorIterator<'_> {
        XorIterator::new(self.stream.bytes())
    }

    /// First and last timestamps, `None` for an empty chunk
    pub fn time_bounds(&self) -> Option<(i64, i64)> {
        (self.num_samples > 0).then_some((self.state.first_t, self.state.t))
    }

    pub fn is_full(&self) -> bool {
        self.num_samples as usize >= MAX_SAMPLES_PER_CHUNK
    }
}

impl Chunk for XorChunk {
    fn encoding(&self) -> Encoding {
        Encoding::Xor
    }

    fn bytes(&self) -> &[u8] {
        self.stream.bytes()
    }

    fn num_samples(&self) -> usize {
        self.num_samples as usize
    }
}

/// Appender borrowing an [`XorChunk`] mutably
pub struct XorAppender<'a> {
    chunk: &'a mut XorChunk,
}

impl ChunkAppender for XorAppender<'_> {
    fn append(&mut self, timestamp: i64, value: f64) -> StorageResult<()> {
        let XorChunk {
            stream,
            num_samples,
            state,
        } = &mut *self.chunk;

        if *num_samples as usize >= MAX_SAMPLES_PER_CHUNK {
            return Err(StorageError::ChunkFull(*num_samples as usize));
        }

        match *num_samples {
            0 => {
                stream.write_varint(timestamp);
                stream.write_bits(value.to_bits(), 64);
                state.first_t = timestamp;
            }
            1 => {
                let t_delta = timestamp.wrapping_sub(state.t);
                stream.write_uvarint(t_delta as u64);
                write_value(stream, state, value);
                state.t_delta = t_delta;
            }
            _ => {
                let t_delta = timestamp.wrapping_sub(state.t);
                let dod = t_delta.wrapping_sub(state.t_delta);
                write_dod(stream, dod);
                write_value(stream, state, value);
                state.t_delta = t_delta;
            }
        }

        state.t = timestamp;
        state.v = value;
        *num_samples += 1;
        stream.header_mut()[..HEADER_SIZE].copy_from_slice(&num_samples.to_be_bytes());

        Ok(())
    }
}

fn bit_range(x: i64, nbits: u8) -> bool {
    let bound = 1i64 << (nbits - 1);
    -(bound - 1) <= x && x <= bound
}

fn write_dod(stream: &mut BitWriter, dod: i64) {
    if dod == 0 {
        stream.write_bit(false);
    } else if bit_range(dod, 14) {
        stream.write_bits(0b10, 2);
        stream.write_bits(dod as u64, 14);
    } else if bit_range(dod, 17) {
        stream.write_bits(0b110, 3);
        stream.write_bits(dod as u64, 17);
    } else if bit_range(dod, 20) {
        stream.write_bits(0b1110, 4);
        stream.write_bits(dod as u64, 20);
    } else {
        stream.write_bits(0b1111, 4);
        stream.write_bits(dod as u64, 64);
    }
}

fn write_value(stream: &mut BitWriter, state: &mut AppendState, value: f64) {
    let delta = value.to_bits() ^ state.v.to_bits();
    if delta == 0 {
        stream.write_bit(false);
        return;
    }
    stream.write_bit(true);

    // 5 bits of leading-zero count on the wire
    let leading = (delta.leading_zeros() as u8).min(31);
    let trailing = delta.trailing_zeros() as u8;

    if state.leading != WINDOW_UNSET && leading >= state.leading && trailing >= state.trailing {
        stream.write_bit(false);
        stream.write_bits(
            delta >> state.trailing,
            64 - state.leading - state.trailing,
        );
    } else {
        state.leading = leading;
        state.trailing = trailing;

        let significant = 64 - leading - trailing;
        stream.write_bit(true);
        stream.write_bits(leading as u64, 5);
        // 64 wraps to 0 in six bits
        stream.write_bits(significant as u64, 6);
        stream.write_bits(delta >> trailing, significant);
    }
}

/// Lazy decoder over XOR chunk bytes
#[derive(Debug)]
pub struct XorIterator<'a> {
    reader: BitReader<'a>,
    total: u16,
    read: u16,
    t: i64,
    v: f64,
    t_delta: i64,
    leading: u8,
    trailing: u8,
    err: Option<StorageError>,
}

impl<'a> XorIterator<'a> {
    /// Iterate over an encoded payload (header included, tag excluded)
    pub fn new(data: &'a [u8]) -> Self {
        let (total, err) = match data {
            [hi, lo, ..] => (u16::from_be_bytes([*hi, *lo]), None),
            _ => (
                0,
                Some(StorageError::Corruption(format!(
                    "xor chunk shorter than its header: {} bytes",
                    data.len()
                ))),
            ),
        };

        Self {
            reader: BitReader::new(data, HEADER_SIZE.min(data.len())),
            total,
            read: 0,
            t: 0,
            v: 0.0,
            t_delta: 0,
            leading: 0,
            trailing: 0,
            err,
        }
    }

    /// Number of samples announced by the header
    pub fn num_samples(&self) -> usize {
        self.total as usize
    }

    fn advance(&mut self) -> StorageResult<()> {
        match self.read {
            0 => {
                self.t = self.reader.read_varint()?;
                self.v = f64::from_bits(self.reader.read_bits(64)?);
            }
            1 => {
                self.t_delta = self.reader.read_uvarint()? as i64;
                self.t = self.t.wrapping_add(self.t_delta);
                self.read_value()?;
            }
            _ => {
                let dod = self.read_dod()?;
                self.t_delta = self.t_delta.wrapping_add(dod);
                self.t = self.t.wrapping_add(self.t_delta);
                self.read_value()?;
            }
        }
        Ok(())
    }

    fn read_dod(&mut self) -> StorageResult<i64> {
        let mut prefix = 0u8;
        for _ in 0..4 {
            prefix <<= 1;
            if !self.reader.read_bit()? {
                break;
            }
            prefix |= 1;
        }

        let size: u8 = match prefix {
            0b0 => return Ok(0),
            0b10 => 14,
            0b110 => 17,
            0b1110 => 20,
            _ => 64,
        };

        let bits = self.reader.read_bits(size)?;
        if size == 64 {
            return Ok(bits as i64);
        }
        if bits > 1 << (size - 1) {
            Ok(bits as i64 - (1i64 << size))
        } else {
            Ok(bits as i64)
        }
    }

    fn read_value(&mut self) -> StorageResult<()> {
        if !self.reader.read_bit()? {
            return Ok(());
        }

        if self.reader.read_bit()? {
            self.leading = self.reader.read_bits(5)? as u8;
            let significant = match self.reader.read_bits(6)? as u8 {
                0 => 64,
                n => n,
            };
            self.trailing = 64u8
                .checked_sub(self.leading + significant)
                .ok_or_else(|| {
                    StorageError::Corruption(format!(
                        "xor window out of range: leading={} significant={}",
                        self.leading, significant
                    ))
                })?;
        }

        let significant = 64u8
            .checked_sub(self.leading + self.trailing)
            .ok_or_else(|| StorageError::Corruption("xor window out of range".into()))?;
        let bits = self.reader.read_bits(significant)?;
        self.v = f64::from_bits(self.v.to_bits() ^ (bits << self.trailing));
        Ok(())
    }
}

impl ChunkIterator for XorIterator<'_> {
    fn next(&mut self) -> ValueType {
        if self.err.is_some() || self.read >= self.total {
            return ValueType::None;
        }
        match self.advance() {
            Ok(()) => {
                self.read += 1;
                ValueType::Float
            }
            Err(e) => {
                self.err = Some(e);
                ValueType::None
            }
        }
    }

    fn at(&self) -> Sample {
        Sample::new(self.t, self.v)
    }

    fn err(&self) -> Option<&StorageError> {
        self.err.as_ref()
    }
}
