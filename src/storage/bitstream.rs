//! Bit-granular reader and writer used by the XOR chunk codec
//!
//! Bits are packed most-significant first. Varints are written byte-aligned
//! relative to the stream (LEB128, zig-zag for signed values) but may start
//! at any bit offset.

use crate::storage::error::{StorageError, StorageResult};

/// Append-only bit buffer
#[derive(Debug, Clone, Default)]
pub(crate) struct BitWriter {
    bytes: Vec<u8>,
    /// Unused bits remaining in the last byte
    free: u8,
}

impl BitWriter {
    /// Create a writer whose first `len` bytes are reserved for a header
    pub fn with_header(len: usize) -> Self {
        Self {
            bytes: vec![0; len],
            free: 0,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn header_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn write_bit(&mut self, bit: bool) {
        if self.free == 0 {
            self.bytes.push(0);
            self.free = 8;
        }
        if bit {
            let last = self.bytes.len() - 1;
            self.bytes[last] |= 1 << (self.free - 1);
        }
        self.free -= 1;
    }

    /// Write the low `nbits` bits of `value`
    pub fn write_bits(&mut self, value: u64, nbits: u8) {
        if nbits == 0 {
            return;
        }
        let mut v = value << (64 - nbits as u32);
        let mut remaining = nbits;

        if self.free == 0 {
            while remaining >= 8 {
                self.bytes.push((v >> 56) as u8);
                v <<= 8;
                remaining -= 8;
            }
        }
        while remaining > 0 {
            self.write_bit(v >> 63 == 1);
            v <<= 1;
            remaining -= 1;
        }
    }

    pub fn write_uvarint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.write_bits((value as u8 | 0x80) as u64, 8);
            value >>= 7;
        }
        self.write_bits(value, 8);
    }

    pub fn write_varint(&mut self, value: i64) {
        self.write_uvarint(((value << 1) ^ (value >> 63)) as u64);
    }
}

/// Cursor over a packed bit buffer
#[derive(Debug, Clone)]
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    /// Absolute bit position
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// Start reading at byte `offset`
    pub fn new(data: &'a [u8], offset: usize) -> Self {
        Self {
            data,
            pos: offset * 8,
        }
    }

    pub fn read_bit(&mut self) -> StorageResult<bool> {
        let byte = self.data.get(self.pos / 8).ok_or_else(|| {
            StorageError::Corruption(format!("chunk payload truncated at bit {}", self.pos))
        })?;
        let bit = (byte >> (7 - (self.pos % 8))) & 1 == 1;
        self.pos += 1;
        Ok(bit)
    }

    pub fn read_bits(&mut self, nbits: u8) -> StorageResult<u64> {
        let mut value = 0u64;
        for _ in 0..nbits {
            value = (value << 1) | self.read_bit()? as u64;
        }
        Ok(value)
    }

    pub fn read_uvarint(&mut self) -> StorageResult<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_bits(8)?;
            if shift >= 64 {
                return Err(StorageError::Corruption("varint overflows 64 bits".into()));
            }
            value |= (byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    pub fn read_varint(&mut self) -> StorageResult<i64> {
        let raw = self.read_uvarint()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_roundtrip_unaligned() {
        let mut writer = BitWriter::with_header(2);
        writer.write_bit(true);
        writer.write_bits(0b101, 3);
        writer.write_bits(u64::MAX, 64);
        writer.write_bits(0x1234, 14);

        let mut reader = BitReader::new(writer.bytes(), 2);
        assert!(reader.read_bit().unwrap());
        assert_eq!(reader.read_bits(3).unwrap(), 0b101);
        assert_eq!(reader.read_bits(64).unwrap(), u64::MAX);
        assert_eq!(reader.read_bits(14).unwrap(), 0x1234);
    }

    #[test]
    fn test_varints() {
        let mut writer = BitWriter::default();
        writer.write_bit(false);
        writer.write_varint(-1_700_000_000_000);
        writer.write_uvarint(300);
        writer.write_varint(0);

        let mut reader = BitReader::new(writer.bytes(), 0);
        assert!(!reader.read_bit().unwrap());
        assert_eq!(reader.read_varint().unwrap(), -1_700_000_000_000);
        assert_eq!(reader.read_uvarint().unwrap(), 300);
        assert_eq!(reader.read_varint().unwrap(), 0);
    }

    #[test]
    fn test_read_past_end_is_corruption() {
        let mut reader = BitReader::new(&[0xff], 0);
        assert_eq!(reader.read_bits(8).unwrap(), 0xff);
        assert!(matches!(reader.read_bit(), Err(StorageError::Corruption(_))));
    }
}
