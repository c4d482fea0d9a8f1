//! Binary codecs for the shard protocol
//!
//! Integers on the wire are big-endian (network order). Strings are fixed-width,
//! zero-padded ASCII fields. Decoding goes through [`PacketReader`], a cursor over
//! one frame that packet decoders advance by exactly the bytes they consume.

use bytes::{BufMut, BytesMut};
use shardlink_core::{Result, ShardError};

/// Byte order of the 2-byte length field of variable-size frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LengthOrder {
    /// Network order, `[0x00, 0x06]` is 6
    #[default]
    BigEndian,
    /// `[0x06, 0x00]` is 6
    LittleEndian,
}

impl LengthOrder {
    #[inline]
    pub fn decode(self, bytes: [u8; 2]) -> u16 {
        match self {
            Self::BigEndian => u16::from_be_bytes(bytes),
            Self::LittleEndian => u16::from_le_bytes(bytes),
        }
    }

    #[inline]
    pub fn encode(self, value: u16) -> [u8; 2] {
        match self {
            Self::BigEndian => value.to_be_bytes(),
            Self::LittleEndian => value.to_le_bytes(),
        }
    }
}

/// Cursor over the bytes of a single frame
///
/// The reader never looks past the end of its slice, so a decoder handed a
/// frame of `n` bytes cannot read into the next frame.
#[derive(Debug)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Create a reader already positioned at `pos`
    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos: pos.min(buf.len()) }
    }

    /// Current cursor position (bytes consumed from the start of the frame)
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left before the frame limit
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Total length of the frame
    #[inline]
    pub fn limit(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ShardError::InvalidData(format!(
                "Not enough bytes for {}: need {}, have {}",
                what,
                n,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1, "u8")?[0])
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2, "u16")?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4, "u32")?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read `n` raw bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n, "byte run")
    }

    /// Read everything up to the frame limit
    pub fn read_rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    /// Read a zero-padded string field of `width` bytes
    ///
    /// The value ends at the first NUL; invalid UTF-8 is replaced lossily.
    pub fn read_fixed_string(&mut self, width: usize) -> Result<String> {
        let raw = self.take(width, "string field")?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }
}

#[inline]
pub fn write_u8(buf: &mut BytesMut, val: u8) {
    buf.put_u8(val);
}

#[inline]
pub fn write_u16(buf: &mut BytesMut, val: u16) {
    buf.put_u16(val);
}

#[inline]
pub fn write_u32(buf: &mut BytesMut, val: u32) {
    buf.put_u32(val);
}

/// Write `val` into a zero-padded field of exactly `width` bytes
///
/// Longer values are truncated to the field width.
pub fn write_fixed_string(buf: &mut BytesMut, val: &str, width: usize) {
    let bytes = val.as_bytes();
    let n = bytes.len().min(width);
    buf.put_slice(&bytes[..n]);
    buf.put_bytes(0, width - n);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_order() {
        assert_eq!(LengthOrder::BigEndian.decode([0x00, 0x06]), 6);
        assert_eq!(LengthOrder::LittleEndian.decode([0x06, 0x00]), 6);
        assert_eq!(LengthOrder::LittleEndian.encode(0x0102), [0x02, 0x01]);
        assert_eq!(LengthOrder::default(), LengthOrder::BigEndian);
    }

    #[test]
    fn test_reader_integers() {
        let data = [0x01, 0x02, 0x03, 0xDE, 0xAD, 0xBE, 0xEF];
        let mut reader = PacketReader::new(&data);
        assert_eq!(reader.read_u8().unwrap(), 0x01);
        assert_eq!(reader.read_u16().unwrap(), 0x0203);
        assert_eq!(reader.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(reader.position(), 7);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_reader_underflow_keeps_cursor() {
        let data = [0x01, 0x02, 0x03];
        let mut reader = PacketReader::at(&data, 1);
        assert!(reader.read_u32().is_err());
        assert_eq!(reader.position(), 1);
        assert_eq!(reader.read_rest(), &[0x02, 0x03]);
    }

    #[test]
    fn test_fixed_string() {
        let mut buf = BytesMut::new();
        write_fixed_string(&mut buf, "admin", 8);
        assert_eq!(&buf[..], b"admin\0\0\0");

        let mut reader = PacketReader::new(&buf);
        assert_eq!(reader.read_fixed_string(8).unwrap(), "admin");
        assert_eq!(reader.position(), 8);
    }

    #[test]
    fn test_fixed_string_truncates() {
        let mut buf = BytesMut::new();
        write_fixed_string(&mut buf, "abcdef", 4);
        assert_eq!(&buf[..], b"abcd");
    }

    #[test]
    fn test_writer_integers_are_big_endian() {
        let mut buf = BytesMut::new();
        write_u8(&mut buf, 0xA0);
        write_u16(&mut buf, 0x0102);
        write_u32(&mut buf, 0x0A0B0C0D);
        assert_eq!(&buf[..], &[0xA0, 0x01, 0x02, 0x0A, 0x0B, 0x0C, 0x0D]);
    }
}
