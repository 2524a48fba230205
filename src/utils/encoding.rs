//! Little-endian and LEB128 helpers for the segment and queue formats.

use std::io::{self, Write};

/// Append `value` as unsigned LEB128
pub fn encode_varint(mut value: u32, buf: &mut Vec<u8>) {
    while value >= 0x80 {
        buf.push((value & 0x7f) as u8 | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Decode one LEB128 value, returning it and its encoded length.
/// `None` on a truncated or over-long encoding.
pub fn decode_varint(buf: &[u8]) -> Option<(u32, usize)> {
    let mut value: u32 = 0;
    for (i, &byte) in buf.iter().take(5).enumerate() {
        value |= u32::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Varint-encode the gaps of an ascending list
pub fn delta_encode(values: &[u32], buf: &mut Vec<u8>) {
    values.iter().fold(0u32, |prev, &value| {
        encode_varint(value - prev, buf);
        value
    });
}

/// Delta-decode exactly `count` u32s, returning the values and bytes consumed
pub fn delta_decode_n(buf: &[u8], count: usize) -> Option<(Vec<u32>, usize)> {
    let mut result = Vec::with_capacity(count);
    let mut prev = 0u32;
    let mut pos = 0;

    for _ in 0..count {
        let (delta, consumed) = decode_varint(&buf[pos..])?;
        prev = prev.saturating_add(delta);
        result.push(prev);
        pos += consumed;
    }

    Some((result, pos))
}

pub fn write_u16_le<W: Write>(writer: &mut W, value: u16) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

pub fn write_u32_le<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

pub fn write_u64_le<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Bounds-checked little-endian reader over a byte slice (typically an mmap)
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    pub fn u16(&mut self) -> Option<u16> {
        let b = self.bytes(2)?;
        Some(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Option<u32> {
        let b = self.bytes(4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Option<u64> {
        let b = self.bytes(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Some(u64::from_le_bytes(arr))
    }

    pub fn varint(&mut self) -> Option<u32> {
        let (value, consumed) = decode_varint(self.buf.get(self.pos..)?)?;
        self.pos += consumed;
        Some(value)
    }
}
