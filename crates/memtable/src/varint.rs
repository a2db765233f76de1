//! Unsigned LEB128 varints, the encoding used for value expirations and WAL
//! record headers.

use byteorder::ReadBytesExt;
use std::io::{self, Read};

/// Longest encoding of a `u64`.
pub const MAX_VARINT_LEN64: usize = 10;

/// Number of bytes `value` occupies once encoded.
#[must_use]
pub fn uvarint_len(mut value: u64) -> usize {
    let mut n = 1;
    while value >= 0x80 {
        value >>= 7;
        n += 1;
    }
    n
}

/// Appends `value` to `buf`, returning the number of bytes written.
pub fn put_uvarint(buf: &mut Vec<u8>, mut value: u64) -> usize {
    let mut n = 1;
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
        n += 1;
    }
    buf.push(value as u8);
    n
}

/// Decodes a varint from the front of `buf`, returning the value and the
/// number of bytes consumed. `None` on truncation or overflow.
#[must_use]
pub fn decode_uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        if i == MAX_VARINT_LEN64 || (i == MAX_VARINT_LEN64 - 1 && byte > 1) {
            return None;
        }
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
        shift += 7;
    }
    None
}

/// Reads a varint byte by byte from `reader`.
pub fn read_uvarint<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut result = 0u64;
    let mut shift = 0u32;
    for i in 0..MAX_VARINT_LEN64 {
        let byte = reader.read_u8()?;
        if i == MAX_VARINT_LEN64 - 1 && byte > 1 {
            break;
        }
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "varint overflows u64",
    ))
}
