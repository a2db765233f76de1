//! Record framing.
//!
//! ```text
//! [varint key_len][varint value_len][varint expires_at][key][value][crc32c: u32 BE]
//! ```
//!
//! The checksum covers every byte before it.

use byteorder::{BigEndian, ReadBytesExt};
use memtable::{put_uvarint, read_uvarint, uvarint_len, Entry, MAX_VARINT_LEN64};
use std::io::{self, Read};

use crate::hash_reader::{HashReader, CRC32};
use crate::WalError;

/// Upper bound of an encoded [`WalHeader`]: two 32-bit varints and one
/// 64-bit varint.
pub const MAX_HEADER_SIZE: usize = 5 + 5 + MAX_VARINT_LEN64;

const CRC_SIZE: usize = 4;

/// Key or value lengths above this are treated as corruption rather than
/// allocated.
pub const MAX_FIELD_SIZE: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalHeader {
    pub key_len: u32,
    pub value_len: u32,
    pub expires_at: u64,
}

impl WalHeader {
    pub fn for_entry(entry: &Entry) -> Self {
        assert!(
            entry.key.len() <= u32::MAX as usize && entry.value.len() <= u32::MAX as usize,
            "wal entry field exceeds u32 length"
        );
        Self {
            key_len: entry.key.len() as u32,
            value_len: entry.value.len() as u32,
            expires_at: entry.expires_at,
        }
    }

    /// Appends the varint encoding to `buf` and returns its length.
    pub fn encode(&self, buf: &mut Vec<u8>) -> usize {
        put_uvarint(buf, self.key_len as u64)
            + put_uvarint(buf, self.value_len as u64)
            + put_uvarint(buf, self.expires_at)
    }

    #[must_use]
    pub fn encoded_len(&self) -> usize {
        uvarint_len(self.key_len as u64)
            + uvarint_len(self.value_len as u64)
            + uvarint_len(self.expires_at)
    }

    pub fn decode<R: Read>(reader: &mut R) -> Result<Self, WalError> {
        let key_len = read_len(reader)?;
        let value_len = read_len(reader)?;
        let expires_at = read_varint(reader)?;
        Ok(Self {
            key_len,
            value_len,
            expires_at,
        })
    }
}

fn read_varint<R: Read>(reader: &mut R) -> Result<u64, WalError> {
    read_uvarint(reader).map_err(|e| match e.kind() {
        io::ErrorKind::InvalidData => WalError::Corrupt("malformed varint"),
        _ => WalError::Io(e),
    })
}

fn read_len<R: Read>(reader: &mut R) -> Result<u32, WalError> {
    let len = read_varint(reader)?;
    if len > MAX_FIELD_SIZE as u64 {
        return Err(WalError::Corrupt("field length out of range"));
    }
    Ok(len as u32)
}

/// Encodes `entry` into `buf`, replacing its contents, and returns the
/// record length.
pub fn wal_codec(buf: &mut Vec<u8>, entry: &Entry) -> usize {
    buf.clear();
    WalHeader::for_entry(entry).encode(buf);
    buf.extend_from_slice(&entry.key);
    buf.extend_from_slice(&entry.value);
    let crc = CRC32.checksum(buf);
    buf.extend_from_slice(&crc.to_be_bytes());
    buf.len()
}

/// Upper bound of the record size of `entry`, for sizing buffers.
#[must_use]
pub fn estimate_wal_codec_size(entry: &Entry) -> usize {
    MAX_HEADER_SIZE + entry.key.len() + entry.value.len() + CRC_SIZE
}

/// Reads one record, verifying its checksum.
pub fn decode_record<R: Read>(reader: &mut R) -> Result<Entry, WalError> {
    read_record(reader).map(|(entry, _)| entry)
}

/// Like [`decode_record`], also returning the number of bytes consumed.
pub(crate) fn read_record<R: Read>(reader: &mut R) -> Result<(Entry, usize), WalError> {
    let mut hr = HashReader::new(reader);
    let header = WalHeader::decode(&mut hr)?;

    let mut key = vec![0u8; header.key_len as usize];
    hr.read_exact(&mut key)?;
    let mut value = vec![0u8; header.value_len as usize];
    hr.read_exact(&mut value)?;

    let actual = hr.sum32();
    let expected = hr.inner_mut().read_u32::<BigEndian>()?;
    if expected != actual {
        return Err(WalError::ChecksumMismatch { expected, actual });
    }

    let consumed = hr.bytes_read() + CRC_SIZE;
    Ok((
        Entry {
            key,
            value,
            expires_at: header.expires_at,
        },
        consumed,
    ))
}
