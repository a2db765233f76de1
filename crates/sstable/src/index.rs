//! Table index: where each block starts, its base key, and table-wide
//! metadata.
//!
//! ```text
//! [block_count: u32]
//!   { [key_len: u32][base key][offset: u32][len: u32] } * block_count
//! [key_count: u32][max_version: u64][bloom_len: u32][bloom bytes]
//! ```

use byteorder::{BigEndian, ReadBytesExt};
use std::io::Read;

use crate::TableError;

/// Location of one block inside the table image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockOffset {
    /// First key of the block.
    pub key: Vec<u8>,
    pub offset: u32,
    pub len: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableIndex {
    pub offsets: Vec<BlockOffset>,
    pub key_count: u32,
    pub max_version: u64,
    /// Encoded [`bloom::BloomFilter`]; empty when filtering is disabled.
    pub bloom_filter: Vec<u8>,
}

impl TableIndex {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let keys: usize = self.offsets.iter().map(|o| o.key.len() + 12).sum();
        let mut buf = Vec::with_capacity(4 + keys + 16 + self.bloom_filter.len());
        buf.extend_from_slice(&u32_len(self.offsets.len()).to_be_bytes());
        for bo in &self.offsets {
            buf.extend_from_slice(&u32_len(bo.key.len()).to_be_bytes());
            buf.extend_from_slice(&bo.key);
            buf.extend_from_slice(&bo.offset.to_be_bytes());
            buf.extend_from_slice(&bo.len.to_be_bytes());
        }
        buf.extend_from_slice(&self.key_count.to_be_bytes());
        buf.extend_from_slice(&self.max_version.to_be_bytes());
        buf.extend_from_slice(&u32_len(self.bloom_filter.len()).to_be_bytes());
        buf.extend_from_slice(&self.bloom_filter);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, TableError> {
        let mut r = buf;
        let count = read_u32(&mut r)? as usize;
        // Every block offset takes at least 12 bytes.
        if count > r.len() / 12 {
            return Err(TableError::Corrupt("index block count out of range"));
        }
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            let key = read_bytes(&mut r)?;
            let offset = read_u32(&mut r)?;
            let len = read_u32(&mut r)?;
            offsets.push(BlockOffset { key, offset, len });
        }
        let key_count = read_u32(&mut r)?;
        let max_version = r
            .read_u64::<BigEndian>()
            .map_err(|_| TableError::Corrupt("truncated index"))?;
        let bloom_filter = read_bytes(&mut r)?;
        if !r.is_empty() {
            return Err(TableError::Corrupt("trailing bytes after index"));
        }
        Ok(Self {
            offsets,
            key_count,
            max_version,
            bloom_filter,
        })
    }
}

pub(crate) fn u32_len(n: usize) -> u32 {
    assert!(n <= u32::MAX as usize, "index field length {} overflows u32", n);
    n as u32
}

fn read_u32(r: &mut &[u8]) -> Result<u32, TableError> {
    r.read_u32::<BigEndian>()
        .map_err(|_| TableError::Corrupt("truncated index"))
}

fn read_bytes(r: &mut &[u8]) -> Result<Vec<u8>, TableError> {
    let len = read_u32(r)? as usize;
    if len > r.len() {
        return Err(TableError::Corrupt("index field runs past the end"));
    }
    let mut out = vec![0u8; len];
    r.read_exact(&mut out)
        .map_err(|_| TableError::Corrupt("truncated index"))?;
    Ok(out)
}
