//! Logical records: [`Entry`] as written by callers and [`ValueStruct`] as
//! stored next to a key in the arena or in a table block.

use crate::varint::{decode_uvarint, put_uvarint, uvarint_len};

/// A key/value pair as handed to the memtable, the WAL codec and the table
/// builder.
///
/// The key always carries the 8-byte version suffix produced by
/// [`key_with_ts`](crate::key_with_ts). An empty value is a tombstone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Unix timestamp after which the entry is expired, `0` for no TTL.
    pub expires_at: u64,
}

impl Entry {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            expires_at: 0,
        }
    }

    /// A deletion marker for `key`.
    pub fn tombstone(key: Vec<u8>) -> Self {
        Self::new(key, Vec::new())
    }

    #[must_use]
    pub fn with_ttl(mut self, expires_at: u64) -> Self {
        self.expires_at = expires_at;
        self
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_empty()
    }

    /// Size of the value part once encoded (see [`ValueStruct::encode_value`]).
    #[must_use]
    pub fn encoded_size(&self) -> u32 {
        encoded_size(&self.value, self.expires_at)
    }

    /// The value half of this entry.
    #[must_use]
    pub fn value_struct(&self) -> ValueStruct {
        ValueStruct {
            value: self.value.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// The value half of an entry: raw bytes plus expiration.
///
/// Encoded as `[varint expires_at][value bytes]`; the value length is implied
/// by the surrounding frame (arena value word or block entry bounds).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueStruct {
    pub value: Vec<u8>,
    pub expires_at: u64,
}

impl ValueStruct {
    pub fn new(value: Vec<u8>, expires_at: u64) -> Self {
        Self { value, expires_at }
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_empty()
    }

    #[must_use]
    pub fn encoded_size(&self) -> u32 {
        encoded_size(&self.value, self.expires_at)
    }

    /// Appends the encoded value to `buf`, returning the number of bytes written.
    pub fn encode_value(&self, buf: &mut Vec<u8>) -> usize {
        let n = put_uvarint(buf, self.expires_at);
        buf.extend_from_slice(&self.value);
        n + self.value.len()
    }

    /// Decodes a value produced by [`encode_value`](Self::encode_value).
    ///
    /// Returns `None` when the expiration varint is malformed.
    #[must_use]
    pub fn decode_value(buf: &[u8]) -> Option<Self> {
        let (expires_at, n) = decode_uvarint(buf)?;
        Some(Self {
            value: buf[n..].to_vec(),
            expires_at,
        })
    }
}

fn encoded_size(value: &[u8], expires_at: u64) -> u32 {
    let size = value.len() + uvarint_len(expires_at);
    assert!(
        size <= u32::MAX as usize,
        "encoded value size {} overflows u32",
        size
    );
    size as u32
}
