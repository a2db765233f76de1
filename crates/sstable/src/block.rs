use byteorder::{BigEndian, ByteOrder};
use memtable::{compare_keys, ValueStruct};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::format::{verify_checksum, BLOCK_TRAILER_SIZE, CHECKSUM_LEN, ENTRY_HEADER_SIZE};
use crate::TableError;

/// A decoded, checksum-verified block.
///
/// Decoding walks every entry once, so later positioning cannot fail.
#[derive(Debug)]
pub struct Block {
    data: Vec<u8>,
    /// End of the entry region; the offset array starts here.
    entries_end: usize,
    entry_offsets: Vec<u32>,
    base_key: Vec<u8>,
}

struct RawEntry {
    overlap: usize,
    diff_start: usize,
    diff_end: usize,
    value_start: usize,
    value_end: usize,
}

impl Block {
    /// Parses and verifies a sealed block.
    pub fn decode(data: Vec<u8>) -> Result<Self, TableError> {
        let n = data.len();
        if n < BLOCK_TRAILER_SIZE {
            return Err(TableError::Corrupt("block shorter than its trailer"));
        }
        let checksum_len = BigEndian::read_u32(&data[n - 4..]) as usize;
        if checksum_len != CHECKSUM_LEN {
            return Err(TableError::Corrupt("unexpected block checksum length"));
        }
        let checksum_start = n - 4 - CHECKSUM_LEN;
        let expected = BigEndian::read_u64(&data[checksum_start..n - 4]);
        verify_checksum(&data[..checksum_start], expected)?;

        let count_start = checksum_start - 4;
        let count = BigEndian::read_u32(&data[count_start..checksum_start]) as usize;
        if count == 0 {
            return Err(TableError::Corrupt("block holds no entries"));
        }
        let offsets_len = count
            .checked_mul(4)
            .filter(|&len| len <= count_start)
            .ok_or(TableError::Corrupt("block entry count out of range"))?;
        let entries_end = count_start - offsets_len;
        let entry_offsets: Vec<u32> = data[entries_end..count_start]
            .chunks_exact(4)
            .map(BigEndian::read_u32)
            .collect();

        if entry_offsets[0] != 0 {
            return Err(TableError::Corrupt("first entry does not start the block"));
        }
        if entry_offsets
            .windows(2)
            .any(|w| w[0] >= w[1] || w[1] as usize >= entries_end)
        {
            return Err(TableError::Corrupt("block entry offsets out of order"));
        }

        let mut block = Self {
            data,
            entries_end,
            entry_offsets,
            base_key: Vec::new(),
        };
        let first = block.raw_entry(0)?;
        if first.overlap != 0 {
            return Err(TableError::Corrupt("base entry shares a prefix"));
        }
        block.base_key = block.data[first.diff_start..first.diff_end].to_vec();
        for i in 0..block.len() {
            let raw = block.raw_entry(i)?;
            if raw.overlap > block.base_key.len() {
                return Err(TableError::Corrupt("entry overlap exceeds base key"));
            }
            if ValueStruct::decode_value(&block.data[raw.value_start..raw.value_end]).is_none() {
                return Err(TableError::Corrupt("malformed entry value"));
            }
        }
        Ok(block)
    }

    fn raw_entry(&self, i: usize) -> Result<RawEntry, TableError> {
        let start = self.entry_offsets[i] as usize;
        let end = self
            .entry_offsets
            .get(i + 1)
            .map_or(self.entries_end, |&o| o as usize);
        if start + ENTRY_HEADER_SIZE > end {
            return Err(TableError::Corrupt("entry header runs past the entry"));
        }
        let overlap = BigEndian::read_u16(&self.data[start..]) as usize;
        let diff = BigEndian::read_u16(&self.data[start + 2..]) as usize;
        let diff_start = start + ENTRY_HEADER_SIZE;
        let diff_end = diff_start + diff;
        if diff_end > end {
            return Err(TableError::Corrupt("entry key runs past the entry"));
        }
        Ok(RawEntry {
            overlap,
            diff_start,
            diff_end,
            value_start: diff_end,
            value_end: end,
        })
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entry_offsets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entry_offsets.is_empty()
    }

    #[must_use]
    pub fn base_key(&self) -> &[u8] {
        &self.base_key
    }

    /// Reassembles entry `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of range.
    #[must_use]
    pub fn entry(&self, i: usize) -> (Vec<u8>, ValueStruct) {
        let raw = self
            .raw_entry(i)
            .unwrap_or_else(|e| panic!("entry {} failed after block validation: {}", i, e));
        let mut key = Vec::with_capacity(raw.overlap + raw.diff_end - raw.diff_start);
        key.extend_from_slice(&self.base_key[..raw.overlap]);
        key.extend_from_slice(&self.data[raw.diff_start..raw.diff_end]);
        let value = ValueStruct::decode_value(&self.data[raw.value_start..raw.value_end])
            .unwrap_or_else(|| panic!("entry {} value failed after block validation", i));
        (key, value)
    }

    fn key_at(&self, i: usize) -> Vec<u8> {
        self.entry(i).0
    }
}

/// Cursor over the entries of one [`Block`].
///
/// Positioning outside the block leaves the iterator invalid rather than
/// failing.
pub struct BlockIterator {
    block: Arc<Block>,
    idx: Option<usize>,
    key: Vec<u8>,
    value: ValueStruct,
}

impl BlockIterator {
    pub fn new(block: Arc<Block>) -> Self {
        Self {
            block,
            idx: None,
            key: Vec::new(),
            value: ValueStruct::default(),
        }
    }

    #[must_use]
    pub fn valid(&self) -> bool {
        self.idx.is_some()
    }

    /// Index of the current entry.
    #[must_use]
    pub fn idx(&self) -> Option<usize> {
        self.idx
    }

    /// Key at the cursor; empty when not valid.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    #[must_use]
    pub fn value(&self) -> &ValueStruct {
        &self.value
    }

    pub fn set_idx(&mut self, i: usize) {
        if i >= self.block.len() {
            self.idx = None;
            self.key.clear();
            return;
        }
        let (key, value) = self.block.entry(i);
        self.idx = Some(i);
        self.key = key;
        self.value = value;
    }

    pub fn seek_to_first(&mut self) {
        self.set_idx(0);
    }

    pub fn seek_to_last(&mut self) {
        match self.block.len() {
            0 => self.idx = None,
            n => self.set_idx(n - 1),
        }
    }

    pub fn next(&mut self) {
        if let Some(i) = self.idx {
            self.set_idx(i + 1);
        }
    }

    pub fn prev(&mut self) {
        match self.idx {
            Some(0) | None => {
                self.idx = None;
                self.key.clear();
            }
            Some(i) => self.set_idx(i - 1),
        }
    }

    /// Positions at the first entry with key `>= key`.
    pub fn seek(&mut self, key: &[u8]) {
        let (mut lo, mut hi) = (0, self.block.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if compare_keys(&self.block.key_at(mid), key) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        self.set_idx(lo);
    }
}
