use anyhow::{Context, Result};
use bloom::BloomFilter;
use byteorder::{BigEndian, ByteOrder};
use memtable::{compare_keys, parse_key, same_key, Entry, ValueStruct};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use crate::block::{Block, BlockIterator};
use crate::format::{verify_checksum, CHECKSUM_LEN, TABLE_FOOTER_SIZE};
use crate::index::TableIndex;
use crate::TableError;

/// An immutable table held in memory.
///
/// [`open`](Table::open) verifies the index checksum and every block
/// checksum up front; lookups and iteration afterwards cannot fail.
#[derive(Debug)]
pub struct Table {
    blocks: Vec<Arc<Block>>,
    index: TableIndex,
    bloom: Option<BloomFilter>,
    size: usize,
}

impl Table {
    /// Decodes a table image produced by
    /// [`TableBuilder::finish`](crate::TableBuilder::finish).
    pub fn open(data: &[u8]) -> Result<Self, TableError> {
        if data.is_empty() {
            return Ok(Self {
                blocks: Vec::new(),
                index: TableIndex::default(),
                bloom: None,
                size: 0,
            });
        }
        let n = data.len();
        if n < TABLE_FOOTER_SIZE {
            return Err(TableError::Corrupt("table shorter than its footer"));
        }
        let checksum_len = BigEndian::read_u32(&data[n - 4..]) as usize;
        if checksum_len != CHECKSUM_LEN {
            return Err(TableError::Corrupt("unexpected index checksum length"));
        }
        let checksum_start = n - 4 - CHECKSUM_LEN;
        let expected = BigEndian::read_u64(&data[checksum_start..n - 4]);
        let index_len_start = checksum_start - 4;
        let index_len = BigEndian::read_u32(&data[index_len_start..checksum_start]) as usize;
        if index_len > index_len_start {
            return Err(TableError::Corrupt("index length out of range"));
        }
        let index_start = index_len_start - index_len;
        let index_bytes = &data[index_start..index_len_start];
        verify_checksum(index_bytes, expected)?;
        let index = TableIndex::decode(index_bytes)?;

        let mut blocks = Vec::with_capacity(index.offsets.len());
        let mut expected_offset = 0usize;
        let mut entries = 0usize;
        for bo in &index.offsets {
            let start = bo.offset as usize;
            let end = start + bo.len as usize;
            if start != expected_offset || end > index_start {
                return Err(TableError::Corrupt("block offset out of range"));
            }
            let block = Block::decode(data[start..end].to_vec())?;
            if block.base_key() != bo.key.as_slice() {
                return Err(TableError::Corrupt("index base key disagrees with block"));
            }
            entries += block.len();
            expected_offset = end;
            blocks.push(Arc::new(block));
        }
        if expected_offset != index_start {
            return Err(TableError::Corrupt("gap between blocks and index"));
        }
        if entries != index.key_count as usize {
            return Err(TableError::Corrupt("index key count disagrees with blocks"));
        }

        let bloom = if index.bloom_filter.is_empty() {
            None
        } else {
            Some(
                BloomFilter::decode(&index.bloom_filter)
                    .map_err(|_| TableError::Corrupt("malformed bloom filter"))?,
            )
        };

        Ok(Self {
            blocks,
            index,
            bloom,
            size: n,
        })
    }

    /// Reads and decodes a table file.
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .with_context(|| format!("reading table file {}", path.display()))?;
        let table =
            Self::open(&data).with_context(|| format!("decoding table file {}", path.display()))?;
        Ok(table)
    }

    /// Whether the bloom filter admits the logical key of `key`. Tables
    /// built without a filter admit everything.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.bloom
            .as_ref()
            .map_or(true, |bf| bf.may_contain_hash(bloom::hash(parse_key(key))))
    }

    /// Point lookup with the same semantics as
    /// [`Skiplist::lookup`](memtable::Skiplist::lookup): the newest version
    /// of the logical key not newer than `key`'s version. Tombstones are
    /// returned, so the caller can tell a deletion from absence.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<ValueStruct> {
        if !self.may_contain(key) {
            return None;
        }
        let mut it = self.iter();
        it.seek(key);
        if !it.valid() || !same_key(key, it.key()) {
            return None;
        }
        Some(it.value().clone())
    }

    #[must_use]
    pub fn iter(&self) -> TableIterator {
        TableIterator::new(self.blocks.clone())
    }

    /// Entries in the table.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.index.key_count as usize
    }

    #[must_use]
    pub fn max_version(&self) -> u64 {
        self.index.max_version
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn has_bloom(&self) -> bool {
        self.bloom.is_some()
    }

    /// Size of the encoded image in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[must_use]
    pub fn index(&self) -> &TableIndex {
        &self.index
    }
}

/// Cursor across every block of a [`Table`], in key order.
pub struct TableIterator {
    blocks: Vec<Arc<Block>>,
    block_idx: usize,
    bi: Option<BlockIterator>,
}

impl TableIterator {
    fn new(blocks: Vec<Arc<Block>>) -> Self {
        Self {
            blocks,
            block_idx: 0,
            bi: None,
        }
    }

    fn open_block(&mut self, idx: usize) -> Option<&mut BlockIterator> {
        let block = Arc::clone(self.blocks.get(idx)?);
        self.block_idx = idx;
        self.bi = Some(BlockIterator::new(block));
        self.bi.as_mut()
    }

    #[must_use]
    pub fn valid(&self) -> bool {
        self.bi.as_ref().is_some_and(BlockIterator::valid)
    }

    /// # Panics
    ///
    /// Panics if the iterator is not [`valid`](Self::valid).
    #[must_use]
    pub fn key(&self) -> &[u8] {
        self.current().key()
    }

    /// # Panics
    ///
    /// Panics if the iterator is not [`valid`](Self::valid).
    #[must_use]
    pub fn value(&self) -> &ValueStruct {
        self.current().value()
    }

    fn current(&self) -> &BlockIterator {
        match &self.bi {
            Some(bi) if bi.valid() => bi,
            _ => panic!("table iterator used while not positioned"),
        }
    }

    pub fn seek_to_first(&mut self) {
        match self.open_block(0) {
            Some(bi) => bi.seek_to_first(),
            None => self.bi = None,
        }
    }

    pub fn seek_to_last(&mut self) {
        let Some(last) = self.blocks.len().checked_sub(1) else {
            self.bi = None;
            return;
        };
        if let Some(bi) = self.open_block(last) {
            bi.seek_to_last();
        }
    }

    pub fn next(&mut self) {
        let Some(bi) = self.bi.as_mut() else {
            return;
        };
        bi.next();
        if !bi.valid() {
            let next = self.block_idx + 1;
            match self.open_block(next) {
                Some(bi) => bi.seek_to_first(),
                None => self.bi = None,
            }
        }
    }

    pub fn prev(&mut self) {
        let Some(bi) = self.bi.as_mut() else {
            return;
        };
        bi.prev();
        if !bi.valid() {
            match self.block_idx.checked_sub(1) {
                Some(prev) => {
                    if let Some(bi) = self.open_block(prev) {
                        bi.seek_to_last();
                    }
                }
                None => self.bi = None,
            }
        }
    }

    /// Positions at the first entry with key `>= key`.
    pub fn seek(&mut self, key: &[u8]) {
        // Blocks whose base key is <= key; the target is in the last of
        // them or starts the block after it.
        let at_or_before = self
            .blocks
            .partition_point(|b| compare_keys(b.base_key(), key) != Ordering::Greater);
        let start = at_or_before.saturating_sub(1);
        let Some(bi) = self.open_block(start) else {
            self.bi = None;
            return;
        };
        bi.seek(key);
        if bi.valid() {
            return;
        }
        match self.open_block(start + 1) {
            Some(bi) => bi.seek_to_first(),
            None => self.bi = None,
        }
    }

    /// Drains the remaining entries, starting from the first one.
    pub fn entries(mut self) -> impl Iterator<Item = Entry> {
        self.seek_to_first();
        std::iter::from_fn(move || {
            if !self.valid() {
                return None;
            }
            let value = self.value().clone();
            let entry = Entry {
                key: self.key().to_vec(),
                value: value.value,
                expires_at: value.expires_at,
            };
            self.next();
            Some(entry)
        })
    }
}
