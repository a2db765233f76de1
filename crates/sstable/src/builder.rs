use bloom::BloomFilter;
use config::Options;
use memtable::{parse_key, parse_ts, put_uvarint, Entry, TS_SIZE};
use tracing::debug;

use crate::format::{checksum, BLOCK_TRAILER_SIZE, CHECKSUM_LEN};
use crate::index::{u32_len, BlockOffset, TableIndex};

/// Extra bytes the sealing estimate reserves per entry beyond key and value.
const ENTRY_OVERHEAD_ESTIMATE: usize = 6;

/// The block currently receiving entries.
struct BlockBuilder {
    data: Vec<u8>,
    base_key: Vec<u8>,
    entry_offsets: Vec<u32>,
}

impl BlockBuilder {
    fn new(block_size: usize) -> Self {
        Self {
            data: Vec::with_capacity(block_size),
            base_key: Vec::new(),
            entry_offsets: Vec::new(),
        }
    }

    /// Length of this block once sealed.
    fn sealed_size(&self) -> usize {
        self.data.len() + self.entry_offsets.len() * 4 + BLOCK_TRAILER_SIZE
    }

    /// Suffix of `key` not shared with the base key.
    fn key_diff<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        let shared = key
            .iter()
            .zip(&self.base_key)
            .take_while(|(a, b)| a == b)
            .count();
        &key[shared..]
    }

    fn seal(mut self) -> SealedBlock {
        for off in &self.entry_offsets {
            self.data.extend_from_slice(&off.to_be_bytes());
        }
        self.data
            .extend_from_slice(&(self.entry_offsets.len() as u32).to_be_bytes());
        let sum = checksum(&self.data);
        self.data.extend_from_slice(&sum.to_be_bytes());
        self.data
            .extend_from_slice(&(CHECKSUM_LEN as u32).to_be_bytes());
        assert!(
            self.data.len() <= u32::MAX as usize,
            "sealed block of {} bytes overflows u32",
            self.data.len()
        );
        SealedBlock {
            base_key: self.base_key,
            data: self.data,
        }
    }
}

pub(crate) struct SealedBlock {
    base_key: Vec<u8>,
    data: Vec<u8>,
}

/// Everything a finished table consists of, before it is laid out as bytes.
#[derive(Default)]
pub struct BuildData {
    blocks: Vec<SealedBlock>,
    index: Vec<u8>,
    checksum: u64,
    size: usize,
}

impl BuildData {
    /// Length of the image [`copy_to`](Self::copy_to) writes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Lays the table image out into `dst` and returns the bytes written.
    ///
    /// # Panics
    ///
    /// Panics if `dst` is shorter than [`size`](Self::size).
    pub fn copy_to(&self, dst: &mut [u8]) -> usize {
        if self.is_empty() {
            return 0;
        }
        assert!(
            dst.len() >= self.size,
            "destination of {} bytes cannot hold a {} byte table",
            dst.len(),
            self.size
        );
        let mut written = 0;
        let mut put = |bytes: &[u8]| {
            dst[written..written + bytes.len()].copy_from_slice(bytes);
            written += bytes.len();
        };
        for b in &self.blocks {
            put(&b.data);
        }
        put(&self.index);
        put(&u32_len(self.index.len()).to_be_bytes());
        put(&self.checksum.to_be_bytes());
        put(&(CHECKSUM_LEN as u32).to_be_bytes());
        written
    }
}

/// Encodes sorted entries into an immutable table image.
///
/// Entries must arrive in ascending [`compare_keys`](memtable::compare_keys)
/// order. They are packed into prefix-compressed blocks of roughly
/// `block_size` bytes; [`finish`](Self::finish) appends the index.
pub struct TableBuilder {
    block_size: usize,
    table_size: u64,
    bloom_false_positive: f64,

    cur: Option<BlockBuilder>,
    blocks: Vec<SealedBlock>,
    sealed_size: u64,

    key_hashes: Vec<u64>,
    max_version: u64,
    key_count: u32,
    stale_data_size: u64,
}

impl TableBuilder {
    /// A builder whose capacity is `opt.sstable_max_size`.
    pub fn new(opt: &Options) -> Self {
        Self::with_size(opt, opt.sstable_max_size)
    }

    /// A builder whose capacity is `size` bytes instead of the configured
    /// table size.
    pub fn with_size(opt: &Options, size: u64) -> Self {
        Self {
            block_size: opt.block_size,
            table_size: size,
            bloom_false_positive: opt.bloom_false_positive,
            cur: None,
            blocks: Vec::new(),
            sealed_size: 0,
            key_hashes: Vec::new(),
            max_version: 0,
            key_count: 0,
            stale_data_size: 0,
        }
    }

    pub fn add_key(&mut self, entry: &Entry) {
        self.add(entry);
    }

    /// Adds an entry that a compaction already knows to be shadowed. It is
    /// stored like any other but accounted in
    /// [`stale_data_size`](Self::stale_data_size).
    ///
    /// A stale entry that opens a block also owns that block's index entry,
    /// so its key and offset are counted once more.
    pub fn add_stale_key(&mut self, entry: &Entry) {
        let mut stale = entry.key.len() + entry.value.len() + 4 + 4;
        if self.add(entry) {
            stale += entry.key.len() + 4;
        }
        self.stale_data_size += stale as u64;
    }

    fn should_seal(&self, entry: &Entry) -> bool {
        let Some(cur) = &self.cur else {
            return true;
        };
        if cur.entry_offsets.is_empty() {
            return false;
        }
        // + 1 for the offset of the incoming entry.
        let offsets_size = (cur.entry_offsets.len() + 1) * 4 + BLOCK_TRAILER_SIZE;
        let estimate = cur.data.len()
            + ENTRY_OVERHEAD_ESTIMATE
            + entry.key.len()
            + entry.encoded_size() as usize
            + offsets_size;
        assert!(
            estimate < u32::MAX as usize,
            "block size estimate {} overflows u32",
            estimate
        );
        estimate > self.block_size
    }

    /// Appends `entry`, sealing the open block first when it is full.
    /// Returns whether `entry` starts a new block.
    fn add(&mut self, entry: &Entry) -> bool {
        let key = entry.key.as_slice();
        assert!(
            key.len() > TS_SIZE,
            "table keys must carry an {}-byte version suffix",
            TS_SIZE
        );

        let opens_block = self.should_seal(entry);
        if opens_block {
            self.finish_block();
            self.cur = Some(BlockBuilder::new(self.block_size));
        }

        self.key_hashes.push(bloom::hash(parse_key(key)));
        self.max_version = self.max_version.max(parse_ts(key));

        let Some(cur) = self.cur.as_mut() else {
            unreachable!("a block is always open after sealing");
        };
        let diff = if cur.base_key.is_empty() {
            cur.base_key = key.to_vec();
            key
        } else {
            cur.key_diff(key)
        };
        let overlap = key.len() - diff.len();
        assert!(
            overlap <= u16::MAX as usize && diff.len() <= u16::MAX as usize,
            "key of {} bytes does not fit the u16 entry header",
            key.len()
        );
        assert!(
            cur.data.len() <= u32::MAX as usize,
            "block offset overflows u32"
        );

        cur.entry_offsets.push(cur.data.len() as u32);
        cur.data.extend_from_slice(&(overlap as u16).to_be_bytes());
        cur.data.extend_from_slice(&(diff.len() as u16).to_be_bytes());
        cur.data.extend_from_slice(diff);
        put_uvarint(&mut cur.data, entry.expires_at);
        cur.data.extend_from_slice(&entry.value);
        opens_block
    }

    fn finish_block(&mut self) {
        let Some(cur) = self.cur.take() else {
            return;
        };
        if cur.entry_offsets.is_empty() {
            return;
        }
        let entries = cur.entry_offsets.len();
        let block = cur.seal();
        self.sealed_size += block.data.len() as u64;
        assert!(
            self.sealed_size <= u32::MAX as u64,
            "table of {} bytes overflows u32 offsets",
            self.sealed_size
        );
        self.key_count += entries as u32;
        debug!(
            block = self.blocks.len(),
            entries,
            bytes = block.data.len(),
            "block sealed"
        );
        self.blocks.push(block);
    }

    /// Whether the table has grown past its size limit. Once true it stays
    /// true.
    #[must_use]
    pub fn reached_capacity(&self) -> bool {
        self.estimated_size() > self.table_size
    }

    /// Sealed block bytes plus what the open block will take once sealed.
    #[must_use]
    pub fn estimated_size(&self) -> u64 {
        let open = self
            .cur
            .as_ref()
            .filter(|c| !c.entry_offsets.is_empty())
            .map_or(0, BlockBuilder::sealed_size);
        self.sealed_size + open as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.key_hashes.is_empty()
    }

    /// Entries added so far.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.key_hashes.len()
    }

    #[must_use]
    pub fn stale_data_size(&self) -> u64 {
        self.stale_data_size
    }

    #[must_use]
    pub fn max_version(&self) -> u64 {
        self.max_version
    }

    /// Seals the open block and assembles blocks, index and checksum.
    /// An empty builder yields empty [`BuildData`].
    pub fn done(mut self) -> BuildData {
        self.finish_block();
        if self.blocks.is_empty() {
            return BuildData::default();
        }

        let bloom_filter = if self.bloom_false_positive > 0.0 {
            BloomFilter::from_hashes(&self.key_hashes, self.bloom_false_positive).encode()
        } else {
            Vec::new()
        };

        let mut offsets = Vec::with_capacity(self.blocks.len());
        let mut start = 0u32;
        for b in &self.blocks {
            let len = b.data.len() as u32;
            offsets.push(BlockOffset {
                key: b.base_key.clone(),
                offset: start,
                len,
            });
            start += len;
        }

        let index = TableIndex {
            offsets,
            key_count: self.key_count,
            max_version: self.max_version,
            bloom_filter,
        }
        .encode();
        let sum = checksum(&index);
        let size = start as usize + index.len() + 4 + CHECKSUM_LEN + 4;
        debug!(
            blocks = self.blocks.len(),
            keys = self.key_count,
            max_version = self.max_version,
            size,
            "table built"
        );

        BuildData {
            blocks: self.blocks,
            index,
            checksum: sum,
            size,
        }
    }

    /// The complete table image; empty for an empty builder.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        let bd = self.done();
        let mut buf = vec![0u8; bd.size()];
        let written = bd.copy_to(&mut buf);
        debug_assert_eq!(written, buf.len());
        buf
    }
}
