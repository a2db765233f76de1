//! Offset-addressed bump allocator backing one memtable generation.
//!
//! The buffer is a vector of 64-bit atomic words. Every allocation is rounded
//! up to a whole number of words, so no two allocations share a word and every
//! node starts word-aligned. Byte payloads (keys, values) are packed
//! little-endian into their words; node fields are encoded one field per word
//! (see [`Node`]).
//!
//! Offset `0` is never handed out and stands for nil.
//!
//! ## Growth
//!
//! Allocation is a lock-free `fetch_add` on the cursor. When the cursor runs
//! past the buffer, a growable arena copies its words into a larger vector
//! under the write half of a [`RwLock`]; every read and write of arena memory
//! goes through the read half ([`ArenaView`]). Readers copy bytes out instead
//! of borrowing them, so a growth never leaves a stale view behind. The one
//! rule callers must keep: never allocate while holding an [`ArenaView`] on
//! the same thread.

use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::entry::ValueStruct;

/// Maximum tower height of a skiplist node.
pub const MAX_HEIGHT: usize = 20;

const WORD: usize = std::mem::size_of::<u64>();

/// Value word + packed key/height word.
const NODE_HEADER_WORDS: usize = 2;

/// Bytes taken by a node of height [`MAX_HEIGHT`].
pub const MAX_NODE_SIZE: usize = (NODE_HEADER_WORDS + MAX_HEIGHT) * WORD;

/// Smallest buffer: the nil word, a full-height head node and the head's
/// value word.
const MIN_CAPACITY: usize = WORD + MAX_NODE_SIZE + WORD;

/// Largest single growth step (1 GiB).
const MAX_GROW_STEP: usize = 1 << 30;

fn align_up(n: usize) -> usize {
    (n + WORD - 1) & !(WORD - 1)
}

/// Bump allocator addressed by `u32` byte offsets.
pub struct Arena {
    /// Next free byte. Starts at one word so offset 0 stays reserved.
    cursor: AtomicU64,
    should_grow: bool,
    words: RwLock<Vec<AtomicU64>>,
}

impl Arena {
    /// Creates a fixed-capacity arena. Exhausting it is fatal.
    pub fn new(capacity: usize) -> Self {
        Self::with_growth(capacity, false)
    }

    /// Creates an arena that grows when `capacity` is exhausted.
    pub fn growable(capacity: usize) -> Self {
        Self::with_growth(capacity, true)
    }

    fn with_growth(capacity: usize, should_grow: bool) -> Self {
        let words = align_up(capacity.max(MIN_CAPACITY)) / WORD;
        Self {
            cursor: AtomicU64::new(WORD as u64),
            should_grow,
            words: RwLock::new((0..words).map(|_| AtomicU64::new(0)).collect()),
        }
    }

    /// Bytes handed out so far, including the reserved nil word.
    #[must_use]
    pub fn size(&self) -> usize {
        self.cursor.load(Ordering::Acquire) as usize
    }

    /// Current buffer size in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.words.read().len() * WORD
    }

    /// Reserves `size` bytes (rounded up to a word) and returns their offset.
    ///
    /// # Panics
    ///
    /// Panics if the reservation runs past the 32-bit offset space, or past
    /// the buffer of a fixed-capacity arena.
    pub fn allocate(&self, size: usize) -> u32 {
        let aligned = align_up(size.max(1)) as u64;
        let end = self.cursor.fetch_add(aligned, Ordering::AcqRel) + aligned;
        assert!(
            end <= u32::MAX as u64,
            "arena offset overflow: allocation ends at byte {}",
            end
        );
        let end = end as usize;
        if end > self.capacity() {
            assert!(
                self.should_grow,
                "arena exhausted: need {} bytes, capacity {}",
                end,
                self.capacity()
            );
            self.grow(end, aligned as usize);
        }
        (end - aligned as usize) as u32
    }

    fn grow(&self, needed: usize, request: usize) {
        let mut words = self.words.write();
        let cap = words.len() * WORD;
        if needed <= cap {
            // Another allocator grew the buffer first.
            return;
        }
        let grow_by = cap.min(MAX_GROW_STEP).max(request);
        let new_cap = align_up((cap + grow_by).max(needed));
        words.resize_with(new_cap / WORD, || AtomicU64::new(0));
        debug!(from = cap, to = new_cap, "arena grown");
    }

    /// Allocates a node with `height` tower slots and returns its offset.
    pub fn put_node(&self, height: usize) -> u32 {
        assert!(
            (1..=MAX_HEIGHT).contains(&height),
            "node height {} out of range",
            height
        );
        self.allocate((NODE_HEADER_WORDS + height) * WORD)
    }

    /// Copies `key` into the arena and returns its offset.
    pub fn put_key(&self, key: &[u8]) -> u32 {
        let offset = self.allocate(key.len());
        self.view().write_bytes(offset, key);
        offset
    }

    /// Encodes `v` into the arena and returns its offset. The encoded length
    /// is `v.encoded_size()`.
    pub fn put_val(&self, v: &ValueStruct) -> u32 {
        let mut buf = Vec::with_capacity(v.encoded_size() as usize);
        v.encode_value(&mut buf);
        let offset = self.allocate(buf.len());
        self.view().write_bytes(offset, &buf);
        offset
    }

    pub fn get_key(&self, offset: u32, size: u16) -> Vec<u8> {
        self.view().read_bytes(offset, size as usize)
    }

    pub fn get_val(&self, offset: u32, size: u32) -> ValueStruct {
        self.view().get_val(offset, size)
    }

    /// Returns the node at `offset`, or `None` for the nil offset.
    #[must_use]
    pub fn get_node(&self, offset: u32) -> Option<Node> {
        Node::at(offset)
    }

    /// Inverse of [`get_node`](Self::get_node).
    #[must_use]
    pub fn get_node_offset(node: Option<Node>) -> u32 {
        node.map_or(0, |n| n.offset)
    }

    /// Locks out growth for the lifetime of the returned view.
    pub(crate) fn view(&self) -> ArenaView<'_> {
        ArenaView {
            words: self.words.read(),
        }
    }

    /// Drops the buffer. Any later access is a use-after-close and panics.
    pub(crate) fn release(&self) {
        let mut words = self.words.write();
        *words = Vec::new();
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .field("should_grow", &self.should_grow)
            .finish()
    }
}

/// Read access to arena memory. Holds off growth while alive.
pub(crate) struct ArenaView<'a> {
    words: RwLockReadGuard<'a, Vec<AtomicU64>>,
}

impl ArenaView<'_> {
    fn word(&self, offset: u32, index: usize) -> &AtomicU64 {
        &self.words[offset as usize / WORD + index]
    }

    fn write_bytes(&self, offset: u32, bytes: &[u8]) {
        for (i, chunk) in bytes.chunks(WORD).enumerate() {
            let mut w = [0u8; WORD];
            w[..chunk.len()].copy_from_slice(chunk);
            self.word(offset, i)
                .store(u64::from_le_bytes(w), Ordering::Relaxed);
        }
    }

    pub(crate) fn read_bytes(&self, offset: u32, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(align_up(len));
        for i in 0..align_up(len) / WORD {
            let w = self.word(offset, i).load(Ordering::Relaxed);
            out.extend_from_slice(&w.to_le_bytes());
        }
        out.truncate(len);
        out
    }

    pub(crate) fn get_val(&self, offset: u32, size: u32) -> ValueStruct {
        let buf = self.read_bytes(offset, size as usize);
        ValueStruct::decode_value(&buf)
            .unwrap_or_else(|| panic!("corrupt value encoding at arena offset {}", offset))
    }
}

/// Packs a value location into the single word a node publishes atomically.
#[must_use]
pub fn encode_value(val_offset: u32, val_size: u32) -> u64 {
    (val_size as u64) << 32 | val_offset as u64
}

/// Inverse of [`encode_value`]: `(offset, size)`.
#[must_use]
pub fn decode_value(word: u64) -> (u32, u32) {
    (word as u32, (word >> 32) as u32)
}

/// Handle to a skiplist node living in an [`Arena`].
///
/// Word layout, relative to the node offset:
///
/// ```text
/// 0            value word: val_size(u32) << 32 | val_offset(u32)
/// 1            key_offset(u32) | key_size(u16) << 32 | height(u16) << 48
/// 2..2+height  tower: next-node offset for each level (low 32 bits)
/// ```
///
/// Word 1 is written once before the node is published and never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    offset: u32,
}

impl Node {
    pub(crate) fn at(offset: u32) -> Option<Self> {
        (offset != 0).then_some(Self { offset })
    }

    #[must_use]
    pub fn offset(self) -> u32 {
        self.offset
    }

    pub(crate) fn init(self, view: &ArenaView<'_>, key_offset: u32, key_size: usize, height: usize, value: u64) {
        assert!(
            key_size <= u16::MAX as usize,
            "key of {} bytes exceeds u16 length field",
            key_size
        );
        let meta = key_offset as u64 | (key_size as u64) << 32 | (height as u64) << 48;
        view.word(self.offset, 1).store(meta, Ordering::Relaxed);
        view.word(self.offset, 0).store(value, Ordering::Release);
    }

    fn meta(self, view: &ArenaView<'_>) -> (u32, u16, u16) {
        let meta = view.word(self.offset, 1).load(Ordering::Relaxed);
        (meta as u32, (meta >> 32) as u16, (meta >> 48) as u16)
    }

    pub(crate) fn height(self, view: &ArenaView<'_>) -> usize {
        self.meta(view).2 as usize
    }

    pub(crate) fn key(self, view: &ArenaView<'_>) -> Vec<u8> {
        let (offset, size, _) = self.meta(view);
        view.read_bytes(offset, size as usize)
    }

    pub(crate) fn value(self, view: &ArenaView<'_>) -> u64 {
        view.word(self.offset, 0).load(Ordering::Acquire)
    }

    pub(crate) fn set_value(self, view: &ArenaView<'_>, value: u64) {
        view.word(self.offset, 0).store(value, Ordering::Release);
    }

    pub(crate) fn value_struct(self, view: &ArenaView<'_>) -> ValueStruct {
        let (offset, size) = decode_value(self.value(view));
        view.get_val(offset, size)
    }

    fn tower<'v>(self, view: &'v ArenaView<'_>, level: usize) -> &'v AtomicU64 {
        debug_assert!(level < MAX_HEIGHT);
        view.word(self.offset, NODE_HEADER_WORDS + level)
    }

    pub(crate) fn next_offset(self, view: &ArenaView<'_>, level: usize) -> u32 {
        self.tower(view, level).load(Ordering::Acquire) as u32
    }

    pub(crate) fn set_next(self, view: &ArenaView<'_>, level: usize, next: u32) {
        self.tower(view, level).store(next as u64, Ordering::Release);
    }

    /// Points `level` at `new` if it still points at `old`.
    pub(crate) fn cas_next(self, view: &ArenaView<'_>, level: usize, old: u32, new: u32) -> bool {
        self.tower(view, level)
            .compare_exchange(old as u64, new as u64, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
