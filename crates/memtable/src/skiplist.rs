//! Concurrent skiplist over an [`Arena`].
//!
//! Inserts are lock-free: a writer computes its splice (predecessor and
//! successor at every level), builds the node completely, and then links it
//! level by level with compare-and-swap. A lost race re-derives the splice for
//! that level from the remembered predecessor and retries. Nodes are never
//! unlinked, so a remembered predecessor always stays a valid starting point.
//!
//! Level 0 is linked first. It is the commit point for a key: a concurrent
//! insert of the same key discovers the winner there and turns into a value
//! update instead of a second node.

use parking_lot::Mutex;
use rand::Rng;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::arena::{encode_value, Arena, ArenaView, Node, MAX_HEIGHT};
use crate::entry::{Entry, ValueStruct};
use crate::iterator::SkiplistIterator;
use crate::key::{compare_keys, same_key, TS_SIZE};

/// Probability threshold for growing a tower by one more level (~1/3).
const HEIGHT_INCREASE: u32 = u32::MAX / 3;

type CloseCallback = Box<dyn FnOnce() + Send>;

/// Arena-backed sorted map from versioned keys to [`ValueStruct`]s.
///
/// Share it through an [`Arc`]. The explicit reference count
/// ([`incr_ref`](Self::incr_ref) / [`decr_ref`](Self::decr_ref)) decides when
/// the arena memory is released and the close callback fires; it starts at 1
/// for the creator.
pub struct Skiplist {
    height: AtomicUsize,
    head_offset: u32,
    refs: AtomicI32,
    arena: Arena,
    on_close: Mutex<Option<CloseCallback>>,
}

impl Skiplist {
    /// Creates an empty list whose arena starts at `arena_size` bytes and
    /// grows on demand.
    pub fn new(arena_size: usize) -> Self {
        Self::with_arena(Arena::growable(arena_size))
    }

    /// Creates an empty list over `arena`.
    pub fn with_arena(arena: Arena) -> Self {
        let head_offset = arena.put_node(MAX_HEIGHT);
        let empty = ValueStruct::default();
        let value = encode_value(arena.put_val(&empty), empty.encoded_size());
        if let Some(head) = arena.get_node(head_offset) {
            head.init(&arena.view(), 0, 0, MAX_HEIGHT, value);
        }
        Self {
            height: AtomicUsize::new(1),
            head_offset,
            refs: AtomicI32::new(1),
            arena,
            on_close: Mutex::new(None),
        }
    }

    /// Registers a callback fired once when the last reference is dropped.
    pub fn set_on_close<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.on_close.lock() = Some(Box::new(f));
    }

    pub fn incr_ref(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops one reference. The last one releases the arena and fires the
    /// close callback.
    pub fn decr_ref(&self) {
        let remaining = self.refs.fetch_sub(1, Ordering::AcqRel) - 1;
        assert!(remaining >= 0, "skiplist reference count went negative");
        if remaining > 0 {
            return;
        }
        if let Some(f) = self.on_close.lock().take() {
            f();
        }
        self.arena.release();
    }

    /// Current reference count.
    #[must_use]
    pub fn refs(&self) -> i32 {
        self.refs.load(Ordering::Acquire)
    }

    /// Takes a reference for as long as the returned guard lives.
    pub fn pin(self: &Arc<Self>) -> SkiplistGuard {
        self.incr_ref();
        SkiplistGuard {
            list: Arc::clone(self),
        }
    }

    /// Arena bytes in use; the memtable size estimate.
    #[must_use]
    pub fn mem_size(&self) -> usize {
        self.arena.size()
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    fn height(&self) -> usize {
        self.height.load(Ordering::Acquire)
    }

    fn head(&self) -> Node {
        Node::at(self.head_offset).unwrap_or_else(|| unreachable!("head node sits at offset 0"))
    }

    fn random_height() -> usize {
        let mut rng = rand::thread_rng();
        let mut h = 1;
        while h < MAX_HEIGHT && rng.gen::<u32>() <= HEIGHT_INCREASE {
            h += 1;
        }
        h
    }

    fn next(view: &ArenaView<'_>, node: Node, level: usize) -> Option<Node> {
        Node::at(node.next_offset(view, level))
    }

    /// Finds the node near `key`.
    ///
    /// With `less`, the rightmost node with key `< key` (`<=` with
    /// `allow_equal`). Without `less`, the leftmost node with key `> key`
    /// (`>=` with `allow_equal`). The flag is true when the returned node's
    /// key equals `key`. The head is never returned.
    pub(crate) fn find_near(
        &self,
        view: &ArenaView<'_>,
        key: &[u8],
        less: bool,
        allow_equal: bool,
    ) -> (Option<Node>, bool) {
        let head = self.head();
        let mut x = head;
        let mut level = self.height() - 1;
        loop {
            // Invariant: x.key < key.
            let Some(next) = Self::next(view, x, level) else {
                if level > 0 {
                    level -= 1;
                    continue;
                }
                if !less || x == head {
                    return (None, false);
                }
                return (Some(x), false);
            };

            match compare_keys(key, &next.key(view)) {
                CmpOrdering::Greater => {
                    x = next;
                }
                CmpOrdering::Equal => {
                    if allow_equal {
                        return (Some(next), true);
                    }
                    if !less {
                        return (Self::next(view, next, 0), false);
                    }
                    if level > 0 {
                        level -= 1;
                        continue;
                    }
                    if x == head {
                        return (None, false);
                    }
                    return (Some(x), false);
                }
                CmpOrdering::Less => {
                    if level > 0 {
                        level -= 1;
                        continue;
                    }
                    if !less {
                        return (Some(next), false);
                    }
                    if x == head {
                        return (None, false);
                    }
                    return (Some(x), false);
                }
            }
        }
    }

    /// Walks `level` from `before` and returns `(prev, next)` such that
    /// `prev.key < key < next.key`. Both are the matching node when `key`
    /// is already present.
    fn find_splice_for_level(
        view: &ArenaView<'_>,
        key: &[u8],
        mut before: u32,
        level: usize,
    ) -> (u32, u32) {
        loop {
            let before_node =
                Node::at(before).unwrap_or_else(|| panic!("splice walk reached nil at level {}", level));
            let next = before_node.next_offset(view, level);
            let Some(next_node) = Node::at(next) else {
                return (before, next);
            };
            match compare_keys(key, &next_node.key(view)) {
                CmpOrdering::Equal => return (next, next),
                CmpOrdering::Less => return (before, next),
                CmpOrdering::Greater => before = next,
            }
        }
    }

    /// Inserts `entry`, or replaces the value if the exact key (including
    /// version) is already present.
    ///
    /// # Panics
    ///
    /// Panics if the key is too short to carry a version suffix.
    pub fn add(&self, entry: &Entry) {
        let key = entry.key.as_slice();
        assert!(
            key.len() > TS_SIZE,
            "skiplist keys must carry an {}-byte version suffix",
            TS_SIZE
        );

        let vs = entry.value_struct();
        let value = encode_value(self.arena.put_val(&vs), vs.encoded_size());

        let list_height = self.height();
        let mut prev = [0u32; MAX_HEIGHT + 1];
        let mut next = [0u32; MAX_HEIGHT + 1];
        prev[list_height] = self.head_offset;

        {
            let view = self.arena.view();
            for i in (0..list_height).rev() {
                let (p, n) = Self::find_splice_for_level(&view, key, prev[i + 1], i);
                prev[i] = p;
                next[i] = n;
                if p == n {
                    if let Some(existing) = Node::at(p) {
                        existing.set_value(&view, value);
                    }
                    return;
                }
            }
        }

        let height = Self::random_height();
        let node_offset = self.arena.put_node(height);
        let key_offset = self.arena.put_key(key);

        let view = self.arena.view();
        let Some(node) = Node::at(node_offset) else {
            unreachable!("arena handed out the nil offset");
        };
        node.init(&view, key_offset, key.len(), height, value);
        debug_assert_eq!(node.height(&view), height);

        let mut list_height = self.height();
        while height > list_height {
            match self.height.compare_exchange(
                list_height,
                height,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => list_height = current,
            }
        }

        for i in 0..height {
            loop {
                if prev[i] == 0 {
                    // Level was above the list height when the splice was taken.
                    assert!(i > 0, "base level splice is always computed");
                    let (p, n) = Self::find_splice_for_level(&view, key, self.head_offset, i);
                    assert_ne!(p, n, "equal keys can only meet on the base level");
                    prev[i] = p;
                    next[i] = n;
                }
                node.set_next(&view, i, next[i]);
                let Some(prev_node) = Node::at(prev[i]) else {
                    unreachable!("splice predecessor is never nil");
                };
                if prev_node.cas_next(&view, i, next[i], node_offset) {
                    break;
                }

                // Lost the race: somebody linked a node after prev[i].
                let (p, n) = Self::find_splice_for_level(&view, key, prev[i], i);
                prev[i] = p;
                next[i] = n;
                if p == n {
                    assert_eq!(i, 0, "equal keys can only meet on the base level");
                    if let Some(existing) = Node::at(p) {
                        existing.set_value(&view, value);
                    }
                    return;
                }
            }
        }
    }

    /// Looks up `key`: the first entry at or after it that shares its user
    /// key. With the descending version suffix this is the newest version not
    /// newer than the one encoded in `key`.
    ///
    /// Tombstones are reported as `None`, same as absence.
    pub fn search(&self, key: &[u8]) -> Option<ValueStruct> {
        self.lookup(key).filter(|vs| !vs.is_tombstone())
    }

    /// Like [`search`](Self::search) but hands back tombstones (empty value),
    /// so a reader layering several sources can stop at a deletion.
    pub fn lookup(&self, key: &[u8]) -> Option<ValueStruct> {
        let view = self.arena.view();
        let (node, _) = self.find_near(&view, key, false, true);
        let node = node?;
        if !same_key(key, &node.key(&view)) {
            return None;
        }
        Some(node.value_struct(&view))
    }

    /// The last node in the list, `None` when empty.
    pub(crate) fn find_last(&self, view: &ArenaView<'_>) -> Option<Node> {
        let head = self.head();
        let mut n = head;
        let mut level = self.height() - 1;
        loop {
            if let Some(next) = Self::next(view, n, level) {
                n = next;
                continue;
            }
            if level == 0 {
                return (n != head).then_some(n);
            }
            level -= 1;
        }
    }

    pub(crate) fn first(&self, view: &ArenaView<'_>) -> Option<Node> {
        Self::next(view, self.head(), 0)
    }

    pub(crate) fn next_node(&self, view: &ArenaView<'_>, node: Node) -> Option<Node> {
        Self::next(view, node, 0)
    }

    pub(crate) fn view(&self) -> ArenaView<'_> {
        self.arena.view()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.find_last(&self.arena.view()).is_none()
    }

    /// Positioned cursor over the list. Holds a reference while alive.
    pub fn iter(self: &Arc<Self>) -> SkiplistIterator {
        SkiplistIterator::new(self.pin())
    }
}

impl std::fmt::Debug for Skiplist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Skiplist")
            .field("height", &self.height())
            .field("refs", &self.refs())
            .field("arena", &self.arena)
            .finish()
    }
}

/// A counted reference to a [`Skiplist`]; released on drop.
pub struct SkiplistGuard {
    list: Arc<Skiplist>,
}

impl std::ops::Deref for SkiplistGuard {
    type Target = Skiplist;

    fn deref(&self) -> &Skiplist {
        &self.list
    }
}

impl Drop for SkiplistGuard {
    fn drop(&mut self) {
        self.list.decr_ref();
    }
}
