use crate::arena::Node;
use crate::entry::{Entry, ValueStruct};
use crate::skiplist::SkiplistGuard;

/// Bidirectional cursor over a [`Skiplist`](crate::Skiplist).
///
/// Starts unpositioned; call one of the seek methods first. The cursor keeps
/// the list referenced until it is dropped.
pub struct SkiplistIterator {
    list: SkiplistGuard,
    node: Option<Node>,
}

impl SkiplistIterator {
    pub(crate) fn new(list: SkiplistGuard) -> Self {
        Self { list, node: None }
    }

    #[must_use]
    pub fn valid(&self) -> bool {
        self.node.is_some()
    }

    /// Key at the cursor.
    ///
    /// # Panics
    ///
    /// Panics if the cursor is not [`valid`](Self::valid).
    pub fn key(&self) -> Vec<u8> {
        let node = self.current();
        node.key(&self.list.view())
    }

    /// Value at the cursor.
    ///
    /// # Panics
    ///
    /// Panics if the cursor is not [`valid`](Self::valid).
    pub fn value(&self) -> ValueStruct {
        let node = self.current();
        node.value_struct(&self.list.view())
    }

    pub fn entry(&self) -> Entry {
        let node = self.current();
        let view = self.list.view();
        let vs = node.value_struct(&view);
        Entry {
            key: node.key(&view),
            value: vs.value,
            expires_at: vs.expires_at,
        }
    }

    fn current(&self) -> Node {
        self.node
            .unwrap_or_else(|| panic!("skiplist iterator used while not positioned"))
    }

    pub fn next(&mut self) {
        let node = self.current();
        self.node = self.list.next_node(&self.list.view(), node);
    }

    pub fn prev(&mut self) {
        let key = self.key();
        let (node, _) = self.list.find_near(&self.list.view(), &key, true, false);
        self.node = node;
    }

    /// Positions at the first entry with key `>= target`.
    pub fn seek(&mut self, target: &[u8]) {
        let (node, _) = self.list.find_near(&self.list.view(), target, false, true);
        self.node = node;
    }

    /// Positions at the last entry with key `<= target`.
    pub fn seek_for_prev(&mut self, target: &[u8]) {
        let (node, _) = self.list.find_near(&self.list.view(), target, true, true);
        self.node = node;
    }

    pub fn seek_to_first(&mut self) {
        self.node = self.list.first(&self.list.view());
    }

    pub fn seek_to_last(&mut self) {
        self.node = self.list.find_last(&self.list.view());
    }

    /// Consumes the cursor into an in-order iterator over all entries.
    pub fn entries(mut self) -> Entries {
        self.seek_to_first();
        Entries { inner: self }
    }
}

/// Forward iterator over every entry of a skiplist, in key order.
pub struct Entries {
    inner: SkiplistIterator,
}

impl Iterator for Entries {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        if !self.inner.valid() {
            return None;
        }
        let entry = self.inner.entry();
        self.inner.next();
        Some(entry)
    }
}
