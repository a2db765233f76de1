//! In-memory write buffer: a concurrent, arena-backed skiplist keyed by
//! versioned keys.
//!
//! ```text
//! Skiplist ── find_near / add / search
//!    │
//!    └── Arena ── node towers, keys, encoded values (u32 offsets)
//! ```
//!
//! Keys carry an 8-byte version suffix (see [`key_with_ts`]); for one user
//! key, newer versions sort first. A value is a [`ValueStruct`]; an empty
//! value is a tombstone.

mod arena;
mod entry;
mod iterator;
mod key;
mod skiplist;
mod varint;

pub use arena::{decode_value, encode_value, Arena, Node, MAX_HEIGHT, MAX_NODE_SIZE};
pub use entry::{Entry, ValueStruct};
pub use iterator::{Entries, SkiplistIterator};
pub use key::{compare_keys, key_with_ts, parse_key, parse_ts, same_key, TS_SIZE};
pub use skiplist::{Skiplist, SkiplistGuard};
pub use varint::{decode_uvarint, put_uvarint, read_uvarint, uvarint_len, MAX_VARINT_LEN64};
