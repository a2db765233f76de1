//! # SSTable - Sorted String Table
//!
//! Immutable table images built from sorted, versioned entries.
//!
//! A [`TableBuilder`] packs entries into prefix-compressed blocks of about
//! `block_size` bytes, each sealed with its entry offsets and a CRC32C
//! checksum, then appends an index holding every block's base key and
//! offset, the key count, the highest version seen and an optional bloom
//! filter over logical keys. [`Table`] decodes such an image back and
//! serves point lookups and ordered iteration.
//!
//! See [`format`] for the byte layout.
//!
//! ```no_run
//! use config::Options;
//! use memtable::{key_with_ts, Entry};
//! use sstable::{Table, TableBuilder};
//!
//! let mut b = TableBuilder::new(&Options::default());
//! b.add_key(&Entry::new(key_with_ts(b"apple", 1), b"red".to_vec()));
//! let image = b.finish();
//!
//! let table = Table::open(&image).unwrap();
//! let v = table.get(&key_with_ts(b"apple", u64::MAX)).unwrap();
//! assert_eq!(v.value, b"red");
//! ```

mod block;
mod builder;
mod error;
pub mod format;
mod index;
mod table;
mod writer;

pub use block::{Block, BlockIterator};
pub use builder::{BuildData, TableBuilder};
pub use error::TableError;
pub use format::{checksum, file_id, table_file_name, table_file_path, verify_checksum};
pub use index::{BlockOffset, TableIndex};
pub use table::{Table, TableIterator};
pub use writer::write_table_file;

#[cfg(test)]
mod tests;
