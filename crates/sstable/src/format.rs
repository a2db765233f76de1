//! Table binary format constants, checksum helpers and file naming.
//!
//! ## Table image
//!
//! ```text
//! [block]* [index] [index_len: u32] [checksum: u64] [checksum_len: u32 = 8]
//! ```
//!
//! ## Block
//!
//! ```text
//! [entry]* [entry_offset: u32]* [entry_count: u32] [checksum: u64] [checksum_len: u32 = 8]
//! entry = [overlap: u16][diff: u16][diff bytes][varint expires_at][value]
//! ```
//!
//! Checksums are CRC32C widened to `u64`; they cover every byte of the
//! block (or index) that precedes them. All fixed-width integers are
//! big-endian.

use crc::{Crc, CRC_32_ISCSI};
use std::path::{Path, PathBuf};

use crate::TableError;

static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Size of the stored checksum.
pub const CHECKSUM_LEN: usize = 8;

/// `[overlap: u16][diff: u16]`.
pub const ENTRY_HEADER_SIZE: usize = 4;

/// Bytes a sealed block appends after its entries, not counting the
/// per-entry offsets: count, checksum and checksum length.
pub const BLOCK_TRAILER_SIZE: usize = 4 + CHECKSUM_LEN + 4;

/// Bytes after the index: index length, checksum and checksum length.
pub const TABLE_FOOTER_SIZE: usize = 4 + CHECKSUM_LEN + 4;

/// Extension of table files.
pub const TABLE_FILE_EXT: &str = "sst";

#[must_use]
pub fn checksum(data: &[u8]) -> u64 {
    u64::from(CRC32.checksum(data))
}

/// Compares `data` against a stored checksum.
pub fn verify_checksum(data: &[u8], expected: u64) -> Result<(), TableError> {
    let actual = checksum(data);
    if actual != expected {
        return Err(TableError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

/// `00042.sst` for id 42.
#[must_use]
pub fn table_file_name(id: u64) -> String {
    format!("{:05}.{}", id, TABLE_FILE_EXT)
}

#[must_use]
pub fn table_file_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(table_file_name(id))
}

/// Parses the id back out of a table file name or path. Anything that is
/// not `<digits>.sst` yields 0.
#[must_use]
pub fn file_id(name: &str) -> u64 {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name);
    base.strip_suffix(".sst")
        .filter(|stem| !stem.is_empty() && stem.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|stem| stem.parse().ok())
        .unwrap_or(0)
}
