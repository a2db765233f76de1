//! # WAL - Write-Ahead Log
//!
//! Every write is framed into a checksummed record and appended to the log
//! **before** the skiplist sees it. On restart the log is replayed to rebuild
//! the memtable.
//!
//! ## Record Format
//!
//! ```text
//! [varint key_len][varint value_len][varint expires_at][key][value][crc32c: u32 BE]
//! ```
//!
//! Keys carry their version suffix, so a record needs no separate sequence
//! number. An empty value is a deletion.
//!
//! ## Example
//!
//! ```rust,no_run
//! use memtable::{key_with_ts, Entry};
//! use wal::{WalReader, WalWriter};
//!
//! let mut w = WalWriter::create("wal.log", true).unwrap();
//! w.append(&Entry::new(key_with_ts(b"hello", 1), b"world".to_vec())).unwrap();
//! drop(w);
//!
//! let mut r = WalReader::open("wal.log").unwrap();
//! let outcome = r.replay(|entry| println!("{:?}", entry)).unwrap();
//! assert!(!outcome.stopped_early);
//! ```

mod codec;
mod hash_reader;

pub use codec::{
    decode_record, estimate_wal_codec_size, wal_codec, WalHeader, MAX_FIELD_SIZE, MAX_HEADER_SIZE,
};
pub use hash_reader::{HashReader, CRC32};

use memtable::Entry;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;

use thiserror::Error;
use tracing::warn;

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The stored checksum does not match the record bytes.
    #[error("checksum mismatch: stored {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// A header field could not be decoded or is out of range.
    #[error("corrupt record: {0}")]
    Corrupt(&'static str),

    /// A key or value is longer than replay would accept.
    #[error("{field} of {len} bytes exceeds the {max} byte record limit")]
    FieldTooLarge {
        field: &'static str,
        len: usize,
        max: u32,
    },
}

/// Append-only WAL writer.
///
/// Records are encoded into a reusable buffer and written with a single
/// `write_all`. When `sync` is `true`, every append is followed by
/// `sync_all()`.
pub struct WalWriter {
    file: File,
    sync: bool,
    size: u64,
    /// Reusable scratch buffer to avoid allocation on every append.
    buf: Vec<u8>,
}

impl WalWriter {
    /// Opens (or creates) a WAL file in append mode.
    pub fn create<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file,
            sync,
            size,
            buf: Vec::with_capacity(256),
        })
    }

    /// Encodes `entry` and appends it. Returns the record length.
    ///
    /// Entries whose key or value exceeds [`MAX_FIELD_SIZE`] are refused
    /// before anything reaches the file.
    pub fn append(&mut self, entry: &Entry) -> Result<usize, WalError> {
        check_field("key", entry.key.len())?;
        check_field("value", entry.value.len())?;

        self.buf.reserve(estimate_wal_codec_size(entry));
        let n = wal_codec(&mut self.buf, entry);

        self.file.write_all(&self.buf)?;
        self.file.flush()?;
        if self.sync {
            self.file.sync_all()?;
        }
        self.size += n as u64;
        Ok(n)
    }

    /// Forces written records to disk.
    pub fn sync_to_disk(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Cuts the log to `len` bytes. Later appends land after the cut.
    pub fn truncate(&mut self, len: u64) -> Result<(), WalError> {
        self.file.set_len(len)?;
        self.file.sync_all()?;
        self.size = len;
        Ok(())
    }

    /// Current log length in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }
}

fn check_field(field: &'static str, len: usize) -> Result<(), WalError> {
    if len > MAX_FIELD_SIZE as usize {
        return Err(WalError::FieldTooLarge {
            field,
            len,
            max: MAX_FIELD_SIZE,
        });
    }
    Ok(())
}

/// What a replay got through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// Records handed to the callback.
    pub records: usize,
    /// Byte offset just past the last good record.
    pub valid_offset: u64,
    /// Whether replay hit a bad or truncated record before the end of input.
    pub stopped_early: bool,
}

/// Sequential WAL reader.
///
/// Generic over any `Read` implementor, so tests can replay in-memory buffers.
pub struct WalReader<R: Read> {
    rdr: BufReader<R>,
}

impl WalReader<File> {
    /// Opens an existing WAL file for sequential replay.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<WalReader<File>, WalError> {
        let f = File::open(path)?;
        Ok(WalReader {
            rdr: BufReader::new(f),
        })
    }
}

impl<R: Read> WalReader<R> {
    pub fn from_reader(reader: R) -> Self {
        WalReader {
            rdr: BufReader::new(reader),
        }
    }

    /// Replays records in order, calling `apply` for each one.
    ///
    /// Replay stops at the first record that is truncated or fails its
    /// checksum; everything before it has already been applied and the
    /// returned [`ReplayOutcome::valid_offset`] marks where it ends. Only
    /// I/O errors other than a short read are returned as `Err`.
    pub fn replay<F>(&mut self, mut apply: F) -> Result<ReplayOutcome, WalError>
    where
        F: FnMut(Entry),
    {
        let mut outcome = ReplayOutcome::default();
        loop {
            if self.rdr.fill_buf()?.is_empty() {
                return Ok(outcome);
            }
            match codec::read_record(&mut self.rdr) {
                Ok((entry, len)) => {
                    apply(entry);
                    outcome.records += 1;
                    outcome.valid_offset += len as u64;
                }
                Err(WalError::Io(e)) if e.kind() != io::ErrorKind::UnexpectedEof => {
                    return Err(WalError::Io(e));
                }
                Err(err) => {
                    warn!(
                        offset = outcome.valid_offset,
                        records = outcome.records,
                        error = %err,
                        "wal replay stopped at bad record"
                    );
                    outcome.stopped_early = true;
                    return Ok(outcome);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
