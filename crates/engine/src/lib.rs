//! # Engine - thin LSM glue
//!
//! Wires the [`memtable`], [`wal`] and [`sstable`] crates into one write and
//! read path so every component is exercised end to end.
//!
//! ```text
//! set / del ──> WAL append ──> Skiplist add
//!                                  │
//!                    (mem_size >= memtable_size?)
//!                                  │ yes
//!                                  v
//!                 flush() ──> TableBuilder ──> 00001.sst, 00002.sst, ...
//!                                  │
//!                           WAL truncated, fresh Skiplist
//!
//! get ──> Skiplist ──> tables, newest file id first (first hit wins)
//! ```
//!
//! | Module       | Purpose                                              |
//! |--------------|------------------------------------------------------|
//! | `lib.rs`     | [`Lsm`] struct, [`Lsm::open`], accessors, `Debug`, `Drop` |
//! | `recovery`   | WAL replay, table discovery, tmp file cleanup        |
//! | `write`      | `set()`, `set_with_ttl()`, `del()`, `flush()`        |
//! | `read`       | `get()`, `scan()`                                    |
//!
//! There is no manifest and no leveling: table files are found by their
//! `{:05}.sst` names and a higher id is always newer.
//!
//! ## Crash safety
//!
//! Every write reaches the WAL before the skiplist. Tables are written to a
//! temp file, fsynced and renamed; the WAL is truncated only after every
//! table of a flush is in place. A torn WAL tail is cut off on the next open.
mod read;
mod recovery;
mod write;

use anyhow::{Context, Result};
use config::Options;
use memtable::{Skiplist, TS_SIZE};
use sstable::Table;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use wal::WalWriter;

pub use recovery::replay_wal_into;

/// Name of the log file inside `work_dir`.
pub const WAL_FILE_NAME: &str = "wal.log";

/// Largest user key; the block entry header stores key lengths in a `u16`
/// and the version suffix takes 8 of those bytes.
pub const MAX_KEY_SIZE: usize = u16::MAX as usize - TS_SIZE;
/// Largest value (10 MiB).
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

/// A sealed table together with the id its file name carries.
pub(crate) struct LoadedTable {
    pub(crate) id: u64,
    pub(crate) table: Table,
}

/// Single-writer LSM store over one working directory.
///
/// # Write path
///
/// 1. Bump the version counter.
/// 2. Append the versioned entry to the WAL.
/// 3. Add it to the skiplist.
/// 4. Once the skiplist's arena holds `memtable_size` bytes, flush it.
///
/// # Read path
///
/// The skiplist first, then tables from the newest file id down. The first
/// source holding the key decides; a tombstone or an expired entry there
/// means the key is absent.
pub struct Lsm {
    pub(crate) opt: Options,
    pub(crate) mem: Arc<Skiplist>,
    /// Newest first.
    pub(crate) tables: Vec<LoadedTable>,
    pub(crate) wal: WalWriter,
    pub(crate) wal_path: PathBuf,
    pub(crate) wal_sync: bool,
    /// Highest version handed out so far.
    pub(crate) version: u64,
    pub(crate) next_file_id: u64,
}

impl std::fmt::Debug for Lsm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lsm")
            .field("work_dir", &self.opt.work_dir)
            .field("version", &self.version)
            .field("mem_size", &self.mem.mem_size())
            .field("memtable_size", &self.opt.memtable_size)
            .field("table_count", &self.tables.len())
            .field("next_file_id", &self.next_file_id)
            .field("wal_size", &self.wal.size())
            .field("wal_sync", &self.wal_sync)
            .finish()
    }
}

impl Lsm {
    /// Opens the store in `opt.work_dir`, creating the directory if needed,
    /// and recovers whatever an earlier process left there.
    ///
    /// # Recovery steps
    ///
    /// 1. Remove leftover `.sst.tmp` files from interrupted flushes.
    /// 2. Load every `{:05}.sst` table, newest id first.
    /// 3. Replay the WAL into a fresh skiplist, cutting the log back to its
    ///    last good record if replay stopped early.
    /// 4. Resume versions after the highest one seen in the WAL or any table.
    pub fn open(opt: Options, wal_sync: bool) -> Result<Self> {
        opt.validate().context("invalid options")?;
        let work_dir = opt.work_dir.clone();
        std::fs::create_dir_all(&work_dir)
            .with_context(|| format!("creating {}", work_dir.display()))?;

        Self::cleanup_tmp_files(&work_dir);
        let tables = Self::load_tables(&work_dir)?;
        let table_version = tables
            .iter()
            .map(|t| t.table.max_version())
            .max()
            .unwrap_or(0);
        let next_file_id = tables.first().map_or(1, |t| t.id + 1);

        // Replay before opening the writer.
        let wal_path = work_dir.join(WAL_FILE_NAME);
        let mem = Arc::new(Self::new_memtable(&opt));
        let (wal_version, outcome) = replay_wal_into(&wal_path, &mem)?;

        let mut wal = WalWriter::create(&wal_path, wal_sync)
            .with_context(|| format!("opening {}", wal_path.display()))?;
        if outcome.stopped_early {
            wal.truncate(outcome.valid_offset)
                .context("cutting the WAL back to its last good record")?;
        }

        let version = wal_version.max(table_version);
        info!(
            dir = %work_dir.display(),
            tables = tables.len(),
            wal_records = outcome.records,
            version,
            "store opened"
        );

        Ok(Self {
            opt,
            mem,
            tables,
            wal,
            wal_path,
            wal_sync,
            version,
            next_file_id,
        })
    }

    pub(crate) fn new_memtable(opt: &Options) -> Skiplist {
        Skiplist::new(opt.memtable_size as usize)
    }

    /// Highest version handed out so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn options(&self) -> &Options {
        &self.opt
    }

    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.opt.work_dir
    }

    #[must_use]
    pub fn wal_path(&self) -> &Path {
        &self.wal_path
    }

    /// Current WAL length in bytes.
    #[must_use]
    pub fn wal_size(&self) -> u64 {
        self.wal.size()
    }

    /// Arena bytes used by the live memtable.
    #[must_use]
    pub fn mem_size(&self) -> usize {
        self.mem.mem_size()
    }

    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Ids of the loaded tables, newest first.
    #[must_use]
    pub fn table_ids(&self) -> Vec<u64> {
        self.tables.iter().map(|t| t.id).collect()
    }
}

/// Best-effort flush on drop.
///
/// Errors are ignored: the data is still in the WAL and comes back on the
/// next open.
impl Drop for Lsm {
    fn drop(&mut self) {
        if !self.mem.is_empty() {
            let _ = self.flush();
        }
    }
}

#[cfg(test)]
mod tests;
