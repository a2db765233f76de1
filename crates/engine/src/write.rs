/// Write path: `set()`, `set_with_ttl()`, `del()`, `force_flush()` and the
/// internal `flush()`.
///
/// Each write is appended to the WAL before the skiplist sees it. Once the
/// skiplist's arena reaches `memtable_size` it is drained into one or more
/// tables.
use anyhow::{Context, Result};
use memtable::{key_with_ts, same_key, Entry};
use sstable::{table_file_path, write_table_file, Table, TableBuilder};
use std::sync::Arc;
use tracing::info;

use crate::{LoadedTable, Lsm, MAX_KEY_SIZE, MAX_VALUE_SIZE};

impl Lsm {
    /// Stores `value` under `key` with no expiry.
    ///
    /// Empty values are rejected: an empty value is how deletions are stored.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.set_with_ttl(key, value, 0)
    }

    /// Stores `value` under `key` until the Unix timestamp `expires_at`
    /// (seconds). `0` means no expiry.
    pub fn set_with_ttl(&mut self, key: &[u8], value: &[u8], expires_at: u64) -> Result<()> {
        check_key(key)?;
        anyhow::ensure!(
            !value.is_empty(),
            "empty values are reserved for deletions"
        );
        anyhow::ensure!(
            value.len() <= MAX_VALUE_SIZE,
            "value too large: {} bytes (max {})",
            value.len(),
            MAX_VALUE_SIZE
        );
        let version = self.next_version()?;
        let entry = Entry::new(key_with_ts(key, version), value.to_vec()).with_ttl(expires_at);
        self.apply(&entry)
    }

    /// Deletes `key` by writing a tombstone that shadows older versions.
    pub fn del(&mut self, key: &[u8]) -> Result<()> {
        check_key(key)?;
        let version = self.next_version()?;
        self.apply(&Entry::tombstone(key_with_ts(key, version)))
    }

    /// Flushes the memtable now. A no-op when it is empty.
    pub fn force_flush(&mut self) -> Result<()> {
        if self.mem.is_empty() {
            return Ok(());
        }
        self.flush()
    }

    fn next_version(&mut self) -> Result<u64> {
        // u64::MAX is the read version that sees everything.
        self.version = self
            .version
            .checked_add(1)
            .filter(|&v| v < u64::MAX)
            .ok_or_else(|| anyhow::anyhow!("version counter exhausted"))?;
        Ok(self.version)
    }

    fn apply(&mut self, entry: &Entry) -> Result<()> {
        self.wal
            .append(entry)
            .with_context(|| format!("appending to {}", self.wal_path.display()))?;
        self.mem.add(entry);

        if self.mem.mem_size() as u64 >= self.opt.memtable_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Drains the memtable into tables, then truncates the WAL and starts a
    /// fresh memtable.
    ///
    /// # Steps
    ///
    /// 1. Feed entries in key order to a [`TableBuilder`]. When it reaches
    ///    capacity, seal it and start another, but never between two versions
    ///    of the same key.
    /// 2. Write each image to `{:05}.sst` (temp file + rename).
    /// 3. Truncate the WAL to zero bytes.
    /// 4. Swap in an empty skiplist and drop the old one's reference.
    pub(crate) fn flush(&mut self) -> Result<()> {
        let mut written = Vec::new();
        let mut entries = 0usize;
        let mut builder = TableBuilder::new(&self.opt);
        let mut last_key = Vec::new();
        for entry in self.mem.iter().entries() {
            if builder.reached_capacity() && !same_key(&last_key, &entry.key) {
                let full = std::mem::replace(&mut builder, TableBuilder::new(&self.opt));
                written.push(self.write_table(full)?);
            }
            builder.add_key(&entry);
            entries += 1;
            last_key = entry.key;
        }
        if !builder.is_empty() {
            written.push(self.write_table(builder)?);
        }

        let ids: Vec<u64> = written.iter().map(|t| t.id).collect();
        for t in written {
            self.tables.insert(0, t);
        }

        self.wal
            .truncate(0)
            .with_context(|| format!("truncating {}", self.wal_path.display()))?;
        let old = std::mem::replace(&mut self.mem, Arc::new(Self::new_memtable(&self.opt)));
        old.decr_ref();

        info!(entries, tables = ?ids, version = self.version, "memtable flushed");
        Ok(())
    }

    fn write_table(&mut self, builder: TableBuilder) -> Result<LoadedTable> {
        let id = self.next_file_id;
        let path = table_file_path(&self.opt.work_dir, id);
        let image = builder.finish();
        write_table_file(&path, &image)?;
        let table =
            Table::open(&image).with_context(|| format!("reopening {}", path.display()))?;
        self.next_file_id += 1;
        Ok(LoadedTable { id, table })
    }
}

fn check_key(key: &[u8]) -> Result<()> {
    anyhow::ensure!(!key.is_empty(), "key must not be empty");
    anyhow::ensure!(
        key.len() <= MAX_KEY_SIZE,
        "key too large: {} bytes (max {})",
        key.len(),
        MAX_KEY_SIZE
    );
    Ok(())
}
