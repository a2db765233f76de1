/// Cold-start path: WAL replay, table discovery and tmp file cleanup.
use anyhow::{Context, Result};
use memtable::{parse_ts, Skiplist};
use sstable::{file_id, Table};
use std::path::Path;
use wal::{ReplayOutcome, WalReader};

use crate::{LoadedTable, Lsm};

/// Replays the WAL at `path` into `mem`, returning the highest version seen
/// and how far replay got.
///
/// A missing file is a fresh start. A bad or torn record ends replay without
/// an error; the outcome says where the good prefix ends.
pub fn replay_wal_into<P: AsRef<Path>>(path: P, mem: &Skiplist) -> Result<(u64, ReplayOutcome)> {
    let path = path.as_ref();
    let mut reader = match WalReader::open(path) {
        Ok(reader) => reader,
        Err(wal::WalError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok((0, ReplayOutcome::default()));
        }
        Err(e) => {
            return Err(anyhow::anyhow!(e).context(format!("opening {} for replay", path.display())))
        }
    };

    let mut max_version = 0u64;
    let outcome = reader
        .replay(|entry| {
            max_version = max_version.max(parse_ts(&entry.key));
            mem.add(&entry);
        })
        .with_context(|| format!("replaying {}", path.display()))?;
    Ok((max_version, outcome))
}

impl Lsm {
    /// Opens every `{:05}.sst` file in `dir`, newest id first. Other files,
    /// including names that parse to id 0, are ignored.
    pub(crate) fn load_tables(dir: &Path) -> Result<Vec<LoadedTable>> {
        let mut found: Vec<(u64, std::path::PathBuf)> = std::fs::read_dir(dir)
            .with_context(|| format!("listing {}", dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter_map(|p| {
                let id = file_id(p.to_str()?);
                (id > 0).then_some((id, p))
            })
            .collect();
        found.sort_by(|a, b| b.0.cmp(&a.0));

        found
            .into_iter()
            .map(|(id, path)| {
                let table = Table::open_file(&path)?;
                Ok(LoadedTable { id, table })
            })
            .collect()
    }

    /// Removes `.sst.tmp` files left by interrupted flushes.
    pub(crate) fn cleanup_tmp_files(dir: &Path) {
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let p = entry.path();
                if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
                    if name.ends_with(".sst.tmp") {
                        let _ = std::fs::remove_file(&p);
                    }
                }
            }
        }
    }
}
