use config::Options;
use std::fs;
use std::path::Path;

use crate::Lsm;

/// Options rooted at `dir` with the given flush threshold.
pub fn opts(dir: &Path, memtable_size: u64) -> Options {
    Options {
        work_dir: dir.to_path_buf(),
        memtable_size,
        ..Options::default()
    }
}

/// Flushes after every write.
pub fn flush_every_write(dir: &Path) -> Options {
    opts(dir, 1)
}

/// Large enough that tests never hit the threshold.
pub fn no_auto_flush(dir: &Path) -> Options {
    opts(dir, 1 << 20)
}

/// Drops the store without running its flush-on-drop, leaving the WAL as a
/// crashed process would.
pub fn crash(lsm: Lsm) {
    std::mem::forget(lsm);
}

pub fn count_sst_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == "sst")
                .unwrap_or(false)
        })
        .count()
}
