mod table_tests;

use config::Options;
use memtable::{key_with_ts, Entry};

use crate::TableBuilder;

pub(crate) fn k(user: &str, ts: u64) -> Vec<u8> {
    key_with_ts(user.as_bytes(), ts)
}

pub(crate) fn small_blocks() -> Options {
    Options {
        block_size: 128,
        ..Options::default()
    }
}

/// `key0000`..`key{n-1}` at version 1, valued `value-{i}`.
pub(crate) fn sequential_entries(n: usize) -> Vec<Entry> {
    (0..n)
        .map(|i| {
            Entry::new(
                k(&format!("key{:04}", i), 1),
                format!("value-{}", i).into_bytes(),
            )
        })
        .collect()
}

pub(crate) fn build(opt: &Options, entries: &[Entry]) -> Vec<u8> {
    let mut b = TableBuilder::new(opt);
    for e in entries {
        b.add_key(e);
    }
    b.finish()
}
