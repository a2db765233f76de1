/// Read path: `get()` and `scan()`.
///
/// Point lookups ask the memtable first, then the tables from the newest file
/// id down; the first source holding the key wins. Scans merge every source
/// and keep the highest version of each key.
use memtable::{key_with_ts, parse_key, parse_ts, ValueStruct};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::Lsm;

impl Lsm {
    /// The current value of `key`, or `None` when it was never written, was
    /// deleted or has expired.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        if key.is_empty() {
            return None;
        }
        let lookup = key_with_ts(key, u64::MAX);
        let found = self
            .mem
            .lookup(&lookup)
            .or_else(|| self.tables.iter().find_map(|t| t.table.get(&lookup)))?;
        live(found, now_unix())
    }

    /// Live `(key, value)` pairs with `start <= key < end`, in key order. An
    /// empty `end` means no upper bound.
    #[must_use]
    pub fn scan(&self, start: &[u8], end: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut merged: BTreeMap<Vec<u8>, (u64, ValueStruct)> = BTreeMap::new();
        let in_range = |user_key: &[u8]| end.is_empty() || user_key < end;

        let mut it = self.mem.iter();
        if start.is_empty() {
            it.seek_to_first();
        } else {
            it.seek(&key_with_ts(start, u64::MAX));
        }
        while it.valid() {
            let key = it.key();
            if !in_range(parse_key(&key)) {
                break;
            }
            keep_newest(&mut merged, &key, it.value());
            it.next();
        }

        for t in &self.tables {
            let mut it = t.table.iter();
            if start.is_empty() {
                it.seek_to_first();
            } else {
                it.seek(&key_with_ts(start, u64::MAX));
            }
            while it.valid() {
                if !in_range(parse_key(it.key())) {
                    break;
                }
                keep_newest(&mut merged, it.key(), it.value().clone());
                it.next();
            }
        }

        let now = now_unix();
        merged
            .into_iter()
            .filter_map(|(key, (_, vs))| live(vs, now).map(|v| (key, v)))
            .collect()
    }
}

fn keep_newest(merged: &mut BTreeMap<Vec<u8>, (u64, ValueStruct)>, key: &[u8], vs: ValueStruct) {
    let version = parse_ts(key);
    let user_key = parse_key(key);
    match merged.get(user_key) {
        Some((seen, _)) if *seen >= version => {}
        _ => {
            merged.insert(user_key.to_vec(), (version, vs));
        }
    }
}

/// The value bytes, unless `vs` is a tombstone or expired at `now`.
fn live(vs: ValueStruct, now: u64) -> Option<Vec<u8>> {
    if vs.is_tombstone() || (vs.expires_at != 0 && vs.expires_at <= now) {
        return None;
    }
    Some(vs.value)
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
