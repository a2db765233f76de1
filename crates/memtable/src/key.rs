//! Versioned key helpers.
//!
//! Every stored key is `user_key ++ suffix`, where the suffix is 8 big-endian
//! bytes holding `u64::MAX - version`. Ordering compares the user key first
//! and the suffix second, both ascending, so for one user key the newest
//! version sorts first.

use std::cmp::Ordering;

/// Length of the version suffix.
pub const TS_SIZE: usize = 8;

/// Appends the version suffix for `ts` to `key`.
#[must_use]
pub fn key_with_ts(key: &[u8], ts: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + TS_SIZE);
    out.extend_from_slice(key);
    out.extend_from_slice(&(u64::MAX - ts).to_be_bytes());
    out
}

/// Extracts the version from a suffixed key. Keys too short to carry a
/// suffix report version 0.
#[must_use]
pub fn parse_ts(key: &[u8]) -> u64 {
    if key.len() <= TS_SIZE {
        return 0;
    }
    let mut suffix = [0u8; TS_SIZE];
    suffix.copy_from_slice(&key[key.len() - TS_SIZE..]);
    u64::MAX - u64::from_be_bytes(suffix)
}

/// Strips the version suffix.
#[must_use]
pub fn parse_key(key: &[u8]) -> &[u8] {
    if key.len() < TS_SIZE {
        return key;
    }
    &key[..key.len() - TS_SIZE]
}

/// Whether two suffixed keys share the same user key.
#[must_use]
pub fn same_key(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    parse_key(a) == parse_key(b)
}

/// Total order over suffixed keys.
///
/// # Panics
///
/// Panics if either key is 8 bytes or shorter; such a key cannot carry a
/// version suffix and reaching this point means a caller broke the contract.
#[must_use]
pub fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    assert!(
        a.len() > TS_SIZE && b.len() > TS_SIZE,
        "keys must be longer than {} bytes: {:?}, {:?}",
        TS_SIZE,
        a,
        b
    );
    let (ak, ats) = a.split_at(a.len() - TS_SIZE);
    let (bk, bts) = b.split_at(b.len() - TS_SIZE);
    ak.cmp(bk).then_with(|| ats.cmp(bts))
}
