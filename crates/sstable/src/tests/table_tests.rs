use super::*;
use crate::{write_table_file, Table, TableError};
use anyhow::Result;
use tempfile::tempdir;

// -------------------- Open & get --------------------

#[test]
fn get_finds_every_key_across_blocks() {
    let entries = sequential_entries(300);
    let table = Table::open(&build(&small_blocks(), &entries)).unwrap();
    assert!(table.block_count() > 1);

    for (i, e) in entries.iter().enumerate() {
        let lookup = k(&format!("key{:04}", i), u64::MAX);
        let v = table.get(&lookup).expect("key must exist");
        assert_eq!(v.value, e.value);
    }
    assert!(table.get(&k("key9999", u64::MAX)).is_none());
    assert!(table.get(&k("aaa", u64::MAX)).is_none());
    assert!(table.get(&k("key0100x", u64::MAX)).is_none());
}

#[test]
fn get_respects_read_version() {
    let entries = vec![
        Entry::new(k("doc", 30), b"v30".to_vec()),
        Entry::new(k("doc", 20), b"v20".to_vec()),
        Entry::new(k("doc", 10), b"v10".to_vec()),
    ];
    let table = Table::open(&build(&Options::default(), &entries)).unwrap();

    assert_eq!(table.get(&k("doc", u64::MAX)).unwrap().value, b"v30");
    assert_eq!(table.get(&k("doc", 25)).unwrap().value, b"v20");
    assert_eq!(table.get(&k("doc", 10)).unwrap().value, b"v10");
    assert!(table.get(&k("doc", 5)).is_none());
    assert_eq!(table.max_version(), 30);
}

#[test]
fn get_returns_tombstones() {
    let entries = vec![
        Entry::tombstone(k("gone", 2)),
        Entry::new(k("gone", 1), b"old".to_vec()),
    ];
    let table = Table::open(&build(&Options::default(), &entries)).unwrap();
    assert!(table.get(&k("gone", u64::MAX)).unwrap().is_tombstone());
    assert_eq!(table.get(&k("gone", 1)).unwrap().value, b"old");
}

#[test]
fn empty_image_opens_as_empty_table() {
    let table = Table::open(&[]).unwrap();
    assert!(table.is_empty());
    assert_eq!(table.key_count(), 0);
    assert!(table.get(&k("any", 1)).is_none());

    let mut it = table.iter();
    it.seek_to_first();
    assert!(!it.valid());
    it.seek(&k("any", 1));
    assert!(!it.valid());
    it.seek_to_last();
    assert!(!it.valid());
}

// -------------------- Corruption --------------------

#[test]
fn corrupted_block_is_rejected_at_open() {
    let mut image = build(&small_blocks(), &sequential_entries(50));
    image[5] ^= 0xff;
    assert!(matches!(
        Table::open(&image),
        Err(TableError::ChecksumMismatch { .. })
    ));
}

#[test]
fn corrupted_index_is_rejected_at_open() {
    let mut image = build(&small_blocks(), &sequential_entries(50));
    let n = image.len();
    // Last byte of the index, just before the footer.
    image[n - 17] ^= 0x01;
    assert!(matches!(
        Table::open(&image),
        Err(TableError::ChecksumMismatch { .. })
    ));
}

#[test]
fn truncated_images_are_rejected() {
    let image = build(&Options::default(), &sequential_entries(10));
    assert!(Table::open(&image[..image.len() - 1]).is_err());
    assert!(Table::open(&image[1..]).is_err());
    assert!(matches!(
        Table::open(&image[..3]),
        Err(TableError::Corrupt(_))
    ));
}

#[test]
fn index_decode_rejects_damaged_bytes() {
    let index = crate::TableIndex {
        offsets: vec![crate::BlockOffset {
            key: k("base", 1),
            offset: 0,
            len: 64,
        }],
        key_count: 3,
        max_version: 9,
        bloom_filter: vec![1, 2, 3],
    };
    let bytes = index.encode();
    assert_eq!(crate::TableIndex::decode(&bytes).unwrap(), index);

    assert!(crate::TableIndex::decode(&bytes[..bytes.len() - 1]).is_err());

    let mut trailing = bytes.clone();
    trailing.push(0);
    assert_eq!(
        crate::TableIndex::decode(&trailing),
        Err(TableError::Corrupt("trailing bytes after index"))
    );

    // A block count no buffer this small could hold.
    let mut huge = bytes;
    huge[..4].copy_from_slice(&u32::MAX.to_be_bytes());
    assert!(crate::TableIndex::decode(&huge).is_err());
}

// -------------------- Iteration --------------------

#[test]
fn iterator_yields_entries_in_order_both_ways() {
    let entries = sequential_entries(120);
    let table = Table::open(&build(&small_blocks(), &entries)).unwrap();

    let forward: Vec<Entry> = table.iter().entries().collect();
    assert_eq!(forward, entries);

    let mut it = table.iter();
    it.seek_to_last();
    let mut backward = Vec::new();
    while it.valid() {
        backward.push(it.key().to_vec());
        it.prev();
    }
    backward.reverse();
    let keys: Vec<Vec<u8>> = entries.iter().map(|e| e.key.clone()).collect();
    assert_eq!(backward, keys);
}

#[test]
fn seek_falls_through_block_boundaries() {
    let entries = sequential_entries(120);
    let table = Table::open(&build(&small_blocks(), &entries)).unwrap();
    let mut it = table.iter();

    // "key00NNx" sits between key00NN and its successor, which is sometimes
    // the first key of the next block.
    for i in 0..119 {
        it.seek(&k(&format!("key{:04}x", i), 1));
        assert!(it.valid(), "seek after key{:04}", i);
        assert_eq!(it.key(), entries[i + 1].key.as_slice());
    }

    it.seek(&k("key0119x", 1));
    assert!(!it.valid());

    it.seek(&k("a", 1));
    assert_eq!(it.key(), entries[0].key.as_slice());
}

#[test]
fn next_and_prev_cross_blocks() {
    let entries = sequential_entries(60);
    let table = Table::open(&build(&small_blocks(), &entries)).unwrap();
    let first_of_second = table.index().offsets[1].key.clone();
    let pos = entries.iter().position(|e| e.key == first_of_second).unwrap();

    let mut it = table.iter();
    it.seek(&first_of_second);
    it.prev();
    assert_eq!(it.key(), entries[pos - 1].key.as_slice());
    it.next();
    assert_eq!(it.key(), first_of_second.as_slice());

    it.seek_to_first();
    it.prev();
    assert!(!it.valid());
}

// -------------------- Files --------------------

#[test]
fn write_and_open_table_file() -> Result<()> {
    let dir = tempdir()?;
    let path = crate::table_file_path(dir.path(), 1);
    let entries = sequential_entries(40);
    write_table_file(&path, &build(&Options::default(), &entries))?;

    assert!(path.exists());
    assert!(!path.with_extension("sst.tmp").exists());

    let table = Table::open_file(&path)?;
    assert_eq!(table.key_count(), 40);
    assert_eq!(table.get(&k("key0031", 1)).unwrap().value, b"value-31");
    Ok(())
}

#[test]
fn write_table_file_refuses_empty_image() -> Result<()> {
    let dir = tempdir()?;
    let path = crate::table_file_path(dir.path(), 2);
    assert!(write_table_file(&path, &[]).is_err());
    assert!(!path.exists());
    Ok(())
}

#[test]
fn open_file_reports_the_path() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("00009.sst");
    std::fs::write(&path, b"definitely not a table")?;
    let err = Table::open_file(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("00009.sst"));
    Ok(())
}
