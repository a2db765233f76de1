use super::*;
use memtable::{key_with_ts, parse_key, parse_ts};
use std::fs;
use std::io::Cursor;
use tempfile::tempdir;

// -------------------- Helpers --------------------

fn make_put(ts: u64, key: &[u8], value: &[u8]) -> Entry {
    Entry::new(key_with_ts(key, ts), value.to_vec())
}

fn make_del(ts: u64, key: &[u8]) -> Entry {
    Entry::tombstone(key_with_ts(key, ts))
}

fn replay_all(path: &std::path::Path) -> Result<(Vec<Entry>, ReplayOutcome), WalError> {
    let mut reader = WalReader::open(path)?;
    let mut recs = Vec::new();
    let outcome = reader.replay(|r| recs.push(r))?;
    Ok((recs, outcome))
}

fn replay_from_bytes(data: &[u8]) -> Result<(Vec<Entry>, ReplayOutcome), WalError> {
    let cursor = Cursor::new(data.to_vec());
    let mut reader = WalReader::from_reader(cursor);
    let mut recs = Vec::new();
    let outcome = reader.replay(|r| recs.push(r))?;
    Ok((recs, outcome))
}

fn encode(entry: &Entry) -> Vec<u8> {
    let mut buf = Vec::new();
    wal_codec(&mut buf, entry);
    buf
}

// -------------------- Codec --------------------

#[test]
fn header_fits_declared_bound() {
    let widest = WalHeader {
        key_len: u32::MAX,
        value_len: u32::MAX,
        expires_at: u64::MAX,
    };
    let mut buf = Vec::new();
    assert_eq!(widest.encode(&mut buf), MAX_HEADER_SIZE);

    let header = WalHeader {
        key_len: 17,
        value_len: 4096,
        expires_at: 1_700_000_000,
    };
    buf.clear();
    let n = header.encode(&mut buf);
    assert_eq!(n, header.encoded_len());
    assert_eq!(WalHeader::decode(&mut buf.as_slice()).unwrap(), header);
}

#[test]
fn codec_layout_is_header_key_value_crc() {
    let entry = make_put(1, b"k", b"val").with_ttl(300);
    let buf = encode(&entry);

    let key_len = entry.key.len();
    // key_len, value_len and 300 (two varint bytes).
    assert_eq!(&buf[..4], &[key_len as u8, 3, 0xac, 0x02]);
    assert_eq!(&buf[4..4 + key_len], entry.key.as_slice());
    assert_eq!(&buf[4 + key_len..4 + key_len + 3], b"val");

    let body_len = buf.len() - 4;
    let stored = u32::from_be_bytes(buf[body_len..].try_into().unwrap());
    assert_eq!(stored, CRC32.checksum(&buf[..body_len]));
}

#[test]
fn codec_reuses_and_resets_buffer() {
    let mut buf = Vec::new();
    let long = wal_codec(&mut buf, &make_put(1, b"a-long-key", b"a-long-value"));
    let short = wal_codec(&mut buf, &make_put(1, b"k", b""));
    assert!(short < long);
    assert_eq!(buf.len(), short);
    assert_eq!(decode_record(&mut buf.as_slice()).unwrap(), make_put(1, b"k", b""));
}

#[test]
fn estimate_is_an_upper_bound() {
    for entry in [
        make_put(1, b"k", b""),
        make_put(9, b"key", &[7u8; 300]).with_ttl(u64::MAX),
        make_del(u64::MAX, b"gone"),
    ] {
        assert!(estimate_wal_codec_size(&entry) >= encode(&entry).len());
    }
}

#[test]
fn decode_record_round_trips_expiration() {
    let entry = make_put(5, b"ttl", b"v").with_ttl(1_700_000_000);
    let decoded = decode_record(&mut encode(&entry).as_slice()).unwrap();
    assert_eq!(decoded, entry);
    assert_eq!(parse_ts(&decoded.key), 5);
}

#[test]
fn every_single_byte_flip_is_detected() {
    let entry = make_put(3, b"key", b"value").with_ttl(42);
    let good = encode(&entry);
    for i in 0..good.len() {
        let mut bad = good.clone();
        bad[i] ^= 0x01;
        let res = decode_record(&mut bad.as_slice());
        assert!(
            !matches!(res, Ok(ref e) if *e == entry),
            "flip at byte {} went unnoticed",
            i
        );
    }
}

#[test]
fn body_flip_reports_both_checksums() {
    let entry = make_put(1, b"k", b"v");
    let mut bad = encode(&entry);
    let last_value_byte = bad.len() - 5;
    bad[last_value_byte] ^= 0xff;
    match decode_record(&mut bad.as_slice()) {
        Err(WalError::ChecksumMismatch { expected, actual }) => assert_ne!(expected, actual),
        other => panic!("expected checksum mismatch, got {:?}", other),
    }
}

#[test]
fn hash_reader_counts_and_hashes() {
    let data = b"hello wal".to_vec();
    let mut hr = HashReader::new(data.as_slice());
    let mut out = Vec::new();
    hr.read_to_end(&mut out).unwrap();
    assert_eq!(hr.bytes_read(), data.len());
    assert_eq!(hr.sum32(), CRC32.checksum(&data));
}

#[test]
fn hash_reader_skips_direct_reads() {
    let data = [1u8, 2, 3, 4];
    let mut hr = HashReader::new(&data[..]);
    let mut first = [0u8; 2];
    hr.read_exact(&mut first).unwrap();
    let mut rest = [0u8; 2];
    hr.inner_mut().read_exact(&mut rest).unwrap();
    assert_eq!(hr.bytes_read(), 2);
    assert_eq!(hr.sum32(), CRC32.checksum(&data[..2]));
}

// -------------------- Basic write & replay --------------------

#[test]
fn write_and_replay_put_and_del() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    {
        let mut w = WalWriter::create(&path, true).unwrap();
        w.append(&make_put(1, b"k", b"v1")).unwrap();
        w.append(&make_put(2, b"k2", b"v2")).unwrap();
        w.append(&make_del(3, b"k")).unwrap();
    }

    let (recs, outcome) = replay_all(&path).unwrap();
    assert_eq!(
        recs,
        vec![
            make_put(1, b"k", b"v1"),
            make_put(2, b"k2", b"v2"),
            make_del(3, b"k"),
        ]
    );
    assert!(recs[2].is_tombstone());
    assert_eq!(outcome.records, 3);
    assert!(!outcome.stopped_early);
    assert_eq!(outcome.valid_offset, fs::metadata(&path).unwrap().len());
}

#[test]
fn writer_tracks_size() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    let mut w = WalWriter::create(&path, false).unwrap();
    assert_eq!(w.size(), 0);
    let n = w.append(&make_put(1, b"k", b"v")).unwrap();
    assert_eq!(w.size(), n as u64);
    drop(w);

    let w = WalWriter::create(&path, false).unwrap();
    assert_eq!(w.size(), n as u64);
}

// -------------------- Truncated tail tolerance --------------------

#[test]
fn truncated_tail_after_valid_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    {
        let mut w = WalWriter::create(&path, true).unwrap();
        w.append(&make_put(1, b"k1", b"v1")).unwrap();
        w.append(&make_put(2, b"k2", b"v2")).unwrap();
    }
    let good_len = fs::metadata(&path).unwrap().len();

    // Half of a third record.
    let partial = encode(&make_put(3, b"k3", b"v3"));
    let mut data = fs::read(&path).unwrap();
    data.extend_from_slice(&partial[..partial.len() / 2]);
    fs::write(&path, &data).unwrap();

    let (recs, outcome) = replay_all(&path).unwrap();
    assert_eq!(recs, vec![make_put(1, b"k1", b"v1"), make_put(2, b"k2", b"v2")]);
    assert!(outcome.stopped_early);
    assert_eq!(outcome.valid_offset, good_len);
}

#[test]
fn truncated_checksum_stops_replay() {
    let mut data = encode(&make_put(1, b"k", b"v"));
    data.pop();
    let (recs, outcome) = replay_from_bytes(&data).unwrap();
    assert!(recs.is_empty());
    assert!(outcome.stopped_early);
    assert_eq!(outcome.valid_offset, 0);
}

#[test]
fn truncate_then_append_continues_log() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    let mut data = encode(&make_put(1, b"a", b"1"));
    let good_len = data.len() as u64;
    data.extend_from_slice(&[0xff, 0xff]);
    fs::write(&path, &data).unwrap();

    let (_, outcome) = replay_all(&path).unwrap();
    assert_eq!(outcome.valid_offset, good_len);

    let mut w = WalWriter::create(&path, true).unwrap();
    w.truncate(outcome.valid_offset).unwrap();
    w.append(&make_put(2, b"b", b"2")).unwrap();
    drop(w);

    let (recs, outcome) = replay_all(&path).unwrap();
    assert_eq!(recs, vec![make_put(1, b"a", b"1"), make_put(2, b"b", b"2")]);
    assert!(!outcome.stopped_early);
}

// -------------------- Empty WAL --------------------

#[test]
fn replay_empty_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");
    fs::write(&path, b"").unwrap();

    let (recs, outcome) = replay_all(&path).unwrap();
    assert!(recs.is_empty());
    assert_eq!(outcome, ReplayOutcome::default());
}

#[test]
fn replay_empty_in_memory() {
    let (recs, _) = replay_from_bytes(b"").unwrap();
    assert!(recs.is_empty());
}

// -------------------- File Not Found --------------------

#[test]
fn open_non_existent_file_return_error() {
    let dir = tempdir().unwrap();
    let result = WalReader::open(dir.path().join("missing.log"));
    assert!(matches!(result, Err(WalError::Io(_))));
}

#[test]
fn sync_to_disk_does_not_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    let mut w = WalWriter::create(&path, false).unwrap();
    w.append(&make_put(1, b"k", b"v")).unwrap();
    w.sync_to_disk().unwrap();
}

// -------------------- Corruption detection --------------------

#[test]
fn corruption_mid_log_keeps_prefix() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    {
        let mut w = WalWriter::create(&path, true).unwrap();
        w.append(&make_put(1, b"a", b"1")).unwrap();
        w.append(&make_put(2, b"b", b"2")).unwrap();
        w.append(&make_put(3, b"c", b"3")).unwrap();
    }
    let first_len = encode(&make_put(1, b"a", b"1")).len();

    // Flip the value byte of the second record.
    let mut data = fs::read(&path).unwrap();
    let second_len = encode(&make_put(2, b"b", b"2")).len();
    data[first_len + second_len - 5] ^= 0xff;
    fs::write(&path, &data).unwrap();

    let (recs, outcome) = replay_all(&path).unwrap();
    assert_eq!(recs, vec![make_put(1, b"a", b"1")]);
    assert!(outcome.stopped_early);
    assert_eq!(outcome.valid_offset, first_len as u64);
}

#[test]
fn oversized_length_is_corruption() {
    let mut data = Vec::new();
    memtable::put_uvarint(&mut data, MAX_FIELD_SIZE as u64 + 1);
    data.extend_from_slice(&[0, 0, 0, 0, 0]);
    assert!(matches!(
        decode_record(&mut data.as_slice()),
        Err(WalError::Corrupt(_))
    ));

    let (recs, outcome) = replay_from_bytes(&data).unwrap();
    assert!(recs.is_empty());
    assert!(outcome.stopped_early);
}

#[test]
fn writer_refuses_fields_replay_would_reject() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    let mut w = WalWriter::create(&path, false).unwrap();
    w.append(&make_put(1, b"before", b"v")).unwrap();
    let size = w.size();

    let huge = vec![0u8; MAX_FIELD_SIZE as usize + 1];
    let err = w.append(&make_put(2, b"big", &huge)).unwrap_err();
    assert!(matches!(
        err,
        WalError::FieldTooLarge { field: "value", .. }
    ));
    let err = w.append(&Entry::new(huge, b"v".to_vec())).unwrap_err();
    assert!(matches!(err, WalError::FieldTooLarge { field: "key", .. }));
    assert_eq!(w.size(), size);
    assert_eq!(fs::metadata(&path).unwrap().len(), size);

    w.append(&make_put(3, b"after", b"v")).unwrap();
    drop(w);

    let (recs, outcome) = replay_all(&path).unwrap();
    assert_eq!(recs.len(), 2);
    assert!(!outcome.stopped_early);
    assert_eq!(parse_key(&recs[1].key), b"after");
}

#[test]
fn malformed_varint_is_corruption() {
    let data = [0xffu8; 16];
    assert!(matches!(
        decode_record(&mut &data[..]),
        Err(WalError::Corrupt(_))
    ));
}

// -------------------- Edge tests --------------------

#[test]
fn large_value_record() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");
    let big_val = vec![b'x'; 1_000_000];

    {
        let mut w = WalWriter::create(&path, false).unwrap();
        w.append(&make_put(1, b"big", &big_val)).unwrap();
    }

    let (recs, _) = replay_all(&path).unwrap();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].value.len(), 1_000_000);
}

#[test]
fn append_to_existing_wal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    {
        let mut w = WalWriter::create(&path, true).unwrap();
        w.append(&make_put(1, b"a", b"1")).unwrap();
    }
    {
        let mut w = WalWriter::create(&path, true).unwrap();
        w.append(&make_put(2, b"b", b"2")).unwrap();
    }

    let (recs, _) = replay_all(&path).unwrap();
    assert_eq!(recs, vec![make_put(1, b"a", b"1"), make_put(2, b"b", b"2")]);
}

#[test]
fn version_zero_and_max() {
    let (recs, _) = {
        let mut data = encode(&make_put(0, b"min", b"v"));
        data.extend(encode(&make_put(u64::MAX, b"max", b"v")));
        replay_from_bytes(&data).unwrap()
    };
    assert_eq!(parse_ts(&recs[0].key), 0);
    assert_eq!(parse_ts(&recs[1].key), u64::MAX);
}

#[test]
fn binary_key_and_value() {
    let key = [0x00u8, 0xFF, 0x80];
    let val = [0xDEu8, 0xAD, 0xBE, 0xEF];
    let (recs, _) = replay_from_bytes(&encode(&make_put(1, &key, &val))).unwrap();
    assert_eq!(parse_key(&recs[0].key), key);
    assert_eq!(recs[0].value, val);
}

// -------------------- Stress tests --------------------

#[test]
fn many_records_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    let n = 5_000u64;
    {
        let mut w = WalWriter::create(&path, false).unwrap();
        for i in 0..n {
            let key = format!("key{}", i);
            let val = format!("val{}", i);
            w.append(&make_put(i, key.as_bytes(), val.as_bytes())).unwrap();
        }
        w.sync_to_disk().unwrap();
    }

    let (recs, outcome) = replay_all(&path).unwrap();
    assert_eq!(outcome.records, n as usize);
    for (i, rec) in recs.iter().enumerate() {
        let expected = make_put(
            i as u64,
            format!("key{}", i).as_bytes(),
            format!("val{}", i).as_bytes(),
        );
        assert_eq!(rec, &expected);
    }
}

#[test]
fn interleaved_puts_and_dels() {
    let mut data = Vec::new();
    for i in 0u64..1000 {
        let key = format!("k{}", i);
        if i % 3 == 0 {
            data.extend(encode(&make_del(i, key.as_bytes())));
        } else {
            data.extend(encode(&make_put(i, key.as_bytes(), b"v")));
        }
    }

    let (recs, _) = replay_from_bytes(&data).unwrap();
    assert_eq!(recs.len(), 1000);
    // 0,3,6,...,999 -> ceil(1000/3) = 334
    assert_eq!(recs.iter().filter(|r| r.is_tombstone()).count(), 334);
}
