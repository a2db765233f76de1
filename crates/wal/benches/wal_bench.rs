use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use memtable::{key_with_ts, Entry};
use std::io::Cursor;
use tempfile::tempdir;
use wal::{wal_codec, WalReader, WalWriter};

const N_RECORDS: usize = 10_000;
const VALUE_SIZE: usize = 100;

fn entries() -> Vec<Entry> {
    (0..N_RECORDS)
        .map(|i| {
            Entry::new(
                key_with_ts(format!("key{}", i).as_bytes(), i as u64),
                vec![b'x'; VALUE_SIZE],
            )
        })
        .collect()
}

fn wal_append_benchmark(c: &mut Criterion) {
    let entries = entries();
    c.bench_function("wal_append_nosync_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let w = WalWriter::create(dir.path().join("wal.log"), false).unwrap();
                (dir, w)
            },
            |(_dir, mut w)| {
                for e in &entries {
                    w.append(e).unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn wal_replay_benchmark(c: &mut Criterion) {
    let mut log = Vec::new();
    let mut buf = Vec::new();
    for e in entries() {
        wal_codec(&mut buf, &e);
        log.extend_from_slice(&buf);
    }
    c.bench_function("wal_replay_10k", |b| {
        b.iter(|| {
            let mut r = WalReader::from_reader(Cursor::new(&log));
            let outcome = r.replay(|_| {}).unwrap();
            assert_eq!(outcome.records, N_RECORDS);
        });
    });
}

criterion_group!(benches, wal_append_benchmark, wal_replay_benchmark);
criterion_main!(benches);
