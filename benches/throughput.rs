//! Throughput benchmarks for the store and the WAL.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use emberkv::persistence::{WalRecord, WalWriter};
use emberkv::storage::{unix_now, Store};
use std::sync::Arc;
use tempfile::TempDir;

/// SET throughput at a few value sizes.
fn bench_set(c: &mut Criterion) {
    let store = Store::new(64);

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            store.set(format!("key:{}", i), Bytes::from("small_value"), 0);
            i += 1;
        });
    });

    group.bench_function("set_1k", |b| {
        let mut i = 0u64;
        let value = Bytes::from("x".repeat(1024));
        b.iter(|| {
            store.set(format!("key:{}", i), value.clone(), 0);
            i += 1;
        });
    });

    group.bench_function("set_with_deadline", |b| {
        let mut i = 0u64;
        let deadline = unix_now() + 3600;
        b.iter(|| {
            store.set(format!("key:{}", i), Bytes::from("value"), deadline);
            i += 1;
        });
    });

    group.finish();
}

/// GET throughput against a populated store.
fn bench_get(c: &mut Criterion) {
    let store = Store::new(64);
    for i in 0..100_000 {
        store.set(format!("key:{}", i), Bytes::from(format!("value:{}", i)), 0);
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            black_box(store.get(&format!("key:{}", i % 100_000)));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            black_box(store.get(&format!("missing:{}", i)));
            i += 1;
        });
    });

    group.finish();
}

/// 80/20 read-write mix.
fn bench_mixed(c: &mut Criterion) {
    let store = Store::new(64);
    for i in 0..10_000 {
        store.set(format!("key:{}", i), Bytes::from("value"), 0);
    }

    let mut group = c.benchmark_group("mixed");
    group.throughput(Throughput::Elements(1));

    group.bench_function("80_read_20_write", |b| {
        let mut i = 0u64;
        b.iter(|| {
            if i % 5 == 0 {
                store.set(format!("new:{}", i), Bytes::from("value"), 0);
            } else {
                black_box(store.get(&format!("key:{}", i % 10_000)));
            }
            i += 1;
        });
    });

    group.finish();
}

/// Concurrent writers across shards.
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");

    group.bench_function("4_threads_set_get", |b| {
        b.iter(|| {
            let store = Arc::new(Store::new(64));
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let store = Arc::clone(&store);
                    thread::spawn(move || {
                        for i in 0..5_000 {
                            let key = format!("key:{}:{}", t, i);
                            store.set(key.clone(), Bytes::from("value"), 0);
                            store.get(&key);
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
            black_box(store.len());
        });
    });

    group.finish();
}

/// WAL append throughput (buffered, no per-record fsync).
fn bench_wal_append(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let wal = WalWriter::open(
        dir.path().join("wal.log"),
        dir.path().to_path_buf(),
        u64::MAX,
        5,
    )
    .unwrap();

    let mut group = c.benchmark_group("wal");
    group.throughput(Throughput::Elements(1));

    group.bench_function("append_set_record", |b| {
        let mut i = 0u64;
        b.iter(|| {
            wal.append(WalRecord::set(
                format!("key:{}", i),
                Bytes::from("value"),
                0,
            ))
            .unwrap();
            i += 1;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_set,
    bench_get,
    bench_mixed,
    bench_concurrent,
    bench_wal_append,
);

criterion_main!(benches);
