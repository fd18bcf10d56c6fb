//! Store operation benchmarks.
//!
//! ```bash
//! cargo bench --bench store
//! cargo bench --bench store -- "get"
//! ```
//!
//! The overwrite benchmark uses a fixed-size value on purpose: same-size
//! updates take the in-place path and keep the data block from growing, so
//! the loop can run indefinitely without tripping out-of-space.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tempfile::tempdir;
use turconf::{Geometry, Manager};

const KEY_COUNT: usize = 1_000;

fn populated_store() -> (tempfile::TempDir, Manager) {
    let dir = tempdir().unwrap();
    let manager = Manager::builder()
        .geometry(Geometry::new(64 * 1024, 4 * 1024 * 1024).unwrap())
        .open_manager(dir.path().join("bench.conf"))
        .unwrap();

    for i in 0..KEY_COUNT {
        manager
            .set(&format!("bench-key-{}", i), format!("value-{:08}", i).as_bytes())
            .unwrap();
    }
    (dir, manager)
}

fn bench_get(c: &mut Criterion) {
    let (_dir, manager) = populated_store();

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));
    group.bench_function("hit", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let key = format!("bench-key-{}", i % KEY_COUNT);
            i += 1;
            black_box(manager.get(&key).unwrap())
        })
    });
    group.finish();
}

fn bench_set(c: &mut Criterion) {
    let (_dir, manager) = populated_store();

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));
    group.bench_function("overwrite_same_size", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let key = format!("bench-key-{}", i % KEY_COUNT);
            let value = format!("value-{:08}", i);
            i += 1;
            manager.set(black_box(&key), black_box(value.as_bytes())).unwrap()
        })
    });
    group.finish();
}

fn bench_map(c: &mut Criterion) {
    let (_dir, manager) = populated_store();

    let mut group = c.benchmark_group("map");
    group.throughput(Throughput::Elements(KEY_COUNT as u64));
    group.bench_function("snapshot", |b| {
        b.iter(|| black_box(manager.map().unwrap()))
    });
    group.finish();
}

criterion_group!(benches, bench_get, bench_set, bench_map);
criterion_main!(benches);
