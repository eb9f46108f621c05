//! Micro-benchmarks for the hot engine paths.
//!
//! Run with `cargo bench --bench micro`.

use criterion::{Criterion, criterion_group, criterion_main};
use tempfile::TempDir;

use concordkv::{Cache, Engine, EvictionPolicy, StoreConfig, WriteBatch};

fn async_wal_config() -> StoreConfig {
    let mut config = StoreConfig::default();
    // Per-append fsync would benchmark the disk, not the engine.
    config.wal.sync_on_append = false;
    config.wal.incremental_interval_ms = 1000;
    config
}

fn bench_put(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), async_wal_config()).unwrap();

    let mut i = 0u64;
    c.bench_function("engine_put_64b", |b| {
        b.iter(|| {
            i += 1;
            engine
                .put(format!("bench-key-{i:012}").into_bytes(), vec![0x42; 64])
                .unwrap();
        })
    });
    engine.close().unwrap();
}

fn bench_get_memtable(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), async_wal_config()).unwrap();
    for i in 0..10_000u64 {
        engine
            .put(format!("bench-key-{i:012}").into_bytes(), vec![0x42; 64])
            .unwrap();
    }

    let mut i = 0u64;
    c.bench_function("engine_get_resident", |b| {
        b.iter(|| {
            i = (i + 7) % 10_000;
            engine
                .get(format!("bench-key-{i:012}").as_bytes())
                .unwrap()
                .unwrap();
        })
    });
    engine.close().unwrap();
}

fn bench_batch_submit(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), async_wal_config()).unwrap();

    let mut round = 0u64;
    c.bench_function("engine_batch_100", |b| {
        b.iter(|| {
            round += 1;
            let mut batch = WriteBatch::new(64 * 1024);
            for i in 0..100u64 {
                batch
                    .add_put(
                        format!("batch-{round:08}-{i:03}").into_bytes(),
                        vec![0x42; 32],
                    )
                    .unwrap();
            }
            engine.batch_submit(batch).unwrap();
        })
    });
    engine.close().unwrap();
}

fn bench_cache_policies(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_set_get");
    for policy in [EvictionPolicy::Lru, EvictionPolicy::Clock, EvictionPolicy::Arc] {
        let mut config = StoreConfig::default();
        config.cache.max_entries = 10_000;
        config.cache.policy = policy;
        let cache = Cache::new(&config.cache);

        let mut i = 0u64;
        group.bench_function(format!("{policy:?}"), |b| {
            b.iter(|| {
                i += 1;
                let key = format!("cache-{:05}", i % 20_000).into_bytes();
                if i % 3 == 0 {
                    cache.set(key, vec![0x42; 32]);
                } else {
                    let _ = cache.get(&key);
                }
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_put,
    bench_get_memtable,
    bench_batch_submit,
    bench_cache_policies
);
criterion_main!(benches);
