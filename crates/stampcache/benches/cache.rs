use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use stampcache::{BaselineCache, Cache, CustomCache, Generator, Policy};

fn payload() -> Generator<u64, Arc<Vec<u8>>> {
    Generator::new(|_: &u64| Arc::new(vec![b'x'; 1024]))
}

fn bench_cached_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_read");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    for policy in [Policy::Fifo, Policy::Lru] {
        group.bench_function(BenchmarkId::new("custom", policy), |b| {
            let cache = CustomCache::new(payload(), 1000, policy).unwrap();

            // Warm the cache
            for id in 0..100 {
                cache.read(&id).unwrap();
            }

            let mut counter = 0u64;
            b.iter(|| {
                black_box(cache.read(&(counter % 100)).unwrap());
                counter += 1;
            });
        });

        group.bench_function(BenchmarkId::new("baseline", policy), |b| {
            let cache = BaselineCache::new(payload(), 1000, policy).unwrap();
            for id in 0..100 {
                cache.read(&id).unwrap();
            }

            let mut counter = 0u64;
            b.iter(|| {
                black_box(cache.read(&(counter % 100)).unwrap());
                counter += 1;
            });
        });
    }

    group.finish();
}

fn bench_cache_miss(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_miss");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    for policy in [Policy::Fifo, Policy::Lru] {
        group.bench_function(BenchmarkId::new("custom", policy), |b| {
            let cache = CustomCache::new(payload(), 10, policy).unwrap(); // Small cache

            let mut counter = 0u64;
            b.iter(|| {
                // Cycling through more keys than fit guarantees misses
                black_box(cache.read(&(counter % 100)).unwrap());
                counter += 1;
            });
        });
    }

    group.finish();
}

fn bench_parallel_hot_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_hot_reads");
    group.sample_size(20);
    let threads = 4u64;
    let reads_per_thread = 10_000u64;
    group.throughput(Throughput::Elements(threads * reads_per_thread));

    for policy in [Policy::Fifo, Policy::Lru] {
        group.bench_function(BenchmarkId::new("custom", policy), |b| {
            let cache = CustomCache::new(payload(), 128, policy).unwrap();
            for id in 0..64 {
                cache.read(&id).unwrap();
            }

            b.iter(|| {
                thread::scope(|s| {
                    for t in 0..threads {
                        let cache = &cache;
                        s.spawn(move || {
                            for i in 0..reads_per_thread {
                                black_box(cache.read(&((i + t) % 64)).unwrap());
                            }
                        });
                    }
                });
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_cached_read,
    bench_cache_miss,
    bench_parallel_hot_reads
);
criterion_main!(benches);
