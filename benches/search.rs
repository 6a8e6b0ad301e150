//! Search benchmarks
//!
//! Run with: cargo bench --bench search

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tokio::runtime::Runtime;

use mnemos::collection::SearchOptions;
use mnemos::{CreateMemoryInput, MemoryCollection, MemoryConfig, MemoryType};

fn seeded_collection(rt: &Runtime, count: usize) -> MemoryCollection {
    let config = MemoryConfig {
        scheduler_enabled: false,
        ..MemoryConfig::in_memory()
    };
    let collection = MemoryCollection::open(config).unwrap();

    rt.block_on(async {
        for i in 0..count {
            collection
                .store(CreateMemoryInput {
                    content: format!(
                        "note {} about service {} timeouts, retries and connection pooling",
                        i,
                        i % 17
                    ),
                    memory_type: MemoryType::Context,
                    tags: vec![format!("svc-{}", i % 17)],
                    project: Some("bench".to_string()),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
    });

    collection
}

fn bench_search(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let collection = seeded_collection(&rt, 500);

    let mut group = c.benchmark_group("search");

    group.bench_function("hybrid_cold", |b| {
        b.iter(|| {
            rt.block_on(async {
                let response = collection
                    .search(
                        black_box("service connection pool timeout retries"),
                        SearchOptions {
                            limit: 10,
                            use_cache: false,
                            ..Default::default()
                        },
                    )
                    .await
                    .unwrap();
                black_box(response.results.len())
            })
        })
    });

    group.bench_function("hybrid_cached", |b| {
        b.iter(|| {
            rt.block_on(async {
                let response = collection
                    .search(
                        black_box("service connection pool timeout retries"),
                        SearchOptions {
                            limit: 10,
                            ..Default::default()
                        },
                    )
                    .await
                    .unwrap();
                black_box(response.cache_hit)
            })
        })
    });

    group.bench_function("sparse_only", |b| {
        b.iter(|| {
            rt.block_on(async {
                let response = collection
                    .search(
                        black_box("svc_pool_timeout"),
                        SearchOptions {
                            limit: 10,
                            use_cache: false,
                            ..Default::default()
                        },
                    )
                    .await
                    .unwrap();
                black_box(response.results.len())
            })
        })
    });

    group.finish();
}

fn bench_store(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let collection = seeded_collection(&rt, 100);
    let mut i = 0u64;

    c.bench_function("store", |b| {
        b.iter(|| {
            i += 1;
            rt.block_on(async {
                collection
                    .store(CreateMemoryInput {
                        content: format!(
                            "benchmark ingest number {} with enough content to validate",
                            i
                        ),
                        memory_type: MemoryType::Context,
                        ..Default::default()
                    })
                    .await
                    .unwrap()
            })
        })
    });
}

criterion_group!(benches, bench_search, bench_store);
criterion_main!(benches);
