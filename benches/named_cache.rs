//! Named cache micro-benchmarks

use criterion::{criterion_group, criterion_main, Criterion};
use deploy_orchestrator::{CacheConfig, CacheDirectory};
use serde_json::json;
use tokio::runtime::Runtime;

fn bench_named_cache(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = CacheDirectory::new(CacheConfig::default());
    dir.setup("bench", None);

    rt.block_on(async {
        dir.write("bench", "hot", json!({"cpus": 32, "model": "dl380"}))
            .await
            .unwrap();
    });

    c.bench_function("cache_read_hit", |b| {
        b.to_async(&rt)
            .iter(|| async { dir.read("bench", "hot").await.unwrap() });
    });

    c.bench_function("cache_write", |b| {
        b.to_async(&rt).iter(|| async {
            dir.write("bench", "churn", json!({"seq": 1}))
                .await
                .unwrap()
        });
    });

    c.bench_function("cache_read_or_set_hit", |b| {
        b.to_async(&rt).iter(|| async {
            dir.read_or_set("bench", "hot", || json!({"cpus": 32}))
                .await
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_named_cache);
criterion_main!(benches);
