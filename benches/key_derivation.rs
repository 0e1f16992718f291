use autocache::{CallArgs, KeyCodec, KeyFn, MemoryStore, Namespace};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Serialize)]
struct Query {
    tenant: String,
    filters: HashMap<String, String>,
    page: u32,
}

fn query() -> Query {
    let filters = (0..16)
        .map(|i| (format!("field{}", i), format!("value{}", i)))
        .collect();
    Query {
        tenant: "acme".to_string(),
        filters,
        page: 3,
    }
}

fn bench_digest(c: &mut Criterion) {
    let small = (1u64, "two", 3.0f64);
    let large = query();

    c.bench_function("digest_tuple", |b| {
        b.iter(|| KeyCodec::digest(black_box(&small)).unwrap())
    });
    c.bench_function("digest_struct_with_map", |b| {
        b.iter(|| KeyCodec::digest(black_box(&large)).unwrap())
    });
    c.bench_function("digest_call_args", |b| {
        let args = CallArgs::new().arg("rust").kwarg("limit", 10).kwarg("offset", 20);
        b.iter(|| KeyCodec::digest(black_box(&args)).unwrap())
    });
}

fn bench_build_key(c: &mut Criterion) {
    let ns = Namespace::new("bench", Duration::from_secs(60), Arc::new(MemoryStore::new()))
        .expect("valid namespace");
    let large = query();
    let key_fn = KeyFn::new(|q: &Query| (q.tenant.clone(), q.page));

    c.bench_function("build_key_arguments", |b| {
        b.iter(|| ns.build_key("bench::search", black_box(&large), None).unwrap())
    });
    c.bench_function("build_key_key_fn", |b| {
        b.iter(|| {
            ns.build_key("bench::search", black_box(&large), Some(&key_fn))
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_digest, bench_build_key);
criterion_main!(benches);
