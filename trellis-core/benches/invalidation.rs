//! Benchmarks for commit-time invalidation.
//!
//! Measures a dispatch that touches one key while many subscribers watch
//! other keys, and a tracked read over a wide array.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

use trellis_core::store::Store;

fn wide_store(keys: usize) -> Store {
    let fields: serde_json::Map<String, serde_json::Value> = (0..keys)
        .map(|i| (format!("key_{}", i), json!({"value": i})))
        .collect();
    Store::builder("bench")
        .init(serde_json::Value::Object(fields))
        .action("bump", |state, args| {
            let key = args
                .first()
                .and_then(|arg| arg.as_value())
                .and_then(|value| value.as_str())
                .unwrap_or("key_0")
                .to_string();
            let entry = state.get(key.as_str());
            let current = entry.get("value").as_f64().unwrap_or(0.0);
            match entry.as_node() {
                Some(node) => node.set("value", current + 1.0),
                None => Ok(()),
            }
        })
        .build()
        .expect("bench store")
}

fn bench_dispatch_with_subscribers(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_with_subscribers");

    for count in [10usize, 100, 1000] {
        let store = wide_store(count);
        let subs: Vec<_> = (0..count)
            .map(|i| {
                let key = format!("key_{}", i);
                store.subscribe(move |state| state.get(key.as_str()).get("value"), |_| {})
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| store.dispatch("bump", &["key_0".into()]).expect("dispatch"));
        });
        drop(subs);
    }

    group.finish();
}

fn bench_tracked_array_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracked_array_read");

    for len in [100usize, 1000] {
        let items: Vec<serde_json::Value> = (0..len).map(|i| json!(i)).collect();
        let store = Store::builder("array")
            .init(json!({"items": items}))
            .build()
            .expect("bench store");

        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.iter(|| {
                let (sum, paths) = store.read(|state| {
                    state
                        .get("items")
                        .as_node()
                        .map(|items| items.iter().iter().filter_map(|r| r.as_f64()).sum::<f64>())
                        .unwrap_or(0.0)
                });
                black_box((sum, paths.len()))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_dispatch_with_subscribers, bench_tracked_array_read);
criterion_main!(benches);
