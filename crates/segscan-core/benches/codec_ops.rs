//! Benchmarks for per-cell decoding and row filtering

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::Rng;
use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array, StringArray};
use segscan_core::codec::CodecRegistry;
use segscan_core::filter::{EntryFilter, TombstoneFilter};
use segscan_core::models::{DataType, PrimaryKey, RowValues};

fn bench_deserialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("deserialize");
    let codecs = CodecRegistry::new();
    let mut rng = rand::thread_rng();

    let ints: ArrayRef = Arc::new(Int64Array::from((0..4096).map(|_| rng.gen::<i64>()).collect::<Vec<_>>()));
    let strings: ArrayRef = Arc::new(StringArray::from(
        (0..4096).map(|i| format!("pk-{:08}", i)).collect::<Vec<_>>(),
    ));

    for (data_type, array) in [(DataType::Int64, &ints), (DataType::VarChar, &strings)] {
        group.bench_with_input(BenchmarkId::from_parameter(data_type), array, |bench, array| {
            bench.iter(|| {
                for idx in 0..array.len() {
                    black_box(codecs.deserialize(data_type, array.as_ref(), idx));
                }
            });
        });
    }

    group.finish();
}

fn bench_tombstone_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("tombstone_filter");
    let mut rng = rand::thread_rng();
    let values = RowValues::new();

    for deletes in [1_000, 100_000] {
        let mut filter = TombstoneFilter::new();
        for _ in 0..deletes {
            filter.insert(PrimaryKey::Int64(rng.gen_range(0..1_000_000)), rng.gen_range(0..2_000));
        }
        let keys: Vec<PrimaryKey> = (0..1024).map(|_| PrimaryKey::Int64(rng.gen_range(0..1_000_000))).collect();

        group.bench_with_input(BenchmarkId::from_parameter(deletes), &deletes, |bench, _| {
            bench.iter(|| {
                keys.iter()
                    .filter(|pk| filter.matches(black_box(pk), 1_000, &values))
                    .count()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_deserialize, bench_tombstone_filter);
criterion_main!(benches);
