//! Record store merge + result table encoding
//!
//! Every merge rewrites the full CSV, so cost grows with the accumulated
//! result set. These measure a batch merge at several table sizes.

use billing_crawler::domain::{CustomerId, RecordData, ResultEntry, ResultSet};
use billing_crawler::infrastructure::RecordStore;
use billing_crawler::infrastructure::record_store::encode_result_table;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::path::Path;

const PERIODS: [&str; 12] = [
    "2024-01", "2024-02", "2024-03", "2024-04", "2024-05", "2024-06", "2024-07", "2024-08",
    "2024-09", "2024-10", "2024-11", "2024-12",
];

fn entry(n: usize) -> ResultEntry {
    // Sparse rows: each id has 6 of the 12 periods
    let data: RecordData = PERIODS
        .iter()
        .enumerate()
        .filter(|(i, _)| (i + n) % 2 == 0)
        .map(|(i, period)| (*period, (n * 100 + i) as f64))
        .collect();
    ResultEntry::new(format!("CID-{n:06}"), data)
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_result_table");
    for size in [100usize, 1_000, 10_000] {
        let results: ResultSet = (0..size).map(entry).collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &results, |b, results| {
            b.iter(|| encode_result_table(black_box(results), Path::new("bench.csv")).unwrap());
        });
    }
    group.finish();
}

fn bench_merge_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_batch_of_10");
    group.sample_size(20);

    for size in [100usize, 1_000, 10_000] {
        let dir = tempfile::tempdir().unwrap();
        let mut store =
            RecordStore::load(dir.path().join("results.csv"), dir.path().join("failed.json"));
        store.merge((0..size).map(entry), Vec::new()).unwrap();

        let mut next = size;
        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            b.iter(|| {
                let batch: Vec<ResultEntry> = (next..next + 9).map(entry).collect();
                let failure = CustomerId::from(format!("FAILED-{next}"));
                next += 10;
                store.merge(batch, [failure]).unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_merge_batch);
criterion_main!(benches);
