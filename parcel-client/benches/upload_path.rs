//! Benchmarks for the upload hot path against the in-memory remote

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use parcel_client::{MemorySessionClient, UploadCoordinator, UploadOptions};
use parcel_core::*;
use std::sync::Arc;
use std::time::Duration;

const OBJECT_SIZE: usize = 8 * 1024 * 1024;
const PART_SIZES: &[u64] = &[256 * 1024, 1024 * 1024, 4 * 1024 * 1024];

fn bench_memory_upload(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let source = Arc::new(MemorySource::new(vec![42u8; OBJECT_SIZE]));
    let target = ObjectTarget::new(
        BucketName::new("bench-bucket").unwrap(),
        ObjectKey::new("bench-object").unwrap(),
    );

    let mut group = c.benchmark_group("memory_upload");
    group.throughput(Throughput::Bytes(OBJECT_SIZE as u64));

    for &part_size in PART_SIZES {
        let options = UploadOptions {
            part_size,
            concurrency: 4,
            retry: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(1)),
            part_timeout: None,
        };
        let coordinator = UploadCoordinator::new(MemorySessionClient::new(), options).unwrap();

        group.bench_with_input(BenchmarkId::new("part_size", part_size), &part_size, |b, _| {
            b.iter(|| {
                let report = runtime
                    .block_on(coordinator.upload(target.clone(), source.clone()))
                    .unwrap();
                black_box(report);
            });
        });
    }

    group.finish();
}

fn bench_part_planning(c: &mut Criterion) {
    c.bench_function("plan_10000_parts", |b| {
        b.iter(|| {
            let plan =
                PartPlan::new(black_box(50 * 1024 * 1024 * 1024), 5 * 1024 * 1024 + 1).unwrap();
            black_box(plan.iter().map(|p| p.byte_length).sum::<u64>())
        });
    });
}

criterion_group!(benches, bench_memory_upload, bench_part_planning);
criterion_main!(benches);
