//! Performance benchmarks for sequence allocation and provisioning units.
//!
//! Run with: cargo bench

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::Map;
use tokio::runtime::Runtime;

use warranty_core::domain::{EntityDraft, EntityKind, SequenceName};
use warranty_core::flows::ProvisioningService;
use warranty_core::infra::{
    DocumentRoleProvisioner, RetryConfig, RoleProvisioner, SequenceAllocator,
    SqliteDocumentStore,
};

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

fn memory_store(rt: &Runtime) -> Arc<SqliteDocumentStore> {
    Arc::new(
        rt.block_on(SqliteDocumentStore::in_memory())
            .expect("in-memory store"),
    )
}

/// Benchmark plain sequence allocation
fn bench_sequence_next(c: &mut Criterion) {
    let rt = runtime();
    let allocator = SequenceAllocator::new(memory_store(&rt));
    let name = SequenceName::new("BENCH");

    let mut group = c.benchmark_group("sequence");
    group.throughput(Throughput::Elements(1));
    group.bench_function("next", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(allocator.next(&name, None).await.unwrap()) });
    });
    group.bench_function("reserve_confirm", |b| {
        b.to_async(&rt).iter(|| async {
            let reservation = allocator.reserve(&name).await.unwrap();
            black_box(allocator.confirm(reservation))
        });
    });
    group.finish();
}

/// Benchmark full store provisioning units
fn bench_create_store(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("provisioning");

    for batch in [1usize, 10, 50] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(
            BenchmarkId::new("create_store", batch),
            &batch,
            |b, &batch| {
                b.to_async(&rt).iter(|| async move {
                    let store = Arc::new(SqliteDocumentStore::in_memory().await.unwrap());
                    let roles: Arc<dyn RoleProvisioner<SqliteDocumentStore>> =
                        Arc::new(DocumentRoleProvisioner::new(store.clone()));
                    let service = ProvisioningService::new(store, roles, RetryConfig::none());
                    let company = service
                        .create_company("Bench", "555-9999", "bench", Map::new())
                        .await
                        .unwrap()
                        .key;

                    for i in 0..batch {
                        let draft = EntityDraft::new(EntityKind::Store, "bench")
                            .with("phone", format!("555-{i:04}"));
                        black_box(service.create_store(&company.id, draft).await.unwrap());
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_sequence_next, bench_create_store);
criterion_main!(benches);
