//! Permission codec and evaluator benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;
use will_iam_authz::auth::{InMemoryLock, Locker};
use will_iam_authz::config::LockConfig;
use will_iam_authz::{AuthorizationEvaluator, InMemoryStore, Permission, ServiceAccountManager, Stores};

fn grants(count: usize) -> Vec<Permission> {
    (0..count)
        .map(|i| {
            Permission::parse(&format!("Service{}::RL::Action{}::game-{}::*", i % 7, i % 13, i)).unwrap()
        })
        .collect()
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    for s in ["Maestro::RL::EditScheduler::*", "Maestro::RO::EditScheduler::sniper-3d::na::stag::*"] {
        group.bench_with_input(BenchmarkId::from_parameter(s), s, |b, s| {
            b.iter(|| Permission::parse(black_box(s)).unwrap())
        });
    }
    group.finish();
}

fn bench_is_present(c: &mut Criterion) {
    let mut group = c.benchmark_group("is_present");
    let candidate = Permission::parse("Service3::RL::Action5::game-999999::x").unwrap();

    for count in [10, 100, 1000] {
        let grants = grants(count);
        group.bench_with_input(BenchmarkId::new("grants", count), &grants, |b, grants| {
            b.iter(|| black_box(&candidate).is_present(black_box(grants)))
        });
    }
    group.finish();
}

fn bench_has_permission(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("has_permission");

    for count in [10, 100] {
        let (evaluator, sa_id) = rt.block_on(async {
            let stores = Stores::new(Arc::new(InMemoryStore::new()));
            let locker = Locker::new(Arc::new(InMemoryLock::new()), LockConfig::default());
            let accounts = ServiceAccountManager::new(stores.clone(), locker);
            let (sa, _) = accounts.create_key_pair_type("bench").await.unwrap();
            for grant in grants(count) {
                accounts.bootstrap_permission(&sa.id, grant).await.unwrap();
            }
            (AuthorizationEvaluator::new(stores.permissions.clone()), sa.id)
        });

        group.bench_with_input(BenchmarkId::new("grants", count), &count, |b, _| {
            b.to_async(&rt).iter(|| async {
                evaluator
                    .has_permission(&sa_id, "Service3::RL::Action5::game-3::x")
                    .await
                    .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse, bench_is_present, bench_has_permission);
criterion_main!(benches);
