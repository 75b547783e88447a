//! Enforcement benchmarks
//!
//! Measures `enforce` against growing policy sets and deepening role chains.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gatehouse_authz::{
    EngineConfig, Enforcer, GroupingTuple, MemoryAdapter, PolicyEffect, PolicyTuple,
};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn create_test_policies(count: usize) -> Vec<PolicyTuple> {
    (0..count)
        .map(|i| {
            let policy = PolicyTuple::new(
                format!("role-{}", i % 10),
                format!("document-{}", i % 100),
                if i % 3 == 0 { "write" } else { "read" },
            );
            if i % 7 == 0 {
                policy.with_effect(PolicyEffect::Deny)
            } else {
                policy
            }
        })
        .collect()
}

fn open_enforcer(
    rt: &Runtime,
    policies: Vec<PolicyTuple>,
    groupings: Vec<GroupingTuple>,
) -> Enforcer {
    rt.block_on(async {
        let config = EngineConfig {
            enable_metrics: false,
            ..Default::default()
        };
        let adapter = Arc::new(MemoryAdapter::with_tuples(policies, groupings));
        Enforcer::open(config, adapter).await.unwrap()
    })
}

fn bench_enforce_by_policy_count(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("enforce_by_policy_count");

    for policy_count in [10, 100, 1000, 10_000].iter() {
        let groupings = (0..10)
            .map(|i| GroupingTuple::new(format!("user-{}", i), format!("role-{}", i)))
            .collect();
        let enforcer = open_enforcer(&rt, create_test_policies(*policy_count), groupings);

        group.bench_with_input(
            BenchmarkId::new("policies", policy_count),
            policy_count,
            |b, _| {
                b.iter(|| {
                    black_box(enforcer.enforce(
                        black_box("user-3"),
                        black_box("document-13"),
                        black_box("read"),
                    ))
                });
            },
        );
    }

    group.finish();
}

fn bench_enforce_by_role_depth(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("enforce_by_role_depth");

    for depth in [1usize, 4, 16, 64].iter() {
        // user -> r0 -> r1 -> ... -> r{depth-1}, permission on the last role
        let mut groupings = vec![GroupingTuple::new("user", "r0")];
        groupings.extend((1..*depth).map(|i| GroupingTuple::new(format!("r{}", i - 1), format!("r{}", i))));
        let policies = vec![PolicyTuple::new(format!("r{}", depth - 1), "doc", "read")];
        let enforcer = open_enforcer(&rt, policies, groupings);

        group.bench_with_input(BenchmarkId::new("depth", depth), depth, |b, _| {
            b.iter(|| black_box(enforcer.enforce("user", "doc", "read")));
        });
    }

    group.finish();
}

fn bench_mutation(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let enforcer = open_enforcer(&rt, create_test_policies(1000), Vec::new());

    c.bench_function("add_remove_policy", |b| {
        b.to_async(&rt).iter(|| async {
            enforcer.add_policy("bench", "document-x", "read").await.unwrap();
            enforcer.remove_policy("bench", "document-x", "read").await.unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_enforce_by_policy_count,
    bench_enforce_by_role_depth,
    bench_mutation
);
criterion_main!(benches);
