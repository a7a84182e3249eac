//! Commit Benchmarks
//!
//! ## Benchmark Path Types
//!
//! - `txn_commit/*`: whole transaction lifecycle (enter, record, commit)
//! - `txn_propagation/*`: changeset creation along reference chains
//! - `txn_init/*`: init-phase scheduling with listeners on every container
//!
//! ## Running
//!
//! ```bash
//! cargo bench --bench commit_benchmarks
//! cargo bench --bench commit_benchmarks -- "txn_propagation"
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use typegraph_concurrency::{Container, ContainerKind, ContainerState, Member, TransactionManager};

// =============================================================================
// Utilities - all graph construction happens outside timed loops
// =============================================================================

/// Build a chain `root -> ... -> leaf` of complex containers; returns it leaf first
fn build_chain(manager: &TransactionManager, depth: usize) -> Vec<Container> {
    let mut chain = vec![Container::empty(manager, ContainerKind::Complex)];
    for _ in 1..depth {
        let mut props = BTreeMap::new();
        props.insert("next".to_string(), Member::from(chain[chain.len() - 1].clone()));
        chain.push(Container::new(manager, ContainerState::Complex(props)));
    }
    chain
}

// =============================================================================
// Commit
// =============================================================================

fn txn_commit_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("txn_commit");
    group.throughput(Throughput::Elements(1));

    {
        let manager = TransactionManager::new();
        let container = Container::empty(&manager, ContainerKind::Complex);
        let counter = AtomicI64::new(0);

        group.bench_function("single_set_auto_commit", |b| {
            b.iter(|| {
                let i = counter.fetch_add(1, Ordering::Relaxed);
                container
                    .mutate(|changeset| changeset.set("value", i).map(|_| ()))
                    .unwrap();
                black_box(container.version())
            });
        });
    }

    for count in [10usize, 100] {
        let manager = TransactionManager::new();
        let containers: Vec<Container> = (0..count)
            .map(|_| Container::empty(&manager, ContainerKind::Complex))
            .collect();
        let counter = AtomicI64::new(0);

        group.bench_with_input(BenchmarkId::new("scope_many_containers", count), &count, |b, _| {
            b.iter(|| {
                let i = counter.fetch_add(1, Ordering::Relaxed);
                let scope = manager.enter().unwrap();
                for container in &containers {
                    container
                        .mutate(|changeset| changeset.set("value", i).map(|_| ()))
                        .unwrap();
                }
                black_box(scope.accept().unwrap())
            });
        });
    }

    group.finish();
}

// =============================================================================
// Propagation
// =============================================================================

fn txn_propagation_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("txn_propagation");

    for depth in [4usize, 32] {
        let manager = TransactionManager::new();
        let chain = build_chain(&manager, depth);
        let leaf = chain[0].clone();
        let counter = AtomicI64::new(0);

        group.bench_with_input(BenchmarkId::new("chain_leaf_set", depth), &depth, |b, _| {
            b.iter(|| {
                let i = counter.fetch_add(1, Ordering::Relaxed);
                leaf.mutate(|changeset| changeset.set("value", i).map(|_| ()))
                    .unwrap();
            });
        });
    }

    group.finish();
}

// =============================================================================
// Init phase
// =============================================================================

fn txn_init_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("txn_init");

    for depth in [4usize, 32] {
        let manager = TransactionManager::new();
        let chain = build_chain(&manager, depth);
        for container in &chain {
            container.on_init(|changeset| {
                black_box(changeset.net_order());
                Ok(())
            });
        }
        let leaf = chain[0].clone();
        let counter = AtomicI64::new(0);

        group.bench_with_input(BenchmarkId::new("chain_with_listeners", depth), &depth, |b, _| {
            b.iter(|| {
                let i = counter.fetch_add(1, Ordering::Relaxed);
                leaf.mutate(|changeset| changeset.set("value", i).map(|_| ()))
                    .unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(
    name = txn;
    config = Criterion::default().measurement_time(Duration::from_secs(5));
    targets = txn_commit_benchmarks, txn_propagation_benchmarks, txn_init_benchmarks
);

criterion_main!(txn);
