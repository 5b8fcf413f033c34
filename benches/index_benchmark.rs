use anukram::graph::{EntityId, Label, PropertyMap, PropertyValue};
use anukram::index::{
    EdgeRecord, EntitySource, IndexDescriptor, IndexManager, IndexPredicate, NodeRecord,
};
use anukram::skiplist::SkipList;
use anukram::txn::TxnManager;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use crossbeam_epoch as epoch;
use std::sync::Arc;

fn benchmark_skiplist_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("skiplist_insert");
    for size in [100u64, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let list: SkipList<u64, u64> = SkipList::new();
                for i in 0..size {
                    list.insert(black_box(i), i);
                }
                list
            });
        });
    }
    group.finish();
}

fn benchmark_skiplist_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("skiplist_get");
    for size in [100u64, 1_000, 10_000] {
        let list: SkipList<u64, u64> = SkipList::new();
        for i in 0..size {
            list.insert(i, i * 10);
        }
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut key = 0;
            b.iter(|| {
                key = (key + 7) % size;
                let guard = epoch::pin();
                black_box(list.get(&key, &guard).map(|e| *e.value()))
            });
        });
    }
    group.finish();
}

fn benchmark_skiplist_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("skiplist_scan");
    for size in [1_000u64, 10_000] {
        let list: SkipList<u64, u64> = SkipList::new();
        for i in 0..size {
            list.insert(i, i);
        }
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let guard = epoch::pin();
                let mut sum = 0u64;
                for entry in list.iter(&guard) {
                    sum = sum.wrapping_add(*entry.key());
                }
                black_box(sum)
            });
        });
    }
    group.finish();
}

struct BenchSource {
    nodes: Vec<NodeRecord>,
}

impl EntitySource for BenchSource {
    fn nodes(&self) -> Box<dyn Iterator<Item = NodeRecord> + '_> {
        Box::new(self.nodes.iter().cloned())
    }

    fn edges(&self) -> Box<dyn Iterator<Item = EdgeRecord> + '_> {
        Box::new(std::iter::empty())
    }
}

fn populated_manager(size: u64) -> (Arc<TxnManager>, IndexManager, IndexDescriptor) {
    let descriptor = IndexDescriptor::LabelProperty(Label::new("Person"), "age".to_string());
    let nodes = (0..size)
        .map(|i| {
            let mut properties = PropertyMap::new();
            properties.insert(
                "age".to_string(),
                PropertyValue::Integer((i % 100) as i64),
            );
            NodeRecord {
                id: EntityId::new(i),
                labels: vec![Label::new("Person")],
                properties,
            }
        })
        .collect();
    let txns = Arc::new(TxnManager::new());
    let indices = IndexManager::new(Arc::clone(&txns));
    let ddl = txns.begin();
    indices
        .create_index(descriptor.clone(), &BenchSource { nodes }, &ddl)
        .unwrap();
    txns.commit(&ddl);
    (txns, indices, descriptor)
}

fn benchmark_index_lookup_equals(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_lookup_equals");
    for size in [1_000u64, 10_000, 100_000] {
        let (txns, indices, descriptor) = populated_manager(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let reader = txns.begin();
                let ids: Vec<EntityId> = indices
                    .lookup(
                        &descriptor,
                        IndexPredicate::Equals(PropertyValue::Integer(50)),
                        &reader,
                    )
                    .unwrap()
                    .collect();
                txns.commit(&reader);
                black_box(ids)
            });
        });
    }
    group.finish();
}

fn benchmark_index_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_apply");
    for size in [1_000u64, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let (txns, indices, _) = populated_manager(0);
                let writer = txns.begin();
                for i in 0..size {
                    let mut properties = PropertyMap::new();
                    properties.insert(
                        "age".to_string(),
                        PropertyValue::Integer((i % 100) as i64),
                    );
                    indices
                        .apply(
                            &anukram::index::MutationEvent::NodeCreated {
                                id: EntityId::new(i),
                                labels: vec![Label::new("Person")],
                                properties,
                            },
                            &writer,
                        )
                        .unwrap();
                }
                txns.commit(&writer);
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    benchmark_skiplist_insert,
    benchmark_skiplist_get,
    benchmark_skiplist_scan,
    benchmark_index_lookup_equals,
    benchmark_index_apply
);
criterion_main!(benches);
