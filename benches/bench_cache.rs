use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use anygraph::{
    CachedBackend, GraphBackend, GraphOptions, Metadata, NodeId, SqliteBackend, SqliteTables,
};

const SAMPLE_SIZE: usize = 20;
const WARM_UP: Duration = Duration::from_millis(300);
const MEASURE: Duration = Duration::from_millis(500);

fn bench_scales() -> &'static [usize] {
    &[1_000, 5_000]
}

fn seeded_backend(nodes: usize) -> SqliteBackend {
    let backend = SqliteBackend::open_in_memory(GraphOptions::directed(), SqliteTables::default())
        .expect("backend");
    let entries: Vec<_> = (0..nodes as i64)
        .map(|i| (NodeId::Int(i), Metadata::new()))
        .collect();
    backend.add_nodes_from(entries).expect("seed nodes");
    let edges: Vec<_> = (1..nodes as i64)
        .map(|i| (NodeId::Int(i - 1), NodeId::Int(i), Metadata::new()))
        .collect();
    backend.add_edges_from(edges).expect("seed edges");
    backend
}

fn read_workload(backend: &dyn GraphBackend, nodes: usize) {
    let probe = NodeId::Int((nodes / 2) as i64);
    for _ in 0..100 {
        let _ = backend.node_count().expect("node count");
        let _ = backend.get_node(&probe).expect("node lookup");
        let _ = backend.degree(&probe).expect("degree");
    }
}

fn bench_repeated_reads_direct(c: &mut Criterion) {
    let mut group = c.benchmark_group("repeated_reads_direct");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    for &nodes in bench_scales() {
        let backend = seeded_backend(nodes);
        group.bench_function(BenchmarkId::from_parameter(nodes), |b| {
            b.iter(|| read_workload(&backend, nodes));
        });
    }
    group.finish();
}

fn bench_repeated_reads_cached(c: &mut Criterion) {
    let mut group = c.benchmark_group("repeated_reads_cached");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    for &nodes in bench_scales() {
        let backend = CachedBackend::new(seeded_backend(nodes));
        group.bench_function(BenchmarkId::from_parameter(nodes), |b| {
            b.iter(|| read_workload(&backend, nodes));
        });
    }
    group.finish();
}

fn bench_read_write_mix_cached(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_write_mix_cached");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    for &nodes in bench_scales() {
        let backend = CachedBackend::new(seeded_backend(nodes));
        group.bench_function(BenchmarkId::from_parameter(nodes), |b| {
            let mut next = nodes as i64;
            b.iter(|| {
                backend
                    .add_node(NodeId::Int(next), Metadata::new())
                    .expect("insert");
                next += 1;
                read_workload(&backend, nodes);
            });
        });
    }
    group.finish();
}

criterion_group!(
    name = cache_benches;
    config = Criterion::default();
    targets = bench_repeated_reads_direct, bench_repeated_reads_cached, bench_read_write_mix_cached
);
criterion_main!(cache_benches);
