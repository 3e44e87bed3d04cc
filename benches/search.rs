//! Search throughput benchmarks.
//!
//! Measures coarse+rerank query latency against nprobe, plus the direct
//! brute-force baseline, on a Gaussian-mixture corpus.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use quiver::{
    DocidBitmap, IvfPqEngine, IvfPqParams, RawVectorStore, SearchCondition,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

const DIM: usize = 32;
const N: usize = 20_000;

fn mixture(n: usize, d: usize, components: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let centers: Vec<Vec<f32>> = (0..components)
        .map(|_| (0..d).map(|_| rng.random_range(-20.0f32..20.0)).collect())
        .collect();
    let mut out = Vec::with_capacity(n * d);
    for i in 0..n {
        let c = &centers[i % components];
        for j in 0..d {
            out.push(c[j] + rng.random_range(-1.0f32..1.0));
        }
    }
    out
}

fn build_engine(nprobe: usize) -> (IvfPqEngine, Vec<f32>) {
    let points = mixture(N, DIM, 32, 99);
    let store = Arc::new(RawVectorStore::new(DIM, N * 2, 4));
    let bitmap = Arc::new(DocidBitmap::new());
    for i in 0..N {
        store
            .add(i as i64, &points[i * DIM..(i + 1) * DIM], None)
            .unwrap();
    }
    let params = IvfPqParams {
        dimension: DIM,
        nlist: 128,
        m: 8,
        nprobe,
        training_seed: Some(1),
        ..IvfPqParams::default()
    };
    let mut engine = IvfPqEngine::new(store, bitmap, params).unwrap();
    engine.indexing().unwrap();
    engine.add_rt_vecs_to_index().unwrap();
    (engine, points)
}

fn bench_nprobe(c: &mut Criterion) {
    let mut group = c.benchmark_group("ivfpq_search");
    for nprobe in [4, 16, 64] {
        let (engine, points) = build_engine(nprobe);
        let query = &points[..DIM];
        let cond = SearchCondition {
            topn: 10,
            recall_num: 100,
            ..SearchCondition::default()
        };
        group.bench_with_input(BenchmarkId::new("nprobe", nprobe), &nprobe, |b, _| {
            b.iter(|| {
                let result = engine.search(black_box(query), &cond).unwrap();
                black_box(result.docids[0])
            })
        });
    }
    group.finish();
}

fn bench_direct(c: &mut Criterion) {
    let (engine, points) = build_engine(16);
    let query = &points[..DIM];
    let cond = SearchCondition {
        topn: 10,
        use_direct_search: true,
        ..SearchCondition::default()
    };
    c.bench_function("direct_search", |b| {
        b.iter(|| {
            let result = engine.search(black_box(query), &cond).unwrap();
            black_box(result.docids[0])
        })
    });
}

criterion_group!(benches, bench_nprobe, bench_direct);
criterion_main!(benches);
