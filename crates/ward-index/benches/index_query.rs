//! Point-query benchmarks across index implementations.

use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ward_index::{ChunkHashTable, HashMapIndex, PriorityRTreeIndex, RegionIndex};
use ward_region::{BlockVector3, ChunkPos, Region, RegionRef, Shape};

/// Deterministic pseudo-random layout so runs are comparable.
fn regions(count: usize) -> Vec<RegionRef> {
    let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
    let mut next = move |range: i32| {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        (seed % range as u64) as i32
    };

    (0..count)
        .map(|i| {
            let x = next(4096) - 2048;
            let z = next(4096) - 2048;
            let w = next(64) + 1;
            let d = next(64) + 1;
            let shape = Shape::cuboid(BlockVector3::new(x, 0, z), BlockVector3::new(x + w, 255, z + d));
            let region = Region::new(&format!("r{i}"), shape).unwrap();
            region.set_priority(next(10));
            Arc::new(region)
        })
        .collect()
}

fn probes() -> Vec<BlockVector3> {
    (0..256)
        .map(|i| BlockVector3::new((i * 37) % 4096 - 2048, 64, (i * 91) % 4096 - 2048))
        .collect()
}

fn query_all(index: &dyn RegionIndex, probes: &[BlockVector3]) -> usize {
    let mut hits = 0;
    for &p in probes {
        index.apply_containing(p, &mut |_| {
            hits += 1;
            true
        });
    }
    hits
}

fn point_query_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_containing");
    let probes = probes();
    group.throughput(Throughput::Elements(probes.len() as u64));

    for count in [100, 1000, 10000] {
        let layout = regions(count);

        let hash = HashMapIndex::new();
        hash.add_all(layout.clone());
        group.bench_with_input(BenchmarkId::new("hash_map", count), &count, |b, _| {
            b.iter(|| black_box(query_all(&hash, &probes)));
        });

        let rtree = PriorityRTreeIndex::default();
        rtree.add_all(layout.clone());
        group.bench_with_input(BenchmarkId::new("priority_rtree", count), &count, |b, _| {
            b.iter(|| black_box(query_all(&rtree, &probes)));
        });

        let inner = Arc::new(PriorityRTreeIndex::default());
        let chunks = ChunkHashTable::new(inner, "bench");
        chunks.add_all(layout);
        let positions: Vec<ChunkPos> = probes.iter().map(|p| p.chunk()).collect();
        chunks.bias_all(&positions);
        chunks.await_completion(Duration::from_secs(30));
        group.bench_with_input(BenchmarkId::new("chunk_cache", count), &count, |b, _| {
            b.iter(|| black_box(query_all(&chunks, &probes)));
        });
    }

    group.finish();
}

fn rebuild_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_all");

    for count in [1000, 10000] {
        let layout = regions(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("priority_rtree", count), &layout, |b, layout| {
            b.iter(|| {
                let index = PriorityRTreeIndex::default();
                index.add_all(layout.clone());
                black_box(index.size())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, point_query_benchmarks, rebuild_benchmarks);
criterion_main!(benches);
