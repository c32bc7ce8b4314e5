//! Chunk codec throughput.
//!
//! Measures encoding (run-length + JSON entities + zstd + blake3) and decoding
//! of one chunk blob for a sparse and a noisy chunk, with and without
//! entities, across compression levels.
//!
//! Run with: `cargo bench --bench chunk_codec_benchmarks`

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use loam_ecs::prelude::*;
use loam_persistence::prelude::*;
use loam_world::prelude::*;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn sparse_chunk() -> Chunk {
    let mut chunk = Chunk::new(ChunkPos::new(0, 0, 0));
    for x in 0..CHUNK_SIZE_X {
        for z in 0..CHUNK_SIZE_Z {
            for y in 0..16 {
                chunk.set_block(x, y, z, 1);
            }
        }
    }
    chunk.mark_ready();
    chunk
}

/// Seeded random blocks; the worst case for run-length coding.
fn noisy_chunk() -> Chunk {
    let mut rng = Pcg64::seed_from_u64(0x10a3);
    let mut chunk = Chunk::new(ChunkPos::new(0, 0, 0));
    for y in 0..CHUNK_SIZE_Y {
        for z in 0..CHUNK_SIZE_Z {
            for x in 0..CHUNK_SIZE_X {
                chunk.set_block(x, y, z, rng.gen_range(0..8));
            }
        }
    }
    chunk.mark_ready();
    chunk
}

fn entity_store(count: usize) -> EntityStore {
    let mut manager = EntityManager::new();
    let ids: Vec<EntityId> = (0..count)
        .map(|i| {
            manager.create(vec![
                Location::new(i as f32 % 32.0, 20.0, (i / 32) as f32).to_component(),
                Component::new(ComponentType::new("bench:inventory"))
                    .with("slots", 27)
                    .with("owner", "player"),
            ])
        })
        .collect();
    let index = OwnershipIndex::build(&manager).unwrap();
    let mut storer = EntityStorer::new(&manager, &index);
    for id in ids {
        storer.store(id, None).unwrap();
    }
    storer.finish().0
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_encode");
    let chunks = [("sparse", sparse_chunk()), ("noisy", noisy_chunk())];
    let entities = entity_store(64);

    for level in [1, 3, 9] {
        let codec = ChunkCodec::new(Arc::new(RunLengthChunkSerializer), level);
        for (name, chunk) in &chunks {
            group.bench_with_input(
                BenchmarkId::new(*name, format!("level-{level}")),
                chunk,
                |b, chunk| b.iter(|| codec.encode(black_box(chunk), &entities).unwrap()),
            );
        }
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_decode");
    let codec = ChunkCodec::new(Arc::new(RunLengthChunkSerializer), 3);

    for (name, chunk, count) in [
        ("sparse", sparse_chunk(), 0),
        ("sparse+entities", sparse_chunk(), 64),
        ("noisy", noisy_chunk(), 0),
    ] {
        let blob = codec.encode(&chunk, &entity_store(count)).unwrap();
        group.bench_function(name, |b| {
            b.iter(|| codec.decode(chunk.position(), black_box(&blob)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
