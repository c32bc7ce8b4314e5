//! Property tests for block-to-chunk and chunk-to-cell mapping.

use loam_world::prelude::*;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(5_000))]

    #[test]
    fn block_lies_inside_its_chunk(
        x in -1_000_000i32..1_000_000,
        y in -100_000i32..100_000,
        z in -1_000_000i32..1_000_000,
    ) {
        let pos = chunk_pos_of_block(x, y, z);
        let [mx, my, mz] = pos.min_block();
        prop_assert!(mx <= x && x < mx + CHUNK_SIZE_X);
        prop_assert!(my <= y && y < my + CHUNK_SIZE_Y);
        prop_assert!(mz <= z && z < mz + CHUNK_SIZE_Z);
    }

    #[test]
    fn grid_cell_contains_chunk(
        x in -100_000i32..100_000,
        y in -100_000i32..100_000,
        z in -100_000i32..100_000,
    ) {
        let cell = ChunkPos::new(x, y, z).grid_cell(32);
        prop_assert!(cell.x * 32 <= x && x < cell.x * 32 + 32);
        prop_assert!(cell.y * 32 <= y && y < cell.y * 32 + 32);
        prop_assert!(cell.z * 32 <= z && z < cell.z * 32 + 32);
    }

    #[test]
    fn run_length_roundtrip_preserves_blocks(
        edits in prop::collection::vec((0i32..32, 0i32..64, 0i32..32, 0u16..8), 0..200),
    ) {
        let pos = ChunkPos::new(3, -2, 7);
        let mut chunk = Chunk::new(pos);
        for (x, y, z, b) in &edits {
            chunk.set_block(*x, *y, *z, *b);
        }
        let bytes = RunLengthChunkSerializer.encode(&chunk);
        let back = RunLengthChunkSerializer.decode(pos, &bytes).unwrap();
        prop_assert_eq!(back, chunk);
    }
}
