//! Byte encoding of chunk block data.

use crate::chunk::{BlockId, Chunk, ChunkPos, CHUNK_VOLUME};
use crate::WorldError;

/// Encodes and decodes the block data of a single chunk.
///
/// Implementations must be usable from the save thread.
pub trait ChunkSerializer: Send + Sync {
    fn encode(&self, chunk: &Chunk) -> Vec<u8>;

    fn decode(&self, pos: ChunkPos, bytes: &[u8]) -> Result<Chunk, WorldError>;
}

/// Run-length encoding: a sequence of `(run: u16 LE, block: u16 LE)` pairs.
///
/// Terrain is dominated by long runs of air and stone, so this is typically
/// a few hundred bytes per chunk before compression.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunLengthChunkSerializer;

impl ChunkSerializer for RunLengthChunkSerializer {
    fn encode(&self, chunk: &Chunk) -> Vec<u8> {
        let mut out = Vec::new();
        let mut blocks = chunk.blocks().iter().copied();
        let Some(mut current) = blocks.next() else {
            return out;
        };
        let mut run: u16 = 1;
        for block in blocks {
            if block == current && run < u16::MAX {
                run += 1;
            } else {
                push_run(&mut out, run, current);
                current = block;
                run = 1;
            }
        }
        push_run(&mut out, run, current);
        out
    }

    fn decode(&self, pos: ChunkPos, bytes: &[u8]) -> Result<Chunk, WorldError> {
        if bytes.len() % 4 != 0 {
            return Err(WorldError::InvalidChunkData {
                pos,
                details: format!("run data length {} is not a multiple of 4", bytes.len()),
            });
        }
        let mut blocks: Vec<BlockId> = Vec::with_capacity(CHUNK_VOLUME);
        for pair in bytes.chunks_exact(4) {
            let run = u16::from_le_bytes([pair[0], pair[1]]) as usize;
            let block = u16::from_le_bytes([pair[2], pair[3]]);
            if blocks.len() + run > CHUNK_VOLUME {
                return Err(WorldError::InvalidChunkData {
                    pos,
                    details: "runs exceed chunk volume".to_owned(),
                });
            }
            blocks.extend(std::iter::repeat(block).take(run));
        }
        Chunk::from_blocks(pos, blocks)
    }
}

fn push_run(out: &mut Vec<u8>, run: u16, block: BlockId) {
    out.extend_from_slice(&run.to_le_bytes());
    out.extend_from_slice(&block.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_chunk_encodes_compactly() {
        let chunk = Chunk::new(ChunkPos::new(0, 0, 0));
        let bytes = RunLengthChunkSerializer.encode(&chunk);
        // 65536 blocks need two u16 runs.
        assert_eq!(bytes.len(), 8);
        let decoded = RunLengthChunkSerializer
            .decode(ChunkPos::new(0, 0, 0), &bytes)
            .unwrap();
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn mixed_blocks_survive() {
        let mut chunk = Chunk::new(ChunkPos::new(2, -1, 0));
        chunk.set_block(0, 0, 0, 3);
        chunk.set_block(5, 10, 7, 12);
        let bytes = RunLengthChunkSerializer.encode(&chunk);
        let decoded = RunLengthChunkSerializer.decode(chunk.position(), &bytes).unwrap();
        assert_eq!(decoded.block(0, 0, 0), 3);
        assert_eq!(decoded.block(5, 10, 7), 12);
        assert_eq!(decoded.block(1, 0, 0), 0);
    }

    #[test]
    fn short_or_ragged_data_is_rejected() {
        let pos = ChunkPos::new(0, 0, 0);
        assert!(RunLengthChunkSerializer.decode(pos, &[1, 0, 0]).is_err());
        assert!(RunLengthChunkSerializer.decode(pos, &[1, 0, 0, 0]).is_err());
        let too_long = [0xff, 0xff, 0, 0, 0xff, 0xff, 0, 0, 5, 0, 0, 0];
        assert!(RunLengthChunkSerializer.decode(pos, &too_long).is_err());
    }
}
