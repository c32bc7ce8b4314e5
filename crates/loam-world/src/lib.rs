//! Loam World -- chunk grid, block storage and chunk encoding.
//!
//! ```
//! use loam_world::prelude::*;
//!
//! let pos = chunk_pos_of_world([-3.5, 70.0, 12.0]);
//! assert_eq!(pos, ChunkPos::new(-1, 1, 0));
//!
//! let mut chunk = Chunk::new(pos);
//! chunk.set_block(0, 0, 0, 4);
//! let bytes = RunLengthChunkSerializer.encode(&chunk);
//! let back = RunLengthChunkSerializer.decode(pos, &bytes).unwrap();
//! assert_eq!(back.block(0, 0, 0), 4);
//! ```

#![deny(unsafe_code)]

pub mod chunk;
pub mod provider;
pub mod serializer;

use chunk::ChunkPos;

/// Errors produced while handling chunk data.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("invalid data for chunk {pos}: {details}")]
    InvalidChunkData { pos: ChunkPos, details: String },
}

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::chunk::{
        chunk_pos_of_block, chunk_pos_of_world, BlockId, Chunk, ChunkPos, CHUNK_SIZE_X,
        CHUNK_SIZE_Y, CHUNK_SIZE_Z, CHUNK_VOLUME,
    };
    pub use crate::provider::{ChunkProvider, LoadedChunks};
    pub use crate::serializer::{ChunkSerializer, RunLengthChunkSerializer};
    pub use crate::WorldError;
}
