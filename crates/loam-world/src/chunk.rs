//! Chunk positions, block-to-chunk math, and the [`Chunk`] block store.
//!
//! A chunk covers [`CHUNK_SIZE_X`] × [`CHUNK_SIZE_Y`] × [`CHUNK_SIZE_Z`]
//! blocks. Block storage is copy-on-write: [`Chunk::snapshot`] is an `Arc`
//! clone, and the first subsequent write on either side copies the array.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::WorldError;

pub const CHUNK_SIZE_X: i32 = 32;
pub const CHUNK_SIZE_Y: i32 = 64;
pub const CHUNK_SIZE_Z: i32 = 32;
/// Number of blocks in one chunk.
pub const CHUNK_VOLUME: usize = (CHUNK_SIZE_X * CHUNK_SIZE_Y * CHUNK_SIZE_Z) as usize;

/// Numeric block type. `0` is air.
pub type BlockId = u16;

// ---------------------------------------------------------------------------
// ChunkPos
// ---------------------------------------------------------------------------

/// Position of a chunk on the chunk grid.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ChunkPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Position of the cell containing this chunk on a coarser grid of
    /// `cell`-sized cubes. Rounds toward negative infinity.
    pub fn grid_cell(self, cell: i32) -> ChunkPos {
        ChunkPos {
            x: self.x.div_euclid(cell),
            y: self.y.div_euclid(cell),
            z: self.z.div_euclid(cell),
        }
    }

    /// Lowest world block coordinate covered by this chunk.
    pub fn min_block(self) -> [i32; 3] {
        [
            self.x * CHUNK_SIZE_X,
            self.y * CHUNK_SIZE_Y,
            self.z * CHUNK_SIZE_Z,
        ]
    }
}

impl fmt::Debug for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkPos({}, {}, {})", self.x, self.y, self.z)
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.x, self.y, self.z)
    }
}

/// Chunk holding the world block at `(x, y, z)`.
pub fn chunk_pos_of_block(x: i32, y: i32, z: i32) -> ChunkPos {
    ChunkPos {
        x: x.div_euclid(CHUNK_SIZE_X),
        y: y.div_euclid(CHUNK_SIZE_Y),
        z: z.div_euclid(CHUNK_SIZE_Z),
    }
}

/// Chunk holding a floating-point world position. Each axis is floored
/// first, so `-0.5` lands in chunk `-1`.
pub fn chunk_pos_of_world(pos: [f32; 3]) -> ChunkPos {
    chunk_pos_of_block(
        pos[0].floor() as i32,
        pos[1].floor() as i32,
        pos[2].floor() as i32,
    )
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// Block data of one chunk.
#[derive(Clone)]
pub struct Chunk {
    position: ChunkPos,
    blocks: Arc<Vec<BlockId>>,
    ready: bool,
}

impl Chunk {
    /// An all-air chunk that is not yet ready.
    pub fn new(position: ChunkPos) -> Self {
        Self {
            position,
            blocks: Arc::new(vec![0; CHUNK_VOLUME]),
            ready: false,
        }
    }

    /// Rebuild a chunk from a full block array, e.g. after decoding.
    pub fn from_blocks(position: ChunkPos, blocks: Vec<BlockId>) -> Result<Self, WorldError> {
        if blocks.len() != CHUNK_VOLUME {
            return Err(WorldError::InvalidChunkData {
                pos: position,
                details: format!("expected {CHUNK_VOLUME} blocks, got {}", blocks.len()),
            });
        }
        Ok(Self {
            position,
            blocks: Arc::new(blocks),
            ready: true,
        })
    }

    pub fn position(&self) -> ChunkPos {
        self.position
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// Block at chunk-local coordinates. Out-of-range coordinates read as air.
    pub fn block(&self, x: i32, y: i32, z: i32) -> BlockId {
        Self::index(x, y, z).map_or(0, |i| self.blocks[i])
    }

    /// Set a block at chunk-local coordinates. Out-of-range writes are ignored.
    pub fn set_block(&mut self, x: i32, y: i32, z: i32, block: BlockId) {
        if let Some(i) = Self::index(x, y, z) {
            Arc::make_mut(&mut self.blocks)[i] = block;
        }
    }

    /// Cheap point-in-time copy; later writes to `self` do not affect it.
    pub fn snapshot(&self) -> Chunk {
        self.clone()
    }

    /// Whether a world position lies inside this chunk's bounds.
    pub fn contains_world_pos(&self, pos: [f32; 3]) -> bool {
        chunk_pos_of_world(pos) == self.position
    }

    fn index(x: i32, y: i32, z: i32) -> Option<usize> {
        let inside = (0..CHUNK_SIZE_X).contains(&x)
            && (0..CHUNK_SIZE_Y).contains(&y)
            && (0..CHUNK_SIZE_Z).contains(&z);
        inside.then(|| (x + CHUNK_SIZE_X * (z + CHUNK_SIZE_Z * y)) as usize)
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("position", &self.position)
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Chunk {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position && self.blocks == other.blocks
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
