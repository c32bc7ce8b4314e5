//! Access to the set of chunks currently held in memory.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::chunk::{Chunk, ChunkPos};

/// Source of the chunks the simulation currently has loaded.
pub trait ChunkProvider: Send + Sync {
    /// Snapshots of every loaded chunk, ready or not.
    fn loaded_chunks(&self) -> Vec<Chunk>;

    fn loaded_chunk_count(&self) -> usize {
        self.loaded_chunks().len()
    }
}

/// A plain map of loaded chunks behind a lock.
#[derive(Debug, Default)]
pub struct LoadedChunks {
    chunks: RwLock<HashMap<ChunkPos, Chunk>>,
}

impl LoadedChunks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, chunk: Chunk) {
        self.chunks.write().insert(chunk.position(), chunk);
    }

    pub fn remove(&self, pos: ChunkPos) -> Option<Chunk> {
        self.chunks.write().remove(&pos)
    }

    pub fn get(&self, pos: ChunkPos) -> Option<Chunk> {
        self.chunks.read().get(&pos).map(Chunk::snapshot)
    }

    pub fn len(&self) -> usize {
        self.chunks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.read().is_empty()
    }
}

impl ChunkProvider for LoadedChunks {
    fn loaded_chunks(&self) -> Vec<Chunk> {
        self.chunks.read().values().map(Chunk::snapshot).collect()
    }

    fn loaded_chunk_count(&self) -> usize {
        self.len()
    }
}
