//! Chunk blob encoding and the lazily-compressing chunk builder.
//!
//! Blob layout:
//!
//! ```text
//! "LMCH" | version: u8 | blake3(compressed): [u8; 32] | compressed = zstd(body)
//! body = chunk_len: u32 LE | chunk bytes | entity store JSON
//! ```
//!
//! Chunk bytes come from the injected [`ChunkSerializer`]; the checksum covers
//! the compressed body so corruption is caught before decompression.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use loam_ecs::entity::EntityId;
use loam_ecs::manager::EntityManager;
use loam_ecs::EcsError;
use loam_world::chunk::{Chunk, ChunkPos};
use loam_world::serializer::ChunkSerializer;
use parking_lot::Mutex;

use crate::error::PersistenceError;
use crate::ownership::{EntityStorer, OwnershipIndex};
use crate::store::{ChunkStore, EntityStore};

const MAGIC: &[u8; 4] = b"LMCH";
const FORMAT_VERSION: u8 = 1;
const CHECKSUM_LEN: usize = 32;
const HEADER_LEN: usize = MAGIC.len() + 1 + CHECKSUM_LEN;

// ---------------------------------------------------------------------------
// ChunkCodec
// ---------------------------------------------------------------------------

/// Compresses chunks with their entities into blobs and back.
#[derive(Clone)]
pub struct ChunkCodec {
    serializer: Arc<dyn ChunkSerializer>,
    compression_level: i32,
}

impl ChunkCodec {
    pub fn new(serializer: Arc<dyn ChunkSerializer>, compression_level: i32) -> Self {
        Self {
            serializer,
            compression_level,
        }
    }

    pub fn encode(&self, chunk: &Chunk, entities: &EntityStore) -> Result<Vec<u8>, PersistenceError> {
        let pos = chunk.position();
        let chunk_bytes = self.serializer.encode(chunk);
        let entity_json = serde_json::to_vec(entities)?;
        let chunk_len =
            u32::try_from(chunk_bytes.len()).map_err(|_| PersistenceError::CorruptChunk {
                pos,
                details: format!("chunk data of {} bytes is too large", chunk_bytes.len()),
            })?;

        let mut body = Vec::with_capacity(4 + chunk_bytes.len() + entity_json.len());
        body.extend_from_slice(&chunk_len.to_le_bytes());
        body.extend_from_slice(&chunk_bytes);
        body.extend_from_slice(&entity_json);

        let compressed = zstd::encode_all(body.as_slice(), self.compression_level)
            .map_err(|source| PersistenceError::Compression { pos, source })?;
        let checksum = blake3::hash(&compressed);

        let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
        out.extend_from_slice(MAGIC);
        out.push(FORMAT_VERSION);
        out.extend_from_slice(checksum.as_bytes());
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    pub fn decode(&self, pos: ChunkPos, bytes: &[u8]) -> Result<ChunkStore, PersistenceError> {
        let corrupt = |details: String| PersistenceError::CorruptChunk { pos, details };

        if bytes.len() < HEADER_LEN {
            return Err(corrupt(format!("blob of {} bytes is shorter than its header", bytes.len())));
        }
        if &bytes[..MAGIC.len()] != MAGIC {
            return Err(corrupt("bad magic".to_owned()));
        }
        let version = bytes[MAGIC.len()];
        if version != FORMAT_VERSION {
            return Err(corrupt(format!("unsupported format version {version}")));
        }
        let expected = &bytes[MAGIC.len() + 1..HEADER_LEN];
        let compressed = &bytes[HEADER_LEN..];
        let actual = blake3::hash(compressed);
        if actual.as_bytes().as_slice() != expected {
            return Err(corrupt(format!("checksum mismatch, found {}", actual.to_hex())));
        }

        let body = zstd::decode_all(compressed).map_err(|e| corrupt(format!("zstd: {e}")))?;
        if body.len() < 4 {
            return Err(corrupt("truncated body".to_owned()));
        }
        let chunk_len = u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as usize;
        let chunk_end = 4usize
            .checked_add(chunk_len)
            .filter(|end| *end <= body.len())
            .ok_or_else(|| corrupt(format!("chunk length {chunk_len} exceeds body")))?;

        let chunk = self.serializer.decode(pos, &body[4..chunk_end])?;
        let entities: EntityStore = serde_json::from_slice(&body[chunk_end..])?;
        Ok(ChunkStore::new(pos, chunk, entities))
    }
}

impl fmt::Debug for ChunkCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkCodec")
            .field("compression_level", &self.compression_level)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// CompressedChunkBuilder
// ---------------------------------------------------------------------------

/// A chunk and the entities stored with it, compressed on first request.
///
/// Entities are serialized when the builder is created, so later changes to
/// the source manager do not leak in. [`build_encoded_chunk`] is idempotent:
/// the blob is computed once and shared afterwards.
///
/// [`build_encoded_chunk`]: CompressedChunkBuilder::build_encoded_chunk
pub struct CompressedChunkBuilder {
    chunk: Chunk,
    entity_store: EntityStore,
    stored_entities: BTreeSet<EntityId>,
    encoded: Mutex<Option<Arc<[u8]>>>,
}

impl CompressedChunkBuilder {
    /// Snapshot `chunk` and serialize `entities` (with their ownership
    /// closures) out of `manager`.
    pub fn new(
        manager: &EntityManager,
        index: &OwnershipIndex,
        chunk: &Chunk,
        entities: &[EntityId],
    ) -> Result<Self, EcsError> {
        let mut storer = EntityStorer::new(manager, index);
        for id in entities {
            storer.store(*id, None)?;
        }
        let (entity_store, stored_entities) = storer.finish();
        Ok(Self {
            chunk: chunk.snapshot(),
            entity_store,
            stored_entities,
            encoded: Mutex::new(None),
        })
    }

    pub fn pos(&self) -> ChunkPos {
        self.chunk.position()
    }

    pub fn entity_store(&self) -> &EntityStore {
        &self.entity_store
    }

    /// Every entity written into this chunk's store.
    pub fn stored_entities(&self) -> &BTreeSet<EntityId> {
        &self.stored_entities
    }

    /// The compressed blob, built on first call.
    pub fn build_encoded_chunk(&self, codec: &ChunkCodec) -> Result<Arc<[u8]>, PersistenceError> {
        let mut encoded = self.encoded.lock();
        if let Some(bytes) = encoded.as_ref() {
            return Ok(Arc::clone(bytes));
        }
        let bytes: Arc<[u8]> = codec.encode(&self.chunk, &self.entity_store)?.into();
        *encoded = Some(Arc::clone(&bytes));
        Ok(bytes)
    }

    /// This builder's contents as a [`ChunkStore`], skipping compression.
    pub fn to_chunk_store(&self) -> ChunkStore {
        ChunkStore::new(self.pos(), self.chunk.snapshot(), self.entity_store.clone())
    }
}

impl fmt::Debug for CompressedChunkBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressedChunkBuilder")
            .field("pos", &self.pos())
            .field("entities", &self.stored_entities.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loam_ecs::prelude::*;
    use loam_world::serializer::RunLengthChunkSerializer;

    fn codec() -> ChunkCodec {
        ChunkCodec::new(Arc::new(RunLengthChunkSerializer), 3)
    }

    fn sample_chunk() -> Chunk {
        let mut chunk = Chunk::new(ChunkPos::new(0, 0, 0));
        chunk.set_block(3, 3, 3, 9);
        chunk.mark_ready();
        chunk
    }

    fn chunk_with_entity() -> (EntityManager, CompressedChunkBuilder, EntityId) {
        let mut manager = EntityManager::new();
        let e = manager.create(vec![
            Location::new(1.0, 1.0, 1.0).to_component(),
            Component::new(ComponentType::new("test:c")).with("value", 1),
        ]);
        let index = OwnershipIndex::build(&manager).unwrap();
        let builder = CompressedChunkBuilder::new(&manager, &index, &sample_chunk(), &[e]).unwrap();
        (manager, builder, e)
    }

    #[test]
    fn blob_decodes_to_same_chunk_and_entities() {
        let (_, builder, e) = chunk_with_entity();
        let bytes = builder.build_encoded_chunk(&codec()).unwrap();
        let store = codec().decode(ChunkPos::new(0, 0, 0), &bytes).unwrap();
        assert_eq!(store.chunk().block(3, 3, 3), 9);
        assert!(store.entity_store().contains(e));
    }

    #[test]
    fn build_is_idempotent_and_cached() {
        let (_, builder, _) = chunk_with_entity();
        let first = builder.build_encoded_chunk(&codec()).unwrap();
        let second = builder.build_encoded_chunk(&codec()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn builder_is_isolated_from_later_changes() {
        let (mut manager, builder, e) = chunk_with_entity();
        manager
            .add_component(e, Component::new(ComponentType::new("test:c")).with("value", 2))
            .unwrap();
        let data = builder.entity_store().entity(e).unwrap();
        let c = data.component(&ComponentType::new("test:c")).unwrap();
        assert_eq!(c.fields["value"], StoredValue::Int(1));
    }

    #[test]
    fn corruption_is_detected() {
        let (_, builder, _) = chunk_with_entity();
        let mut bytes = builder.build_encoded_chunk(&codec()).unwrap().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(
            codec().decode(ChunkPos::new(0, 0, 0), &bytes),
            Err(PersistenceError::CorruptChunk { .. })
        ));
        assert!(matches!(
            codec().decode(ChunkPos::new(0, 0, 0), b"LMC"),
            Err(PersistenceError::CorruptChunk { .. })
        ));
        assert!(matches!(
            codec().decode(ChunkPos::new(0, 0, 0), &[0u8; 64]),
            Err(PersistenceError::CorruptChunk { .. })
        ));
    }
}
