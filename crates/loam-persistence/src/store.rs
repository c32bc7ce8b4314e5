//! On-disk store formats and the handles returned by the load path.
//!
//! Every store wraps an [`EntityStore`]: a flat list of serialized entities
//! plus a few well-known names (a player's `"character"`). Stores are JSON;
//! chunk stores are additionally compressed by the
//! [`chunk_codec`](crate::chunk_codec).

use std::collections::BTreeMap;

use loam_ecs::entity::EntityId;
use loam_ecs::manager::EntityManager;
use loam_ecs::serializer::{EntityData, EntitySerializer};
use loam_ecs::EcsError;
use loam_world::chunk::{Chunk, ChunkPos};
use serde::{Deserialize, Serialize};

/// Name under which a player's character entity is stored.
pub const CHARACTER: &str = "character";

// ---------------------------------------------------------------------------
// EntityStore
// ---------------------------------------------------------------------------

/// A set of serialized entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityStore {
    pub entities: Vec<EntityData>,
    #[serde(default)]
    pub names: BTreeMap<String, EntityId>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity(&self, id: EntityId) -> Option<&EntityData> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entity(id).is_some()
    }

    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.iter().map(|e| e.id)
    }

    pub fn named(&self, name: &str) -> Option<EntityId> {
        self.names.get(name).copied()
    }

    /// Recreate (or reactivate) every stored entity in `manager` under its
    /// stored id.
    pub fn restore_entities(&self, manager: &mut EntityManager) -> Result<Vec<EntityId>, EcsError> {
        let serializer = EntitySerializer::new();
        let mut restored = Vec::with_capacity(self.entities.len());
        for data in &self.entities {
            let (id, components) = serializer.deserialize(data);
            manager.restore_entity(id, components)?;
            restored.push(id);
        }
        Ok(restored)
    }
}

// ---------------------------------------------------------------------------
// Player store
// ---------------------------------------------------------------------------

/// Serialized form of `players/<id>.player`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStoreData {
    /// Where the world must be loaded around the player before restoring.
    pub relevance_location: [f32; 3],
    pub has_character: bool,
    pub store: EntityStore,
}

impl PlayerStoreData {
    /// The store of a player that has never been saved.
    pub fn empty() -> Self {
        Self {
            relevance_location: [0.0, 0.0, 0.0],
            has_character: false,
            store: EntityStore::new(),
        }
    }
}

/// A player's saved state, as returned by
/// [`StorageManager::load_player_store`](crate::manager::StorageManager::load_player_store).
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStore {
    id: String,
    data: PlayerStoreData,
}

impl PlayerStore {
    pub fn new(id: impl Into<String>, data: PlayerStoreData) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn relevance_location(&self) -> [f32; 3] {
        self.data.relevance_location
    }

    pub fn has_character(&self) -> bool {
        self.data.has_character
    }

    pub fn data(&self) -> &PlayerStoreData {
        &self.data
    }

    /// Restore the player's entities. Returns the character, if one was
    /// stored.
    pub fn restore_entities(&self, manager: &mut EntityManager) -> Result<Option<EntityId>, EcsError> {
        self.data.store.restore_entities(manager)?;
        if !self.data.has_character {
            return Ok(None);
        }
        Ok(self
            .data
            .store
            .named(CHARACTER)
            .filter(|id| manager.is_active(*id)))
    }
}

// ---------------------------------------------------------------------------
// Global store
// ---------------------------------------------------------------------------

/// Serialized form of `global.dat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalStoreData {
    /// Lower bound for the entity id counter after loading.
    pub next_entity_id: u64,
    /// Prefab URIs referenced by any entity at save time.
    pub prefabs: Vec<String>,
    pub store: EntityStore,
}

// ---------------------------------------------------------------------------
// Chunk store
// ---------------------------------------------------------------------------

/// A chunk read back from disk together with the entities stored in it.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    pos: ChunkPos,
    chunk: Chunk,
    entity_store: EntityStore,
}

impl ChunkStore {
    pub fn new(pos: ChunkPos, chunk: Chunk, entity_store: EntityStore) -> Self {
        Self {
            pos,
            chunk,
            entity_store,
        }
    }

    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn into_chunk(self) -> Chunk {
        self.chunk
    }

    pub fn entity_store(&self) -> &EntityStore {
        &self.entity_store
    }

    pub fn restore_entities(&self, manager: &mut EntityManager) -> Result<Vec<EntityId>, EcsError> {
        self.entity_store.restore_entities(manager)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
