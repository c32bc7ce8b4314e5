//! Assembly of a [`SaveTransaction`] on the simulation thread.
//!
//! The builder only collects what the writer needs: the consumed delta
//! recorder, snapshots of loaded chunks, the characters of connected players,
//! evicted chunk/player stores, the live id counter, and the manifest. All
//! serialization against the private entity manager happens on the save
//! thread.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use loam_ecs::entity::EntityId;
use loam_ecs::manager::EntityManager;
use loam_ecs::EcsError;
use loam_manifest::manifest::GameManifest;
use loam_world::chunk::{Chunk, ChunkPos};
use parking_lot::{Mutex, RwLock};

use crate::chunk_codec::{ChunkCodec, CompressedChunkBuilder};
use crate::delta::EntitySetDeltaRecorder;
use crate::ownership::{EntityStorer, OwnershipIndex};
use crate::paths::StoragePathProvider;
use crate::store::{GlobalStoreData, PlayerStoreData, CHARACTER};
use crate::transaction::SaveTransaction;

// ---------------------------------------------------------------------------
// PlayerStoreBuilder
// ---------------------------------------------------------------------------

/// A connected player whose store is built on the save thread.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStoreBuilder {
    character: Option<EntityId>,
    relevance_location: [f32; 3],
}

impl PlayerStoreBuilder {
    pub fn new(character: Option<EntityId>, relevance_location: [f32; 3]) -> Self {
        Self {
            character,
            relevance_location,
        }
    }

    /// Store the character and its ownership closure. A player without a
    /// character (or whose character is gone) gets an empty store.
    pub fn build(
        &self,
        manager: &EntityManager,
        index: &OwnershipIndex,
    ) -> Result<(PlayerStoreData, BTreeSet<EntityId>), EcsError> {
        let mut storer = EntityStorer::new(manager, index);
        if let Some(character) = self.character {
            storer.store(character, Some(CHARACTER))?;
        }
        let (store, stored) = storer.finish();
        let data = PlayerStoreData {
            relevance_location: self.relevance_location,
            has_character: store.named(CHARACTER).is_some(),
            store,
        };
        Ok((data, stored))
    }
}

// ---------------------------------------------------------------------------
// GlobalStoreBuilder
// ---------------------------------------------------------------------------

/// Collects every persistent entity no player or chunk claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalStoreBuilder {
    next_entity_id: u64,
}

impl GlobalStoreBuilder {
    /// Capture the id counter of the live manager.
    pub fn new(live: &EntityManager) -> Self {
        Self {
            next_entity_id: live.next_id(),
        }
    }

    pub fn build(
        &self,
        manager: &EntityManager,
        index: &OwnershipIndex,
        unsaved: &BTreeSet<EntityId>,
    ) -> Result<GlobalStoreData, EcsError> {
        let mut storer = EntityStorer::new(manager, index);
        for id in unsaved {
            storer.store_single(*id)?;
        }
        let (store, _) = storer.finish();

        let prefabs: BTreeSet<String> = manager
            .active_entities()
            .into_iter()
            .filter_map(|id| manager.entity_info(id).parent_prefab)
            .collect();

        Ok(GlobalStoreData {
            next_entity_id: self.next_entity_id.max(manager.next_id()),
            prefabs: prefabs.into_iter().collect(),
            store,
        })
    }
}

// ---------------------------------------------------------------------------
// SaveTransactionBuilder
// ---------------------------------------------------------------------------

/// Collects the inputs of one save.
pub struct SaveTransactionBuilder {
    private_entity_manager: Arc<Mutex<EntityManager>>,
    delta: EntitySetDeltaRecorder,
    paths: StoragePathProvider,
    codec: ChunkCodec,
    world_directory_lock: Arc<RwLock<()>>,
    store_chunks_in_zips: bool,
    rename_retry_delay: Duration,
    unloaded_players: HashMap<String, Arc<PlayerStoreData>>,
    loaded_players: HashMap<String, PlayerStoreBuilder>,
    unloaded_chunks: HashMap<ChunkPos, Arc<CompressedChunkBuilder>>,
    loaded_chunks: HashMap<ChunkPos, Chunk>,
    global_store_builder: Option<GlobalStoreBuilder>,
    manifest: Option<GameManifest>,
}

impl SaveTransactionBuilder {
    pub fn new(
        private_entity_manager: Arc<Mutex<EntityManager>>,
        delta: EntitySetDeltaRecorder,
        paths: StoragePathProvider,
        codec: ChunkCodec,
        world_directory_lock: Arc<RwLock<()>>,
    ) -> Self {
        Self {
            private_entity_manager,
            delta,
            paths,
            codec,
            world_directory_lock,
            store_chunks_in_zips: true,
            rename_retry_delay: Duration::from_secs(1),
            unloaded_players: HashMap::new(),
            loaded_players: HashMap::new(),
            unloaded_chunks: HashMap::new(),
            loaded_chunks: HashMap::new(),
            global_store_builder: None,
            manifest: None,
        }
    }

    pub fn store_chunks_in_zips(mut self, enabled: bool) -> Self {
        self.store_chunks_in_zips = enabled;
        self
    }

    pub fn rename_retry_delay(mut self, delay: Duration) -> Self {
        self.rename_retry_delay = delay;
        self
    }

    pub fn add_unloaded_player(&mut self, id: impl Into<String>, store: Arc<PlayerStoreData>) {
        self.unloaded_players.insert(id.into(), store);
    }

    pub fn add_loaded_player(&mut self, id: impl Into<String>, builder: PlayerStoreBuilder) {
        self.loaded_players.insert(id.into(), builder);
    }

    pub fn add_unloaded_chunk(&mut self, builder: Arc<CompressedChunkBuilder>) {
        self.unloaded_chunks.insert(builder.pos(), builder);
    }

    /// Register a loaded chunk; its snapshot is taken here.
    pub fn add_loaded_chunk(&mut self, chunk: &Chunk) {
        self.loaded_chunks.insert(chunk.position(), chunk.snapshot());
    }

    pub fn set_global_store_builder(&mut self, builder: GlobalStoreBuilder) {
        self.global_store_builder = Some(builder);
    }

    pub fn set_manifest(&mut self, manifest: GameManifest) {
        self.manifest = Some(manifest);
    }

    pub fn build(self) -> SaveTransaction {
        let global_store_builder = self.global_store_builder.unwrap_or_default();
        SaveTransaction {
            private_entity_manager: self.private_entity_manager,
            delta: self.delta,
            delta_applied: false,
            paths: self.paths,
            codec: self.codec,
            world_directory_lock: self.world_directory_lock,
            store_chunks_in_zips: self.store_chunks_in_zips,
            rename_retry_delay: self.rename_retry_delay,
            unloaded_players: self.unloaded_players,
            loaded_players: self.loaded_players,
            unloaded_chunks: self.unloaded_chunks,
            loaded_chunks: self.loaded_chunks,
            global_store_builder,
            manifest: self.manifest,
        }
    }
}

impl Default for GlobalStoreBuilder {
    fn default() -> Self {
        Self { next_entity_id: 1 }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loam_ecs::prelude::*;

    #[test]
    fn player_without_character_gets_empty_store() {
        let manager = EntityManager::new();
        let index = OwnershipIndex::build(&manager).unwrap();
        let (data, stored) = PlayerStoreBuilder::new(None, [1.0, 2.0, 3.0])
            .build(&manager, &index)
            .unwrap();
        assert!(!data.has_character);
        assert!(data.store.is_empty());
        assert!(stored.is_empty());
        assert_eq!(data.relevance_location, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn player_store_claims_closure() {
        let mut manager = EntityManager::new();
        let character = manager.create(Vec::new());
        let item = manager.create(vec![EntityInfo::owned_by(character).to_component()]);
        let index = OwnershipIndex::build(&manager).unwrap();
        let (data, stored) = PlayerStoreBuilder::new(Some(character), [0.0; 3])
            .build(&manager, &index)
            .unwrap();
        assert!(data.has_character);
        assert_eq!(stored, BTreeSet::from([character, item]));
    }

    #[test]
    fn global_store_lists_prefabs_and_id_counter() {
        let mut live = EntityManager::new();
        for _ in 0..10 {
            live.create(Vec::new());
        }
        let builder = GlobalStoreBuilder::new(&live);

        let mut private = EntityManager::new();
        let with_prefab = EntityInfo {
            parent_prefab: Some("core:chest".to_owned()),
            ..EntityInfo::default()
        };
        let a = private.create(vec![with_prefab.to_component()]);
        let b = private.create(vec![with_prefab.to_component()]);
        let index = OwnershipIndex::build(&private).unwrap();

        let global = builder
            .build(&private, &index, &BTreeSet::from([a]))
            .unwrap();
        assert_eq!(global.next_entity_id, 11);
        assert_eq!(global.prefabs, vec!["core:chest".to_owned()]);
        assert!(global.store.contains(a));
        assert!(!global.store.contains(b));
    }
}
