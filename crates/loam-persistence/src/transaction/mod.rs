//! One background save.
//!
//! A [`SaveTransaction`] runs on the save thread and moves the save directory
//! from one consistent state to the next:
//!
//! 1. refuse to run while a promoted save is still unmerged;
//! 2. discard any staging directory left by an interrupted write;
//! 3. bring the private entity manager up to date with the recorded delta;
//! 4. assign every persistent entity to a player, a chunk or the global store;
//! 5. write all stores into the staging directory;
//! 6. rename staging to `unmerged-changes` (the commit point);
//! 7. merge the unmerged changes into the live tree under the world lock.
//!
//! A crash before step 6 leaves the previous save intact; a crash after it is
//! completed by [`SaveTransactionHelper::repair`] on the next start. The delta
//! is applied to the private manager even when a save fails, so a later save
//! still writes every change.

mod builder;
mod helper;

pub use builder::{GlobalStoreBuilder, PlayerStoreBuilder, SaveTransactionBuilder};
pub use helper::SaveTransactionHelper;
pub(crate) use helper::sync_directory;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use loam_ecs::builtin::CLIENT;
use loam_ecs::entity::EntityId;
use loam_ecs::manager::EntityManager;
use loam_manifest::manifest::GameManifest;
use loam_world::chunk::{chunk_pos_of_world, Chunk, ChunkPos};
use parking_lot::{Mutex, RwLock};

use crate::chunk_codec::{ChunkCodec, CompressedChunkBuilder};
use crate::chunk_files::{write_chunk_zip, write_file_synced};
use crate::delta::EntitySetDeltaRecorder;
use crate::error::{IoResultExt, PersistenceError};
use crate::ownership::OwnershipIndex;
use crate::paths::{chunk_file_name, chunk_zip_position, StoragePathProvider};
use crate::store::{GlobalStoreData, PlayerStoreData};

/// Everything a save writes, resolved against the private entity manager.
struct PreparedSave {
    players: Vec<(String, Arc<PlayerStoreData>)>,
    chunks: Vec<Arc<CompressedChunkBuilder>>,
    global: GlobalStoreData,
}

/// A save in flight. Built by [`SaveTransactionBuilder`].
pub struct SaveTransaction {
    private_entity_manager: Arc<Mutex<EntityManager>>,
    delta: EntitySetDeltaRecorder,
    delta_applied: bool,
    paths: StoragePathProvider,
    codec: ChunkCodec,
    world_directory_lock: Arc<RwLock<()>>,
    store_chunks_in_zips: bool,
    rename_retry_delay: Duration,
    unloaded_players: HashMap<String, Arc<PlayerStoreData>>,
    loaded_players: HashMap<String, PlayerStoreBuilder>,
    unloaded_chunks: HashMap<ChunkPos, Arc<CompressedChunkBuilder>>,
    loaded_chunks: HashMap<ChunkPos, Chunk>,
    global_store_builder: GlobalStoreBuilder,
    manifest: Option<GameManifest>,
}

impl SaveTransaction {
    /// Run the save to completion, logging the outcome.
    pub fn run(&mut self) -> Result<(), PersistenceError> {
        let started = Instant::now();
        let result = self.execute();
        match &result {
            Ok(()) => tracing::info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                players = self.loaded_players.len() + self.unloaded_players.len(),
                chunks = self.loaded_chunks.len() + self.unloaded_chunks.len(),
                "Save game finished"
            ),
            Err(e) => tracing::error!(error = %e, "Save game creation failed"),
        }
        result
    }

    fn execute(&mut self) -> Result<(), PersistenceError> {
        let helper = SaveTransactionHelper::new(self.paths.clone());
        let manager = Arc::clone(&self.private_entity_manager);
        let mut manager = manager.lock();
        if helper.has_unmerged_changes() {
            // Nothing is written, but the private manager still takes the
            // changes so the next save includes them.
            self.apply_delta(&mut manager)?;
            return Err(PersistenceError::UnmergedChangesPresent {
                path: self.paths.unmerged_changes_path(),
            });
        }
        helper.cleanup_save_transaction_directory()?;

        self.apply_delta(&mut manager)?;
        let prepared = self.prepare(&manager)?;
        drop(manager);

        self.write_staging(&prepared)?;
        self.promote()?;

        let _guard = self.world_directory_lock.write();
        helper.merge_changes()
    }

    // -- delta --------------------------------------------------------------

    /// Replay the recorded changes on the private manager. Runs at most once
    /// per transaction.
    fn apply_delta(&mut self, manager: &mut EntityManager) -> Result<(), PersistenceError> {
        if self.delta_applied {
            return Ok(());
        }
        let delta = &self.delta;

        let highest = delta
            .entity_deltas()
            .keys()
            .chain(delta.destroyed_entities())
            .map(|id| id.to_raw())
            .max();
        if let Some(highest) = highest {
            if manager.next_id() <= highest {
                manager.set_next_id(highest + 1);
            }
        }

        for (id, entity_delta) in delta.entity_deltas() {
            if manager.is_active(*id) {
                for component in entity_delta.changed_components() {
                    manager.add_component(*id, component.clone())?;
                }
                for ty in entity_delta.removed_components() {
                    manager.remove_component(*id, ty)?;
                }
            } else {
                manager.create_with_id(*id, entity_delta.changed_components().cloned())?;
            }
        }

        delta.bind_all_delayed_entity_refs_to(manager)?;

        for id in delta.destroyed_entities() {
            if manager.exists(*id) {
                manager.destroy(*id)?;
            }
        }
        for id in delta.deactivated_entities() {
            if manager.is_active(*id) {
                manager.deactivate_for_storage(*id)?;
            }
        }

        tracing::debug!(
            changed = delta.entity_deltas().len(),
            destroyed = delta.destroyed_entities().len(),
            deactivated = delta.deactivated_entities().len(),
            "Applied entity delta to private manager"
        );
        self.delta_applied = true;
        Ok(())
    }

    // -- prepare ------------------------------------------------------------

    fn prepare(&self, manager: &EntityManager) -> Result<PreparedSave, PersistenceError> {
        let index = OwnershipIndex::build(manager)?;
        let mut unsaved: BTreeSet<EntityId> = manager
            .active_entities()
            .into_iter()
            .filter(|id| manager.is_persistent(*id))
            .collect();

        let mut players = Vec::with_capacity(self.unloaded_players.len() + self.loaded_players.len());
        for (id, data) in &self.unloaded_players {
            if !self.loaded_players.contains_key(id) {
                players.push((id.clone(), Arc::clone(data)));
            }
        }
        for (id, builder) in &self.loaded_players {
            let (data, stored) = builder.build(manager, &index)?;
            unsaved.retain(|e| !stored.contains(e));
            players.push((id.clone(), Arc::new(data)));
        }

        let mut buckets = self.chunk_buckets(manager, &unsaved)?;
        let mut chunks = Vec::with_capacity(self.unloaded_chunks.len() + self.loaded_chunks.len());
        for (pos, builder) in &self.unloaded_chunks {
            if !self.loaded_chunks.contains_key(pos) {
                chunks.push(Arc::clone(builder));
            }
        }
        for (pos, chunk) in &self.loaded_chunks {
            let entities = buckets.remove(pos).unwrap_or_default();
            let builder = CompressedChunkBuilder::new(manager, &index, chunk, &entities)?;
            unsaved.retain(|e| !builder.stored_entities().contains(e));
            chunks.push(Arc::new(builder));
        }

        let global = self.global_store_builder.build(manager, &index, &unsaved)?;
        Ok(PreparedSave {
            players,
            chunks,
            global,
        })
    }

    /// Unowned, positioned entities grouped by the chunk they stand in.
    /// Always-relevant entities and clients stay global.
    fn chunk_buckets(
        &self,
        manager: &EntityManager,
        unsaved: &BTreeSet<EntityId>,
    ) -> Result<HashMap<ChunkPos, Vec<EntityId>>, PersistenceError> {
        let mut buckets: HashMap<ChunkPos, Vec<EntityId>> = HashMap::new();
        for &id in unsaved {
            if manager.is_always_relevant(id) || manager.has_component(id, &CLIENT) {
                continue;
            }
            if manager.owner_of(id)?.is_some() {
                continue;
            }
            if let Some(location) = manager.location(id) {
                buckets
                    .entry(chunk_pos_of_world(location.world_position))
                    .or_default()
                    .push(id);
            }
        }
        Ok(buckets)
    }

    // -- write --------------------------------------------------------------

    fn write_staging(&self, prepared: &PreparedSave) -> Result<(), PersistenceError> {
        let players_dir = self.paths.players_temp_path();
        let world_dir = self.paths.world_temp_path();
        fs::create_dir_all(&players_dir).at(&players_dir)?;
        fs::create_dir_all(&world_dir).at(&world_dir)?;

        for (id, data) in &prepared.players {
            let bytes = serde_json::to_vec(&**data)?;
            write_file_synced(&self.paths.player_file_temp_path(id), &bytes)?;
        }

        if self.store_chunks_in_zips {
            self.write_chunk_zips(&prepared.chunks)?;
        } else {
            for builder in &prepared.chunks {
                let bytes = builder.build_encoded_chunk(&self.codec)?;
                write_file_synced(&self.paths.chunk_temp_path(builder.pos()), &bytes)?;
            }
        }

        let global = serde_json::to_vec(&prepared.global)?;
        write_file_synced(&self.paths.global_entity_store_temp_path(), &global)?;

        if let Some(manifest) = &self.manifest {
            write_file_synced(&self.paths.game_manifest_temp_path(), &manifest.to_json_bytes()?)?;
        }

        sync_directory(&players_dir);
        sync_directory(&world_dir);
        sync_directory(&self.paths.unfinished_save_transaction_path());
        Ok(())
    }

    /// Group chunks by archive cell and rewrite each touched archive, carrying
    /// over the entries of the live archive that this save does not replace.
    fn write_chunk_zips(&self, chunks: &[Arc<CompressedChunkBuilder>]) -> Result<(), PersistenceError> {
        let mut archives: BTreeMap<ChunkPos, Vec<(String, Arc<[u8]>)>> = BTreeMap::new();
        for builder in chunks {
            let bytes = builder.build_encoded_chunk(&self.codec)?;
            archives
                .entry(chunk_zip_position(builder.pos()))
                .or_default()
                .push((chunk_file_name(builder.pos()), bytes));
        }

        for (zip_pos, entries) in &archives {
            let target = self.paths.chunk_zip_temp_path(*zip_pos);
            let previous = self.paths.chunk_zip_path(*zip_pos);
            let count = write_chunk_zip(
                &target,
                &previous,
                entries.iter().map(|(name, bytes)| (name.clone(), &bytes[..])),
            )?;
            tracing::trace!(zip = %zip_pos, entries = count, "Wrote chunk archive");
        }
        Ok(())
    }

    // -- promote ------------------------------------------------------------

    /// Rename staging to the unmerged-changes directory.
    fn promote(&self) -> Result<(), PersistenceError> {
        let from = self.paths.unfinished_save_transaction_path();
        let to = self.paths.unmerged_changes_path();
        match fs::rename(&from, &to) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                tracing::warn!("Rename of merge folder failed, retrying in one second");
                thread::sleep(self.rename_retry_delay);
                fs::rename(&from, &to).at(&to)?;
            }
            Err(e) if e.kind() == ErrorKind::Unsupported => {
                tracing::debug!(error = %e, "Directory rename unsupported, moving files");
                helper::move_directory(&from, &to)?;
            }
            Err(e) => return Err(PersistenceError::io(&to, e)),
        }
        sync_directory(self.paths.storage_path_directory());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::DeltaTracker;
    use loam_ecs::prelude::*;
    use loam_world::serializer::RunLengthChunkSerializer;

    // -- helpers --

    struct Fixture {
        dir: tempfile::TempDir,
        live: EntityManager,
        tracker: Arc<DeltaTracker>,
        private: Arc<Mutex<EntityManager>>,
        lock: Arc<RwLock<()>>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut live = EntityManager::new();
            let tracker = Arc::new(DeltaTracker::default());
            live.subscribe(tracker.clone());
            Self {
                dir: tempfile::tempdir().unwrap(),
                live,
                tracker,
                private: Arc::new(Mutex::new(EntityManager::new())),
                lock: Arc::new(RwLock::new(())),
            }
        }

        fn paths(&self) -> StoragePathProvider {
            StoragePathProvider::new(self.dir.path())
        }

        fn builder(&self) -> SaveTransactionBuilder {
            let mut builder = SaveTransactionBuilder::new(
                Arc::clone(&self.private),
                self.tracker.take(),
                self.paths(),
                ChunkCodec::new(Arc::new(RunLengthChunkSerializer), 3),
                Arc::clone(&self.lock),
            )
            .rename_retry_delay(Duration::from_millis(1));
            builder.set_global_store_builder(GlobalStoreBuilder::new(&self.live));
            builder
        }
    }

    fn read_global(paths: &StoragePathProvider) -> GlobalStoreData {
        serde_json::from_slice(&fs::read(paths.global_entity_store_path()).unwrap()).unwrap()
    }

    // -- tests --

    #[test]
    fn unplaced_entities_go_to_global_store() {
        let mut fx = Fixture::new();
        let e = fx.live.create(vec![Component::new(ComponentType::new("test:c")).with("v", 1)]);
        let transient = fx.live.create(vec![EntityInfo::transient().to_component()]);

        fx.builder().build().run().unwrap();

        let paths = fx.paths();
        let global = read_global(&paths);
        assert!(global.store.contains(e));
        assert!(!global.store.contains(transient));
        assert!(!paths.unfinished_save_transaction_path().exists());
        assert!(!paths.unmerged_changes_path().exists());
    }

    #[test]
    fn refuses_to_run_with_unmerged_changes() {
        let fx = Fixture::new();
        let paths = fx.paths();
        fs::create_dir_all(paths.unmerged_changes_path()).unwrap();
        let result = fx.builder().build().run();
        assert!(matches!(result, Err(PersistenceError::UnmergedChangesPresent { .. })));
    }

    #[test]
    fn loaded_chunk_claims_entities_inside_it() {
        let mut fx = Fixture::new();
        let inside = fx.live.create(vec![Location::new(1.0, 1.0, 1.0).to_component()]);
        let outside = fx.live.create(vec![Location::new(100.0, 1.0, 1.0).to_component()]);

        let mut chunk = Chunk::new(ChunkPos::new(0, 0, 0));
        chunk.mark_ready();
        let mut builder = fx.builder();
        builder.add_loaded_chunk(&chunk);
        builder.build().run().unwrap();

        let paths = fx.paths();
        let global = read_global(&paths);
        assert!(!global.store.contains(inside));
        assert!(global.store.contains(outside));
        assert!(paths.chunk_zip_path(ChunkPos::new(0, 0, 0)).exists());
    }

    #[test]
    fn delta_is_applied_once() {
        let mut fx = Fixture::new();
        let e = fx.live.create(vec![Component::new(ComponentType::new("test:c")).with("v", 1)]);
        let mut transaction = fx.builder().build();
        let mut manager = EntityManager::new();
        transaction.apply_delta(&mut manager).unwrap();
        manager.destroy(e).unwrap();
        transaction.apply_delta(&mut manager).unwrap();
        assert!(!manager.exists(e));
    }

    #[test]
    fn loose_chunk_files_when_zips_disabled() {
        let fx = Fixture::new();
        let mut chunk = Chunk::new(ChunkPos::new(-1, 0, 2));
        chunk.mark_ready();
        let mut builder = fx.builder().store_chunks_in_zips(false);
        builder.add_loaded_chunk(&chunk);
        builder.build().run().unwrap();
        assert!(fx.paths().chunk_path(ChunkPos::new(-1, 0, 2)).exists());
    }
}
