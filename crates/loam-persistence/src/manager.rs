//! The storage manager: save scheduling, eviction and the load path.
//!
//! The simulation thread owns the [`StorageManager`] and calls
//! [`update`](StorageManager::update) once per tick. A save moves through
//! `Idle -> SaveRequested/AutoSaveDue -> Saving -> Idle`; at most one writer thread exists
//! at a time. Chunks and players evicted between saves are kept in memory,
//! already serialized, until a save claims them.
//!
//! ```text
//!   evict ──> unsaved ──(save starts)──> saving ──(save done)──> dropped
//!                ^                          |
//!                └────(save failed)─────────┘
//! ```

use std::fs;
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use dashmap::DashMap;
use loam_ecs::builtin::{Client, CLIENT};
use loam_ecs::entity::EntityId;
use loam_ecs::manager::EntityManager;
use loam_manifest::manifest::ManifestProvider;
use loam_world::chunk::{Chunk, ChunkPos};
use loam_world::provider::ChunkProvider;
use loam_world::serializer::ChunkSerializer;
use parking_lot::{Mutex, RwLock};

use crate::chunk_codec::{ChunkCodec, CompressedChunkBuilder};
use crate::chunk_files::{read_optional, read_zip_entry};
use crate::config::StorageConfig;
use crate::delta::DeltaTracker;
use crate::error::{IoResultExt, PersistenceError};
use crate::ownership::{deactivate_or_destroy, OwnershipIndex};
use crate::paths::{chunk_file_name, chunk_zip_position, StoragePathProvider};
use crate::preview::PreviewImages;
use crate::providers::{ClientProvider, ConnectedPlayer, SaveObserver};
use crate::store::{ChunkStore, GlobalStoreData, PlayerStore, PlayerStoreData};
use crate::transaction::{
    GlobalStoreBuilder, PlayerStoreBuilder, SaveTransactionBuilder, SaveTransactionHelper,
};

const SAVE_THREAD_NAME: &str = "saving";

// ---------------------------------------------------------------------------
// StorageState
// ---------------------------------------------------------------------------

/// Where the manager is in its save cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageState {
    Idle,
    /// A manual save starts at the next [`update`](StorageManager::update).
    SaveRequested,
    /// The auto-save interval or the unloaded-chunk threshold has been
    /// reached; the next `update` starts an auto-save.
    AutoSaveDue,
    Saving,
}

/// When the next timed auto-save is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AutoSaveTimer {
    /// Scheduled on the first check.
    Unscheduled,
    At(Instant),
    /// The interval does not fit in an `Instant`; only the unloaded-chunk
    /// threshold triggers auto-saves.
    Never,
}

// ---------------------------------------------------------------------------
// UnloadedStores
// ---------------------------------------------------------------------------

/// Evicted chunks and players, shared between the simulation thread, the
/// writer thread and any readers.
#[derive(Debug, Default)]
struct UnloadedStores {
    unsaved_chunks: DashMap<ChunkPos, Arc<CompressedChunkBuilder>>,
    saving_chunks: DashMap<ChunkPos, Arc<CompressedChunkBuilder>>,
    unsaved_players: DashMap<String, Arc<PlayerStoreData>>,
    saving_players: DashMap<String, Arc<PlayerStoreData>>,
}

type ClaimedStores = (Vec<Arc<CompressedChunkBuilder>>, Vec<(String, Arc<PlayerStoreData>)>);

impl UnloadedStores {
    /// Move every unsaved entry to the saving maps and return them.
    ///
    /// Each entry is copied into the saving map before it leaves the unsaved
    /// one, so a reader always finds it in at least one of them. The unsaved
    /// entry is only removed if it is still the claimed one: an eviction that
    /// replaced it in between stays unsaved and goes into the next save.
    fn claim_for_saving(&self) -> ClaimedStores {
        let chunks = transfer(&self.unsaved_chunks, &self.saving_chunks)
            .into_iter()
            .map(|(_, builder)| builder)
            .collect();
        let players = transfer(&self.unsaved_players, &self.saving_players);
        (chunks, players)
    }

    /// The claimed entries are on disk now.
    fn save_complete(&self) {
        self.saving_chunks.clear();
        self.saving_players.clear();
    }

    /// Put claimed entries back, unless a newer eviction replaced them.
    fn save_failed(&self) {
        restore(&self.saving_chunks, &self.unsaved_chunks);
        restore(&self.saving_players, &self.unsaved_players);
    }

    fn clear(&self) {
        self.unsaved_chunks.clear();
        self.saving_chunks.clear();
        self.unsaved_players.clear();
        self.saving_players.clear();
    }

    fn chunk(&self, pos: ChunkPos) -> Option<Arc<CompressedChunkBuilder>> {
        self.unsaved_chunks
            .get(&pos)
            .or_else(|| self.saving_chunks.get(&pos))
            .map(|entry| Arc::clone(entry.value()))
    }

    fn player(&self, id: &str) -> Option<Arc<PlayerStoreData>> {
        self.unsaved_players
            .get(id)
            .or_else(|| self.saving_players.get(id))
            .map(|entry| Arc::clone(entry.value()))
    }
}

/// Copy every entry of `from` into `to`, then drop it from `from` if nobody
/// replaced it meanwhile. Returns the copied entries.
fn transfer<K, V>(from: &DashMap<K, Arc<V>>, to: &DashMap<K, Arc<V>>) -> Vec<(K, Arc<V>)>
where
    K: Eq + Hash + Clone,
{
    let claimed: Vec<(K, Arc<V>)> = from
        .iter()
        .map(|e| (e.key().clone(), Arc::clone(e.value())))
        .collect();
    for (key, value) in &claimed {
        to.insert(key.clone(), Arc::clone(value));
        from.remove_if(key, |_, current| Arc::ptr_eq(current, value));
    }
    claimed
}

/// Move entries of `saving` back into `unsaved`. A key already present in
/// `unsaved` holds a newer eviction and is kept.
fn restore<K, V>(saving: &DashMap<K, Arc<V>>, unsaved: &DashMap<K, Arc<V>>)
where
    K: Eq + Hash + Clone,
{
    let claimed: Vec<(K, Arc<V>)> = saving
        .iter()
        .map(|e| (e.key().clone(), Arc::clone(e.value())))
        .collect();
    for (key, value) in claimed {
        unsaved
            .entry(key.clone())
            .or_insert_with(|| Arc::clone(&value));
        saving.remove_if(&key, |_, current| Arc::ptr_eq(current, &value));
    }
}

// ---------------------------------------------------------------------------
// StorageReader
// ---------------------------------------------------------------------------

/// The read path, cloneable into chunk-loading threads.
///
/// Lookups check evicted stores in memory first, then the disk under the
/// shared side of the world-directory lock. Read failures are logged and
/// reported as missing.
#[derive(Debug, Clone)]
pub struct StorageReader {
    paths: StoragePathProvider,
    stores: Arc<UnloadedStores>,
    codec: ChunkCodec,
    world_directory_lock: Arc<RwLock<()>>,
    store_chunks_in_zips: bool,
}

impl StorageReader {
    pub fn load_chunk_store(&self, pos: ChunkPos) -> Option<ChunkStore> {
        if let Some(builder) = self.stores.chunk(pos) {
            return Some(builder.to_chunk_store());
        }
        let bytes = match self.read_chunk_bytes(pos) {
            Ok(bytes) => bytes?,
            Err(e) => {
                tracing::error!(chunk = %pos, error = %e, "Failed to read chunk");
                return None;
            }
        };
        match self.codec.decode(pos, &bytes) {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::error!(chunk = %pos, error = %e, "Failed to decode chunk");
                None
            }
        }
    }

    /// The store of `player_id`, or an empty store for an unknown player.
    pub fn load_player_store(&self, player_id: &str) -> PlayerStore {
        if let Some(data) = self.stores.player(player_id) {
            return PlayerStore::new(player_id, data.as_ref().clone());
        }
        let data = match self.read_player_data(player_id) {
            Ok(data) => data.unwrap_or_else(PlayerStoreData::empty),
            Err(e) => {
                tracing::error!(player = player_id, error = %e, "Failed to load player store");
                PlayerStoreData::empty()
            }
        };
        PlayerStore::new(player_id, data)
    }

    pub fn load_global_store_data(&self) -> Result<Option<GlobalStoreData>, PersistenceError> {
        let path = self.paths.global_entity_store_path();
        let bytes = {
            let _guard = self.world_directory_lock.read();
            read_optional(&path)?
        };
        bytes
            .map(|bytes| serde_json::from_slice(&bytes).map_err(PersistenceError::from))
            .transpose()
    }

    fn read_chunk_bytes(&self, pos: ChunkPos) -> Result<Option<Vec<u8>>, PersistenceError> {
        let _guard = self.world_directory_lock.read();
        if self.store_chunks_in_zips {
            let zip = self.paths.chunk_zip_path(chunk_zip_position(pos));
            read_zip_entry(&zip, &chunk_file_name(pos))
        } else {
            read_optional(&self.paths.chunk_path(pos))
        }
    }

    fn read_player_data(&self, player_id: &str) -> Result<Option<PlayerStoreData>, PersistenceError> {
        let bytes = {
            let _guard = self.world_directory_lock.read();
            read_optional(&self.paths.player_file_path(player_id))?
        };
        Ok(bytes.map(|b| serde_json::from_slice(&b)).transpose()?)
    }
}

// ---------------------------------------------------------------------------
// StorageManager
// ---------------------------------------------------------------------------

/// Collaborators the manager consults when building a snapshot.
pub struct StorageProviders {
    pub chunks: Arc<dyn ChunkProvider>,
    pub clients: Arc<dyn ClientProvider>,
    pub manifest: Arc<dyn ManifestProvider>,
    pub chunk_serializer: Arc<dyn ChunkSerializer>,
}

/// Schedules saves and serves evicted state back to the simulation.
pub struct StorageManager {
    config: StorageConfig,
    paths: StoragePathProvider,
    reader: StorageReader,
    stores: Arc<UnloadedStores>,
    tracker: Arc<DeltaTracker>,
    private_entity_manager: Arc<Mutex<EntityManager>>,
    world_directory_lock: Arc<RwLock<()>>,
    codec: ChunkCodec,
    providers: StorageProviders,
    observers: Vec<Arc<dyn SaveObserver>>,
    previews: PreviewImages,
    writer: Option<JoinHandle<Result<(), PersistenceError>>>,
    save_requested: bool,
    next_auto_save: AutoSaveTimer,
}

impl StorageManager {
    /// Create the manager for the save at `root` and start tracking changes
    /// of `entity_manager`.
    pub fn new(
        root: impl Into<PathBuf>,
        config: StorageConfig,
        entity_manager: &mut EntityManager,
        providers: StorageProviders,
    ) -> Result<Self, PersistenceError> {
        let paths = StoragePathProvider::new(root);
        let dir = paths.storage_path_directory();
        fs::create_dir_all(dir).at(dir)?;

        let tracker = Arc::new(DeltaTracker::default());
        entity_manager.subscribe(tracker.clone());

        let stores = Arc::new(UnloadedStores::default());
        let world_directory_lock = Arc::new(RwLock::new(()));
        let codec = ChunkCodec::new(
            Arc::clone(&providers.chunk_serializer),
            config.compression_level,
        );
        let reader = StorageReader {
            paths: paths.clone(),
            stores: Arc::clone(&stores),
            codec: codec.clone(),
            world_directory_lock: Arc::clone(&world_directory_lock),
            store_chunks_in_zips: config.store_chunks_in_zips,
        };
        let previews = PreviewImages::new(paths.clone(), config.preview_count);

        tracing::debug!(root = %dir.display(), zips = config.store_chunks_in_zips, "Storage manager ready");
        Ok(Self {
            config,
            paths,
            reader,
            stores,
            tracker,
            private_entity_manager: Arc::new(Mutex::new(EntityManager::new())),
            world_directory_lock,
            codec,
            providers,
            observers: Vec::new(),
            previews,
            writer: None,
            save_requested: false,
            next_auto_save: AutoSaveTimer::Unscheduled,
        })
    }

    pub fn add_save_observer(&mut self, observer: Arc<dyn SaveObserver>) {
        self.observers.push(observer);
    }

    /// A cloneable handle to the load path.
    pub fn reader(&self) -> StorageReader {
        self.reader.clone()
    }

    pub fn is_store_chunks_in_zips(&self) -> bool {
        self.config.store_chunks_in_zips
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    // -- save cycle ---------------------------------------------------------

    /// Ask for a save at the next [`update`](Self::update).
    pub fn request_saving(&mut self) {
        self.save_requested = true;
    }

    pub fn is_saving(&self) -> bool {
        self.writer.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn state(&self) -> StorageState {
        if self.is_saving() {
            StorageState::Saving
        } else if self.save_requested {
            StorageState::SaveRequested
        } else if self.is_saving_allowed() && self.is_auto_save_due() {
            StorageState::AutoSaveDue
        } else {
            StorageState::Idle
        }
    }

    /// Per-tick driver. Starts a requested or due save when no save is
    /// running, and reports the failure of a finished one.
    pub fn update(&mut self, entity_manager: &EntityManager) -> Result<(), PersistenceError> {
        if !self.is_saving_allowed() || self.is_saving() {
            return Ok(());
        }
        self.join_writer()?;
        if self.save_requested {
            self.start_saving(entity_manager, false)
        } else if self.is_saving_necessary() {
            self.start_saving(entity_manager, true)
        } else {
            Ok(())
        }
    }

    /// Block on the running save, then start a new one right away.
    pub fn wait_for_completion_of_previous_save_and_start_saving(
        &mut self,
        entity_manager: &EntityManager,
    ) -> Result<(), PersistenceError> {
        self.join_writer()?;
        self.start_saving(entity_manager, false)
    }

    /// Block until the running save (if any) has finished.
    pub fn finish_saving_and_shutdown(&mut self) -> Result<(), PersistenceError> {
        let result = self.join_writer();
        tracing::info!(ok = result.is_ok(), "Storage manager shut down");
        result
    }

    fn is_saving_allowed(&self) -> bool {
        self.config.write_save_games_enabled && self.providers.clients.is_authority()
    }

    /// Like [`is_auto_save_due`](Self::is_auto_save_due), but the first call
    /// schedules the timer instead of firing it.
    fn is_saving_necessary(&mut self) -> bool {
        if self.next_auto_save == AutoSaveTimer::Unscheduled {
            self.schedule_next_auto_save();
            return self.unloaded_threshold_reached();
        }
        self.is_auto_save_due()
    }

    fn is_auto_save_due(&self) -> bool {
        if self.unloaded_threshold_reached() {
            return true;
        }
        match self.next_auto_save {
            AutoSaveTimer::At(due) => Instant::now() >= due,
            AutoSaveTimer::Unscheduled | AutoSaveTimer::Never => false,
        }
    }

    fn unloaded_threshold_reached(&self) -> bool {
        let unloaded = self.stores.unsaved_chunks.len();
        let total = unloaded + self.providers.chunks.loaded_chunk_count();
        if total == 0 {
            return false;
        }
        let percentage = 100.0 * unloaded as f64 / total as f64;
        percentage >= f64::from(self.config.max_unloaded_chunks_percentage_till_save)
    }

    fn schedule_next_auto_save(&mut self) {
        self.next_auto_save = match Instant::now().checked_add(self.config.max_time_between_saves()) {
            Some(due) => AutoSaveTimer::At(due),
            None => {
                tracing::debug!(
                    seconds = self.config.max_seconds_between_saves,
                    "Auto-save interval out of range, timed auto-saves disabled"
                );
                AutoSaveTimer::Never
            }
        };
    }

    fn join_writer(&mut self) -> Result<(), PersistenceError> {
        let Some(handle) = self.writer.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(result) => result,
            Err(_) => {
                self.stores.save_failed();
                Err(PersistenceError::WriterPanicked)
            }
        }
    }

    fn start_saving(&mut self, live: &EntityManager, auto: bool) -> Result<(), PersistenceError> {
        tracing::info!(auto, "Saving - Creating game snapshot");
        for observer in &self.observers {
            if auto {
                observer.pre_auto_save();
            } else {
                observer.pre_save();
            }
        }
        self.save_requested = false;

        let mut builder = SaveTransactionBuilder::new(
            Arc::clone(&self.private_entity_manager),
            self.tracker.take(),
            self.paths.clone(),
            self.codec.clone(),
            Arc::clone(&self.world_directory_lock),
        )
        .store_chunks_in_zips(self.config.store_chunks_in_zips)
        .rename_retry_delay(self.config.rename_retry_delay());

        for player in self.providers.clients.connected_players() {
            let character = character_of(live, player.client_entity)?;
            let relevance = relevance_location(live, &player, character);
            self.stores.unsaved_players.remove(&player.id);
            builder.add_loaded_player(player.id, PlayerStoreBuilder::new(character, relevance));
        }
        for chunk in self.providers.chunks.loaded_chunks() {
            if chunk.is_ready() {
                self.stores.unsaved_chunks.remove(&chunk.position());
                builder.add_loaded_chunk(&chunk);
            }
        }

        let (chunks, players) = self.stores.claim_for_saving();
        for chunk in chunks {
            builder.add_unloaded_chunk(chunk);
        }
        for (id, data) in players {
            builder.add_unloaded_player(id, data);
        }
        builder.set_global_store_builder(GlobalStoreBuilder::new(live));
        builder.set_manifest(self.providers.manifest.game_manifest());

        let mut transaction = builder.build();
        let stores = Arc::clone(&self.stores);
        let spawned = thread::Builder::new()
            .name(SAVE_THREAD_NAME.to_owned())
            .spawn(move || {
                let result = transaction.run();
                match &result {
                    Ok(()) => stores.save_complete(),
                    Err(_) => stores.save_failed(),
                }
                result
            });
        match spawned {
            Ok(handle) => self.writer = Some(handle),
            Err(source) => {
                self.stores.save_failed();
                return Err(PersistenceError::SpawnWriter { source });
            }
        }

        for observer in &self.observers {
            if auto {
                observer.post_auto_save();
            } else {
                observer.post_save();
            }
        }
        self.schedule_next_auto_save();
        tracing::info!("Saving - Snapshot created: Writing phase starts");
        Ok(())
    }

    // -- maintenance --------------------------------------------------------

    /// Discard an interrupted staging directory and finish an interrupted
    /// merge.
    pub fn check_and_repair_save_if_necessary(&self) -> Result<(), PersistenceError> {
        let _guard = self.world_directory_lock.write();
        SaveTransactionHelper::new(self.paths.clone()).repair()
    }

    /// Forget every chunk of the world, on disk and in memory.
    pub fn delete_world(&mut self) -> Result<(), PersistenceError> {
        self.join_writer()?;
        self.stores.clear();
        let world = self.paths.world_path();
        if world.exists() {
            let _guard = self.world_directory_lock.write();
            if let Err(e) = fs::remove_dir_all(&world) {
                tracing::error!(path = %world.display(), error = %e, "Failed to purge chunks");
            }
        }
        Ok(())
    }

    /// Write a preview screenshot, returning its slot.
    pub fn store_preview_image(&self, jpeg: &[u8]) -> Result<usize, PersistenceError> {
        self.previews.store(jpeg)
    }

    // -- eviction -----------------------------------------------------------

    /// Serialize `chunk` and the entities standing in it, then take those
    /// entities out of the simulation.
    pub fn deactivate_chunk(
        &mut self,
        entity_manager: &mut EntityManager,
        chunk: &Chunk,
    ) -> Result<(), PersistenceError> {
        let index = OwnershipIndex::build(entity_manager)?;
        let mut residents = Vec::new();
        for id in entity_manager.active_entities() {
            if !is_chunk_resident(entity_manager, id)? {
                continue;
            }
            let inside = entity_manager
                .location(id)
                .is_some_and(|l| chunk.contains_world_pos(l.world_position));
            if inside {
                residents.push(id);
            }
        }

        let builder = CompressedChunkBuilder::new(entity_manager, &index, chunk, &residents)?;
        for id in &residents {
            deactivate_or_destroy(entity_manager, &index, *id)?;
        }
        tracing::debug!(
            chunk = %chunk.position(),
            entities = builder.stored_entities().len(),
            "Deactivated chunk"
        );
        self.stores
            .unsaved_chunks
            .insert(chunk.position(), Arc::new(builder));
        Ok(())
    }

    /// Serialize a disconnecting player's character and take it out of the
    /// simulation.
    pub fn deactivate_player(
        &mut self,
        entity_manager: &mut EntityManager,
        player: &ConnectedPlayer,
    ) -> Result<(), PersistenceError> {
        let character = character_of(entity_manager, player.client_entity)?;
        let relevance = relevance_location(entity_manager, player, character);
        let index = OwnershipIndex::build(entity_manager)?;
        let (data, stored) =
            PlayerStoreBuilder::new(character, relevance).build(entity_manager, &index)?;
        if let Some(character) = character {
            deactivate_or_destroy(entity_manager, &index, character)?;
        }
        tracing::debug!(player = %player.id, entities = stored.len(), "Deactivated player");
        self.stores
            .unsaved_players
            .insert(player.id.clone(), Arc::new(data));
        Ok(())
    }

    // -- loading ------------------------------------------------------------

    pub fn load_chunk_store(&self, pos: ChunkPos) -> Option<ChunkStore> {
        self.reader.load_chunk_store(pos)
    }

    pub fn load_player_store(&self, player_id: &str) -> PlayerStore {
        self.reader.load_player_store(player_id)
    }

    /// Restore the global entities into `entity_manager` and advance its id
    /// counter past every id the save has handed out. Returns the restored
    /// ids; a world without a global store restores nothing.
    pub fn load_global_store(
        &self,
        entity_manager: &mut EntityManager,
    ) -> Result<Vec<EntityId>, PersistenceError> {
        let Some(global) = self.reader.load_global_store_data()? else {
            return Ok(Vec::new());
        };
        let restored = global.store.restore_entities(entity_manager)?;
        if entity_manager.next_id() < global.next_entity_id {
            entity_manager.set_next_id(global.next_entity_id);
        }
        tracing::info!(
            entities = restored.len(),
            next_entity_id = entity_manager.next_id(),
            "Loaded global store"
        );
        Ok(restored)
    }
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("root", &self.paths.storage_path_directory())
            .field("state", &self.state())
            .field("unsaved_chunks", &self.stores.unsaved_chunks.len())
            .field("unsaved_players", &self.stores.unsaved_players.len())
            .finish_non_exhaustive()
    }
}

/// Entities that live in a chunk: positioned elsewhere by ownership, always
/// relevant, or a client are kept out.
fn is_chunk_resident(manager: &EntityManager, id: EntityId) -> Result<bool, PersistenceError> {
    if manager.is_always_relevant(id) || manager.has_component(id, &CLIENT) {
        return Ok(false);
    }
    Ok(manager.owner_of(id)?.is_none())
}

fn character_of(
    manager: &EntityManager,
    client_entity: EntityId,
) -> Result<Option<EntityId>, PersistenceError> {
    let Some(component) = manager.component(client_entity, &CLIENT) else {
        return Ok(None);
    };
    Ok(Client::from_component(component).character.resolve(manager)?)
}

/// The character's position, else the client entity's, else the origin.
fn relevance_location(
    manager: &EntityManager,
    player: &ConnectedPlayer,
    character: Option<EntityId>,
) -> [f32; 3] {
    character
        .and_then(|c| manager.location(c))
        .or_else(|| manager.location(player.client_entity))
        .map_or([0.0; 3], |l| l.world_position)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(x: i32) -> Arc<CompressedChunkBuilder> {
        let manager = EntityManager::new();
        let index = OwnershipIndex::build(&manager).unwrap();
        let chunk = Chunk::new(ChunkPos::new(x, 0, 0));
        Arc::new(CompressedChunkBuilder::new(&manager, &index, &chunk, &[]).unwrap())
    }

    #[test]
    fn claim_moves_every_entry_to_saving() {
        let stores = UnloadedStores::default();
        stores.unsaved_chunks.insert(ChunkPos::new(0, 0, 0), builder(0));
        stores.unsaved_chunks.insert(ChunkPos::new(1, 0, 0), builder(1));
        stores
            .unsaved_players
            .insert("p".to_owned(), Arc::new(PlayerStoreData::empty()));

        let (chunks, players) = stores.claim_for_saving();
        assert_eq!(chunks.len(), 2);
        assert_eq!(players.len(), 1);
        assert!(stores.unsaved_chunks.is_empty());
        assert_eq!(stores.saving_chunks.len(), 2);
        assert!(stores.chunk(ChunkPos::new(1, 0, 0)).is_some());
        assert!(stores.player("p").is_some());

        stores.save_complete();
        assert!(stores.chunk(ChunkPos::new(1, 0, 0)).is_none());
    }

    #[test]
    fn failed_save_does_not_clobber_newer_eviction() {
        let stores = UnloadedStores::default();
        let old = builder(0);
        stores.unsaved_chunks.insert(ChunkPos::new(0, 0, 0), Arc::clone(&old));
        stores.claim_for_saving();

        let newer = builder(0);
        stores
            .unsaved_chunks
            .insert(ChunkPos::new(0, 0, 0), Arc::clone(&newer));
        stores.save_failed();

        let kept = stores.chunk(ChunkPos::new(0, 0, 0)).unwrap();
        assert!(Arc::ptr_eq(&kept, &newer));
        assert!(stores.saving_chunks.is_empty());
    }

    #[test]
    fn evicted_chunk_stays_visible_while_claimed_and_restored() {
        use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

        let stores = UnloadedStores::default();
        let pos = ChunkPos::new(3, 0, 0);
        let evicted = builder(3);
        // Odd while the chunk must be visible to readers.
        let phase = AtomicU64::new(0);
        let done = AtomicBool::new(false);

        let misses = thread::scope(|scope| {
            let reader = scope.spawn(|| {
                let mut misses = 0u64;
                while !done.load(Ordering::SeqCst) {
                    let before = phase.load(Ordering::SeqCst);
                    if before % 2 == 0 {
                        continue;
                    }
                    let found = stores.chunk(pos).is_some();
                    if !found && phase.load(Ordering::SeqCst) == before {
                        misses += 1;
                    }
                }
                misses
            });

            for _ in 0..20_000 {
                stores.unsaved_chunks.insert(pos, Arc::clone(&evicted));
                phase.fetch_add(1, Ordering::SeqCst);
                stores.claim_for_saving();
                stores.save_failed();
                stores.claim_for_saving();
                phase.fetch_add(1, Ordering::SeqCst);
                stores.save_complete();
            }
            done.store(true, Ordering::SeqCst);
            reader.join().unwrap()
        });

        assert_eq!(misses, 0);
    }

    #[test]
    fn claim_and_restore_cover_players() {
        let stores = UnloadedStores::default();
        stores
            .unsaved_players
            .insert("p".to_owned(), Arc::new(PlayerStoreData::empty()));
        let (_, players) = stores.claim_for_saving();
        assert_eq!(players.len(), 1);
        assert!(stores.unsaved_players.is_empty());

        stores.save_failed();
        assert!(stores.saving_players.is_empty());
        assert!(stores.player("p").is_some());
        assert!(stores.unsaved_players.contains_key("p"));
    }
}
