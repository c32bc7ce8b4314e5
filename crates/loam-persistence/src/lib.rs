//! Loam Persistence -- crash-safe background saving of a live world.
//!
//! The simulation keeps mutating its [`EntityManager`](loam_ecs::manager::EntityManager)
//! while a save is written. Changes are recorded as they happen, replayed on a
//! private manager owned by a background writer thread, and written into a
//! staging directory that is promoted with a single rename. Startup repair
//! finishes or discards whatever an interrupted save left behind, so the save
//! directory always holds one complete generation.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use loam_ecs::prelude::*;
//! use loam_manifest::manifest::GameManifest;
//! use loam_persistence::prelude::*;
//! use loam_world::prelude::*;
//!
//! # fn main() -> Result<(), PersistenceError> {
//! let mut entities = EntityManager::new();
//! let chunks = Arc::new(LoadedChunks::new());
//! let mut storage = StorageManager::new(
//!     "saves/world-1",
//!     StorageConfig::default(),
//!     &mut entities,
//!     StorageProviders {
//!         chunks: chunks.clone(),
//!         clients: Arc::new(()),
//!         manifest: Arc::new(GameManifest::new("World 1", "seed", 0)),
//!         chunk_serializer: Arc::new(RunLengthChunkSerializer),
//!     },
//! )?;
//! storage.check_and_repair_save_if_necessary()?;
//! storage.load_global_store(&mut entities)?;
//!
//! entities.create(vec![Location::new(1.0, 2.0, 3.0).to_component()]);
//! storage.request_saving();
//! storage.update(&entities)?;
//! storage.finish_saving_and_shutdown()?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod chunk_codec;
mod chunk_files;
pub mod config;
pub mod delta;
pub mod error;
pub mod manager;
pub mod ownership;
pub mod paths;
pub mod preview;
pub mod providers;
pub mod store;
pub mod transaction;

pub use error::PersistenceError;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::chunk_codec::{ChunkCodec, CompressedChunkBuilder};
    pub use crate::config::StorageConfig;
    pub use crate::delta::{EntityDelta, EntitySetDeltaRecorder};
    pub use crate::error::PersistenceError;
    pub use crate::manager::{StorageManager, StorageProviders, StorageReader, StorageState};
    pub use crate::ownership::{EntityStorer, OwnershipIndex};
    pub use crate::paths::{chunk_zip_position, StoragePathProvider, CHUNK_ZIP_DIM};
    pub use crate::providers::{ClientProvider, ConnectedPlayer, SaveObserver};
    pub use crate::store::{
        ChunkStore, EntityStore, GlobalStoreData, PlayerStore, PlayerStoreData,
    };
    pub use crate::transaction::{SaveTransaction, SaveTransactionBuilder, SaveTransactionHelper};
}
