//! The game manifest written next to every save.
//!
//! A [`GameManifest`] records what is needed to interpret the rest of the
//! save: the seed, the module set, the block-id table and the generator
//! parameters of every world. It is captured on the simulation thread when a
//! save snapshot is taken and written as pretty-printed JSON.
//!
//! # Example
//!
//! ```
//! use loam_manifest::manifest::{GameManifest, ModuleEntry, WorldInfo};
//!
//! let mut manifest = GameManifest::new("Valley", "f00d", 12_000);
//! manifest.add_module(ModuleEntry::new("core", "2.1.0"));
//! manifest.add_world(WorldInfo::new("main", "f00d", "core:facet-generator"));
//! manifest.block_id_map.insert("core:stone".to_owned(), 1);
//!
//! let json = manifest.to_json_bytes().unwrap();
//! let back = GameManifest::from_json_bytes(&json).unwrap();
//! assert_eq!(back, manifest);
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ManifestError;

/// Default manifest file name inside a save root.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

// ---------------------------------------------------------------------------
// ModuleEntry
// ---------------------------------------------------------------------------

/// A module enabled for this game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub id: String,
    pub version: String,
}

impl ModuleEntry {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// WorldInfo
// ---------------------------------------------------------------------------

/// Generation parameters of one world in the save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldInfo {
    pub title: String,
    pub seed: String,
    /// URI of the world generator, e.g. `"core:facet-generator"`.
    pub world_generator: String,
    /// Generator configuration keyed by parameter name.
    #[serde(default)]
    pub generator_parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub time_ms: u64,
}

impl WorldInfo {
    pub fn new(
        title: impl Into<String>,
        seed: impl Into<String>,
        world_generator: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            seed: seed.into(),
            world_generator: world_generator.into(),
            generator_parameters: BTreeMap::new(),
            time_ms: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// GameManifest
// ---------------------------------------------------------------------------

/// Top-level description of a saved game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameManifest {
    pub title: String,
    pub seed: String,
    /// Game time in milliseconds at the moment of the snapshot.
    pub time_ms: u64,
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
    #[serde(default)]
    pub registered_block_families: Vec<String>,
    /// Block URI to numeric block id.
    #[serde(default)]
    pub block_id_map: BTreeMap<String, u16>,
    #[serde(default)]
    pub worlds: Vec<WorldInfo>,
}

impl GameManifest {
    pub fn new(title: impl Into<String>, seed: impl Into<String>, time_ms: u64) -> Self {
        Self {
            title: title.into(),
            seed: seed.into(),
            time_ms,
            modules: Vec::new(),
            registered_block_families: Vec::new(),
            block_id_map: BTreeMap::new(),
            worlds: Vec::new(),
        }
    }

    pub fn add_module(&mut self, module: ModuleEntry) {
        self.modules.push(module);
    }

    pub fn add_world(&mut self, world: WorldInfo) {
        self.worlds.push(world);
    }

    pub fn world(&self, title: &str) -> Option<&WorldInfo> {
        self.worlds.iter().find(|w| w.title == title)
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, ManifestError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, ManifestError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Write the manifest to `path`, replacing any existing file.
    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        let bytes = self.to_json_bytes()?;
        fs::write(path, bytes).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let bytes = fs::read(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_bytes(&bytes)
    }
}

// ---------------------------------------------------------------------------
// ManifestProvider
// ---------------------------------------------------------------------------

/// Produces the manifest of the running game on demand.
pub trait ManifestProvider: Send + Sync {
    fn game_manifest(&self) -> GameManifest;
}

/// A fixed manifest is its own provider.
impl ManifestProvider for GameManifest {
    fn game_manifest(&self) -> GameManifest {
        self.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
