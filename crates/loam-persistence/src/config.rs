//! Storage configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, PersistenceError};

/// Tunables of the storage manager.
///
/// Every field has a default, so a partial JSON file only overrides what it
/// names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// When `false` the manager never starts a save.
    pub write_save_games_enabled: bool,
    /// Pack chunks into 32³ grid archives instead of one file per chunk.
    pub store_chunks_in_zips: bool,
    /// Auto-save interval.
    pub max_seconds_between_saves: u64,
    /// Auto-save once unloaded-but-unsaved chunks reach this share (percent)
    /// of all known chunks.
    pub max_unloaded_chunks_percentage_till_save: u32,
    /// zstd level for chunk blobs.
    pub compression_level: i32,
    /// Number of rotating preview images kept under `previews/`.
    pub preview_count: usize,
    /// Wait before the single retry of a denied staging rename.
    pub rename_retry_delay_ms: u64,
}

/// Defaults: saving enabled, zip-packed chunks, auto-save every 60 s or at
/// 40% unloaded chunks, zstd level 3, five previews, 1 s rename retry delay.
impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            write_save_games_enabled: true,
            store_chunks_in_zips: true,
            max_seconds_between_saves: 60,
            max_unloaded_chunks_percentage_till_save: 40,
            compression_level: 3,
            preview_count: 5,
            rename_retry_delay_ms: 1000,
        }
    }
}

impl StorageConfig {
    pub fn max_time_between_saves(&self) -> Duration {
        Duration::from_secs(self.max_seconds_between_saves)
    }

    pub fn rename_retry_delay(&self) -> Duration {
        Duration::from_millis(self.rename_retry_delay_ms)
    }

    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        let bytes = fs::read(path).at(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(path, bytes).at(path)
    }
}
