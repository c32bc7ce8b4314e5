//! Rotating preview screenshots of a save.

use std::fs;
use std::time::SystemTime;

use crate::chunk_files::write_file_synced;
use crate::error::{IoResultExt, PersistenceError};
use crate::paths::StoragePathProvider;

/// Writes preview images into `previews/<n>.jpg`, filling free slots first
/// and then overwriting the oldest one.
#[derive(Debug, Clone)]
pub struct PreviewImages {
    paths: StoragePathProvider,
    count: usize,
}

impl PreviewImages {
    pub fn new(paths: StoragePathProvider, count: usize) -> Self {
        Self {
            paths,
            count: count.max(1),
        }
    }

    /// Store `jpeg` and return the slot it was written to.
    pub fn store(&self, jpeg: &[u8]) -> Result<usize, PersistenceError> {
        let dir = self.paths.previews_path();
        fs::create_dir_all(&dir).at(&dir)?;
        let slot = self.next_slot()?;
        write_file_synced(&self.paths.preview_image_path(slot), jpeg)?;
        tracing::debug!(slot, bytes = jpeg.len(), "Stored preview image");
        Ok(slot)
    }

    fn next_slot(&self) -> Result<usize, PersistenceError> {
        let mut oldest: Option<(SystemTime, usize)> = None;
        for slot in 0..self.count {
            let path = self.paths.preview_image_path(slot);
            if !path.exists() {
                return Ok(slot);
            }
            let modified = fs::metadata(&path).and_then(|m| m.modified()).at(&path)?;
            if oldest.map_or(true, |(time, _)| modified < time) {
                oldest = Some((modified, slot));
            }
        }
        Ok(oldest.map_or(0, |(_, slot)| slot))
    }
}
