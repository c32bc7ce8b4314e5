//! Staging cleanup and merge of promoted changes into the live save tree.
//!
//! Both operations are idempotent. Together they guarantee that after
//! [`SaveTransactionHelper::repair`] the live tree holds either the state
//! before an interrupted save or the complete state after it.

use std::fs;
use std::path::Path;

use crate::error::{IoResultExt, PersistenceError};
use crate::paths::StoragePathProvider;

#[derive(Debug, Clone)]
pub struct SaveTransactionHelper {
    paths: StoragePathProvider,
}

impl SaveTransactionHelper {
    pub fn new(paths: StoragePathProvider) -> Self {
        Self { paths }
    }

    /// Delete a staging directory left behind by an interrupted write.
    pub fn cleanup_save_transaction_directory(&self) -> Result<(), PersistenceError> {
        let staging = self.paths.unfinished_save_transaction_path();
        if staging.exists() {
            tracing::info!(path = %staging.display(), "Removing unfinished save transaction");
            fs::remove_dir_all(&staging).at(&staging)?;
        }
        Ok(())
    }

    pub fn has_unmerged_changes(&self) -> bool {
        self.paths.unmerged_changes_path().exists()
    }

    /// Move every file of the unmerged-changes directory to the same relative
    /// path under the save root, replacing existing files, then remove the
    /// emptied directory.
    ///
    /// Callers must hold the world-directory write lock.
    pub fn merge_changes(&self) -> Result<(), PersistenceError> {
        let source = self.paths.unmerged_changes_path();
        let target = self.paths.storage_path_directory().to_path_buf();
        let moved = merge_directory(&source, &target)?;
        fs::remove_dir_all(&source).at(&source)?;
        sync_directory(&target);
        tracing::debug!(files = moved, "Merged unmerged changes into save directory");
        Ok(())
    }

    /// Discard staging and finish any pending merge.
    pub fn repair(&self) -> Result<(), PersistenceError> {
        self.cleanup_save_transaction_directory()?;
        if self.has_unmerged_changes() {
            tracing::info!("Found unmerged changes, completing previous save");
            self.merge_changes()?;
        }
        Ok(())
    }
}

fn merge_directory(source: &Path, target: &Path) -> Result<usize, PersistenceError> {
    fs::create_dir_all(target).at(target)?;
    let mut moved = 0;
    for entry in fs::read_dir(source).at(source)? {
        let entry = entry.at(source)?;
        let from = entry.path();
        let to = target.join(entry.file_name());
        if entry.file_type().at(&from)?.is_dir() {
            moved += merge_directory(&from, &to)?;
        } else {
            replace_file(&from, &to)?;
            moved += 1;
        }
    }
    Ok(moved)
}

fn replace_file(from: &Path, to: &Path) -> Result<(), PersistenceError> {
    if cfg!(windows) && to.exists() {
        fs::remove_file(to).at(to)?;
    }
    fs::rename(from, to).at(to)
}

/// Copy `source` recursively to `target`, then delete `source`. Used when a
/// directory rename is not supported by the file system.
pub(crate) fn move_directory(source: &Path, target: &Path) -> Result<(), PersistenceError> {
    copy_directory(source, target)?;
    fs::remove_dir_all(source).at(source)
}

fn copy_directory(source: &Path, target: &Path) -> Result<(), PersistenceError> {
    fs::create_dir_all(target).at(target)?;
    for entry in fs::read_dir(source).at(source)? {
        let entry = entry.at(source)?;
        let from = entry.path();
        let to = target.join(entry.file_name());
        if entry.file_type().at(&from)?.is_dir() {
            copy_directory(&from, &to)?;
        } else {
            fs::copy(&from, &to).at(&to)?;
        }
    }
    Ok(())
}

/// Persist directory entries after renames. Best effort: not every platform
/// allows opening a directory.
pub(crate) fn sync_directory(dir: &Path) {
    #[cfg(unix)]
    {
        if let Err(e) = fs::File::open(dir).and_then(|d| d.sync_all()) {
            tracing::debug!(path = %dir.display(), error = %e, "directory sync failed");
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
