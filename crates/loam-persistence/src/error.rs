//! Error type of the persistence layer.

use std::io;
use std::path::{Path, PathBuf};

use loam_ecs::EcsError;
use loam_manifest::ManifestError;
use loam_world::chunk::ChunkPos;
use loam_world::WorldError;

/// Errors produced while saving or loading a world.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// A file system operation failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A store could not be encoded or decoded as JSON.
    #[error("store JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),

    /// A save was started while a previous one was promoted but never merged.
    #[error("save ran while there were unmerged changes at {}", path.display())]
    UnmergedChangesPresent { path: PathBuf },

    /// A chunk blob failed its format or checksum checks.
    #[error("corrupt data for chunk {pos}: {details}")]
    CorruptChunk { pos: ChunkPos, details: String },

    /// zstd failed to compress a chunk blob.
    #[error("chunk {pos} could not be compressed: {source}")]
    Compression {
        pos: ChunkPos,
        #[source]
        source: io::Error,
    },

    /// Reading or writing a chunk archive failed.
    #[error("chunk archive {}: {source}", path.display())]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// The background save thread could not be started.
    #[error("failed to spawn save writer thread: {source}")]
    SpawnWriter {
        #[source]
        source: io::Error,
    },

    /// The background save thread panicked.
    #[error("save writer thread panicked")]
    WriterPanicked,

    #[error(transparent)]
    Ecs(#[from] EcsError),

    #[error(transparent)]
    World(#[from] WorldError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

impl PersistenceError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn zip(path: &Path, source: zip::result::ZipError) -> Self {
        PersistenceError::Zip {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Attach a path to an [`io::Error`].
pub(crate) trait IoResultExt<T> {
    fn at(self, path: &Path) -> Result<T, PersistenceError>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T, PersistenceError> {
        self.map_err(|e| PersistenceError::io(path, e))
    }
}
