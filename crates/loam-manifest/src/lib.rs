//! Loam Manifest - the descriptive header of a saved game.
//!
//! # Modules
//!
//! - [`manifest`]: [`GameManifest`](manifest::GameManifest) with its module
//!   list, block-id table and per-world generator parameters, plus the
//!   [`ManifestProvider`](manifest::ManifestProvider) trait used to capture it
//!   at save time.

#![deny(unsafe_code)]

pub mod manifest;

use std::path::PathBuf;

/// Errors produced while reading or writing a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),
}
