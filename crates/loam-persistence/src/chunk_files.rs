//! Reading and writing chunk blobs as loose files or grid archives.
//!
//! Archive entries are stored uncompressed: the blobs are already zstd
//! compressed.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::Path;

use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{IoResultExt, PersistenceError};

/// Write `bytes` to `path` and flush them to disk.
pub(crate) fn write_file_synced(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let mut file = File::create(path).at(path)?;
    file.write_all(bytes).at(path)?;
    file.sync_all().at(path)
}

/// Read a file, treating "not found" as `None`.
pub(crate) fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, PersistenceError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PersistenceError::io(path, e)),
    }
}

/// Read one entry of a chunk archive. A missing archive or entry is `None`.
pub(crate) fn read_zip_entry(
    zip_path: &Path,
    entry_name: &str,
) -> Result<Option<Vec<u8>>, PersistenceError> {
    let file = match File::open(zip_path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PersistenceError::io(zip_path, e)),
    };
    let mut archive = ZipArchive::new(file).map_err(|e| PersistenceError::zip(zip_path, e))?;
    let mut entry = match archive.by_name(entry_name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(PersistenceError::zip(zip_path, e)),
    };
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes).at(zip_path)?;
    Ok(Some(bytes))
}

/// Write a new archive at `target` holding `entries`, then copy forward every
/// entry of `previous` (if it exists) whose name was not rewritten.
pub(crate) fn write_chunk_zip<'a>(
    target: &Path,
    previous: &Path,
    entries: impl IntoIterator<Item = (String, &'a [u8])>,
) -> Result<usize, PersistenceError> {
    let file = File::create(target).at(target)?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Stored);
    let mut written = BTreeSet::new();

    for (name, bytes) in entries {
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| PersistenceError::zip(target, e))?;
        writer.write_all(bytes).at(target)?;
        written.insert(name);
    }

    let mut copied = 0;
    if previous.exists() {
        let old = File::open(previous).at(previous)?;
        let mut archive = ZipArchive::new(old).map_err(|e| PersistenceError::zip(previous, e))?;
        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| PersistenceError::zip(previous, e))?;
            if written.contains(entry.name()) {
                continue;
            }
            let name = entry.name().to_owned();
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).at(previous)?;
            writer
                .start_file(name.as_str(), options)
                .map_err(|e| PersistenceError::zip(target, e))?;
            writer.write_all(&bytes).at(target)?;
            copied += 1;
        }
    }

    let file = writer.finish().map_err(|e| PersistenceError::zip(target, e))?;
    file.sync_all().at(target)?;
    Ok(written.len() + copied)
}
