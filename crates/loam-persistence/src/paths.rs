//! Layout of a save directory.
//!
//! ```text
//! <root>/manifest.json
//! <root>/global.dat
//! <root>/players/<id>.player
//! <root>/worlds/<world>/<x>.<y>.<z>.chunk
//! <root>/worlds/<world>/<zx>.<zy>.<zz>.chunks.zip
//! <root>/previews/<n>.jpg
//! <root>/unfinished-save-transaction/...   staging, never a valid save
//! <root>/unmerged-changes/...              promoted, waiting to be merged
//! ```
//!
//! Staging mirrors the live layout, so merging is a relative-path move.

use std::path::{Path, PathBuf};

use loam_world::chunk::ChunkPos;
use loam_manifest::manifest::MANIFEST_FILE_NAME;

/// Edge length, in chunks, of the cube grouped into one archive.
pub const CHUNK_ZIP_DIM: i32 = 32;
/// Name of the only world this layer writes.
pub const MAIN_WORLD: &str = "main";

const PLAYERS_DIR: &str = "players";
const WORLDS_DIR: &str = "worlds";
const PREVIEWS_DIR: &str = "previews";
const GLOBAL_STORE_FILE: &str = "global.dat";
const STAGING_DIR: &str = "unfinished-save-transaction";
const UNMERGED_DIR: &str = "unmerged-changes";
const PLAYER_EXTENSION: &str = "player";

/// Maps a save root to every path the persistence layer touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePathProvider {
    root: PathBuf,
    world: String,
}

impl StoragePathProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            world: MAIN_WORLD.to_owned(),
        }
    }

    pub fn storage_path_directory(&self) -> &Path {
        &self.root
    }

    pub fn unfinished_save_transaction_path(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    pub fn unmerged_changes_path(&self) -> PathBuf {
        self.root.join(UNMERGED_DIR)
    }

    // -- live tree ----------------------------------------------------------

    pub fn players_path(&self) -> PathBuf {
        self.root.join(PLAYERS_DIR)
    }

    pub fn world_path(&self) -> PathBuf {
        self.root.join(WORLDS_DIR).join(&self.world)
    }

    pub fn previews_path(&self) -> PathBuf {
        self.root.join(PREVIEWS_DIR)
    }

    pub fn preview_image_path(&self, index: usize) -> PathBuf {
        self.previews_path().join(format!("{index}.jpg"))
    }

    pub fn global_entity_store_path(&self) -> PathBuf {
        self.root.join(GLOBAL_STORE_FILE)
    }

    pub fn game_manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE_NAME)
    }

    pub fn player_file_path(&self, player_id: &str) -> PathBuf {
        self.players_path().join(player_file_name(player_id))
    }

    pub fn chunk_path(&self, pos: ChunkPos) -> PathBuf {
        self.world_path().join(chunk_file_name(pos))
    }

    pub fn chunk_zip_path(&self, zip_pos: ChunkPos) -> PathBuf {
        self.world_path().join(chunk_zip_file_name(zip_pos))
    }

    // -- staging tree -------------------------------------------------------

    pub fn players_temp_path(&self) -> PathBuf {
        self.unfinished_save_transaction_path().join(PLAYERS_DIR)
    }

    pub fn world_temp_path(&self) -> PathBuf {
        self.unfinished_save_transaction_path()
            .join(WORLDS_DIR)
            .join(&self.world)
    }

    pub fn global_entity_store_temp_path(&self) -> PathBuf {
        self.unfinished_save_transaction_path().join(GLOBAL_STORE_FILE)
    }

    pub fn game_manifest_temp_path(&self) -> PathBuf {
        self.unfinished_save_transaction_path().join(MANIFEST_FILE_NAME)
    }

    pub fn player_file_temp_path(&self, player_id: &str) -> PathBuf {
        self.players_temp_path().join(player_file_name(player_id))
    }

    pub fn chunk_temp_path(&self, pos: ChunkPos) -> PathBuf {
        self.world_temp_path().join(chunk_file_name(pos))
    }

    pub fn chunk_zip_temp_path(&self, zip_pos: ChunkPos) -> PathBuf {
        self.world_temp_path().join(chunk_zip_file_name(zip_pos))
    }
}

/// Archive cell holding `pos`. Floors, so `(-1, -1, -1)` maps to
/// `(-1, -1, -1)` rather than the origin cell.
pub fn chunk_zip_position(pos: ChunkPos) -> ChunkPos {
    pos.grid_cell(CHUNK_ZIP_DIM)
}

/// Entry name of a chunk, both as a loose file and inside an archive.
pub fn chunk_file_name(pos: ChunkPos) -> String {
    format!("{}.{}.{}.chunk", pos.x, pos.y, pos.z)
}

pub fn chunk_zip_file_name(zip_pos: ChunkPos) -> String {
    format!("{}.{}.{}.chunks.zip", zip_pos.x, zip_pos.y, zip_pos.z)
}

fn player_file_name(player_id: &str) -> String {
    format!("{}.{PLAYER_EXTENSION}", escape_file_name(player_id))
}

/// Map a player id to a file stem, one to one. ASCII letters, digits, `-`
/// and `_` are kept; every other byte becomes `%XX`, so no id can leave the
/// players directory or collide with another id.
fn escape_file_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            escaped.push(char::from(byte));
        } else {
            escaped.push_str(&format!("%{byte:02X}"));
        }
    }
    escaped
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_under_root() {
        let paths = StoragePathProvider::new("/saves/game");
        assert_eq!(paths.global_entity_store_path(), Path::new("/saves/game/global.dat"));
        assert_eq!(
            paths.player_file_path("alice"),
            Path::new("/saves/game/players/alice.player")
        );
        assert_eq!(
            paths.chunk_path(ChunkPos::new(1, -2, 3)),
            Path::new("/saves/game/worlds/main/1.-2.3.chunk")
        );
        assert_eq!(
            paths.chunk_zip_path(ChunkPos::new(0, 0, -1)),
            Path::new("/saves/game/worlds/main/0.0.-1.chunks.zip")
        );
        assert_eq!(paths.preview_image_path(2), Path::new("/saves/game/previews/2.jpg"));
        assert_eq!(paths.game_manifest_path(), Path::new("/saves/game/manifest.json"));
    }

    #[test]
    fn staging_mirrors_live_tree() {
        let paths = StoragePathProvider::new("/r");
        let staging = paths.unfinished_save_transaction_path();
        let relative_live = paths
            .chunk_path(ChunkPos::new(4, 4, 4))
            .strip_prefix(paths.storage_path_directory())
            .unwrap()
            .to_path_buf();
        let relative_temp = paths
            .chunk_temp_path(ChunkPos::new(4, 4, 4))
            .strip_prefix(&staging)
            .unwrap()
            .to_path_buf();
        assert_eq!(relative_live, relative_temp);
        assert_eq!(
            paths.player_file_temp_path("bob"),
            Path::new("/r/unfinished-save-transaction/players/bob.player")
        );
    }

    #[test]
    fn zip_position_floors() {
        assert_eq!(chunk_zip_position(ChunkPos::new(5, 5, 5)), ChunkPos::new(0, 0, 0));
        assert_eq!(
            chunk_zip_position(ChunkPos::new(-1, -1, -1)),
            ChunkPos::new(-1, -1, -1)
        );
        assert_eq!(chunk_zip_position(ChunkPos::new(32, 0, -33)), ChunkPos::new(1, 0, -2));
    }

    #[test]
    fn player_ids_cannot_escape() {
        let paths = StoragePathProvider::new("/r");
        assert_eq!(
            paths.player_file_path("../evil/name"),
            Path::new("/r/players/%2E%2E%2Fevil%2Fname.player")
        );
        assert_eq!(paths.player_file_path("alice-2_b"), Path::new("/r/players/alice-2_b.player"));
    }

    #[test]
    fn distinct_player_ids_get_distinct_files() {
        let ids = ["a/b", "a_b", ".alice", "alice", "", "..", "a%2Fb", "ä"];
        let names: std::collections::BTreeSet<String> =
            ids.iter().map(|id| player_file_name(id)).collect();
        assert_eq!(names.len(), ids.len());
        assert_eq!(player_file_name("ä"), "%C3%A4.player");
    }
}
