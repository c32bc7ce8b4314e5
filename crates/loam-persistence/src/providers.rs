//! Collaborators the storage manager consults when a save starts.

use loam_ecs::entity::EntityId;

/// A connected player and the entity representing their client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedPlayer {
    pub id: String,
    pub client_entity: EntityId,
}

impl ConnectedPlayer {
    pub fn new(id: impl Into<String>, client_entity: EntityId) -> Self {
        Self {
            id: id.into(),
            client_entity,
        }
    }
}

/// Source of the connected players. Only the authority writes saves.
pub trait ClientProvider: Send + Sync {
    fn is_authority(&self) -> bool {
        true
    }

    fn connected_players(&self) -> Vec<ConnectedPlayer>;
}

/// A single-player host with nobody connected.
impl ClientProvider for () {
    fn connected_players(&self) -> Vec<ConnectedPlayer> {
        Vec::new()
    }
}

/// Notified around each save start, on the thread that calls
/// [`StorageManager::update`](crate::manager::StorageManager::update).
pub trait SaveObserver: Send + Sync {
    fn pre_save(&self) {}
    fn post_save(&self) {}
    fn pre_auto_save(&self) {}
    fn post_auto_save(&self) {}
}
