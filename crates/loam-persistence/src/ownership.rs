//! Ownership closure: which entities travel with a character or a chunk.
//!
//! Every entity may name an owner in its entity info. The closure of a root is
//! everything it transitively owns, skipping owned entities that are
//! always-relevant (they live in the global store) or transient (never
//! saved). Skipped entities are not descended into.

use std::collections::{BTreeSet, HashMap};

use loam_ecs::entity::EntityId;
use loam_ecs::manager::EntityManager;
use loam_ecs::serializer::EntitySerializer;
use loam_ecs::EcsError;

use crate::store::EntityStore;

// ---------------------------------------------------------------------------
// OwnershipIndex
// ---------------------------------------------------------------------------

/// Owner → owned map of the active entities of one manager.
///
/// Built once per save or eviction; owner back-references are resolved
/// through the manager so delayed references must already be bound.
#[derive(Debug, Default)]
pub struct OwnershipIndex {
    owned: HashMap<EntityId, Vec<EntityId>>,
}

impl OwnershipIndex {
    pub fn build(manager: &EntityManager) -> Result<Self, EcsError> {
        let mut owned: HashMap<EntityId, Vec<EntityId>> = HashMap::new();
        for id in manager.active_entities() {
            if let Some(owner) = manager.owner_of(id)? {
                if owner != id {
                    owned.entry(owner).or_default().push(id);
                }
            }
        }
        Ok(Self { owned })
    }

    /// Entities directly owned by `owner`, in ascending id order.
    pub fn owned_by(&self, owner: EntityId) -> &[EntityId] {
        self.owned.get(&owner).map_or(&[], Vec::as_slice)
    }

    /// Every entity `root` transitively owns that should be saved with it.
    /// `root` itself is not included. Cycles are tolerated.
    pub fn owned_closure(&self, manager: &EntityManager, root: EntityId) -> Vec<EntityId> {
        let mut visited = BTreeSet::from([root]);
        let mut result = Vec::new();
        let mut stack: Vec<EntityId> = self.owned_by(root).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            if manager.is_always_relevant(id) || !manager.is_persistent(id) {
                continue;
            }
            result.push(id);
            stack.extend(self.owned_by(id).iter().rev().copied());
        }
        result
    }
}

// ---------------------------------------------------------------------------
// EntityStorer
// ---------------------------------------------------------------------------

/// Serializes roots together with their ownership closure into one
/// [`EntityStore`], writing each entity at most once.
pub struct EntityStorer<'a> {
    manager: &'a EntityManager,
    index: &'a OwnershipIndex,
    serializer: EntitySerializer,
    store: EntityStore,
    stored: BTreeSet<EntityId>,
}

impl<'a> EntityStorer<'a> {
    pub fn new(manager: &'a EntityManager, index: &'a OwnershipIndex) -> Self {
        Self {
            manager,
            index,
            serializer: EntitySerializer::new(),
            store: EntityStore::new(),
            stored: BTreeSet::new(),
        }
    }

    /// Store `root` and its closure. Transient or inactive roots are skipped.
    pub fn store(&mut self, root: EntityId, name: Option<&str>) -> Result<(), EcsError> {
        if !self.manager.is_active(root) || !self.manager.is_persistent(root) {
            return Ok(());
        }
        self.store_single(root)?;
        if let Some(name) = name {
            self.store.names.insert(name.to_owned(), root);
        }
        for owned in self.index.owned_closure(self.manager, root) {
            self.store_single(owned)?;
        }
        Ok(())
    }

    /// Store one entity without its closure.
    pub fn store_single(&mut self, id: EntityId) -> Result<(), EcsError> {
        if self.stored.insert(id) {
            let data = self.serializer.serialize(self.manager, id)?;
            self.store.entities.push(data);
        }
        Ok(())
    }

    pub fn stored_entities(&self) -> &BTreeSet<EntityId> {
        &self.stored
    }

    pub fn finish(self) -> (EntityStore, BTreeSet<EntityId>) {
        (self.store, self.stored)
    }
}

// ---------------------------------------------------------------------------
// Deactivation
// ---------------------------------------------------------------------------

/// Park `root` and its owned entities after they were written to a store.
///
/// Persistent entities are deactivated, owners after the entities they own.
/// Transient owned entities are destroyed; always-relevant ones stay active.
/// A transient root is destroyed.
pub fn deactivate_or_destroy(
    manager: &mut EntityManager,
    index: &OwnershipIndex,
    root: EntityId,
) -> Result<(), EcsError> {
    if !manager.is_active(root) {
        return Ok(());
    }
    if !manager.is_persistent(root) {
        return manager.destroy(root);
    }
    let mut visited = BTreeSet::new();
    deactivate_recursive(manager, index, root, &mut visited)
}

fn deactivate_recursive(
    manager: &mut EntityManager,
    index: &OwnershipIndex,
    id: EntityId,
    visited: &mut BTreeSet<EntityId>,
) -> Result<(), EcsError> {
    if !visited.insert(id) || !manager.is_active(id) {
        return Ok(());
    }
    for owned in index.owned_by(id).to_vec() {
        if !manager.is_active(owned) || manager.is_always_relevant(owned) {
            continue;
        }
        if manager.is_persistent(owned) {
            deactivate_recursive(manager, index, owned, visited)?;
        } else {
            manager.destroy(owned)?;
        }
    }
    manager.deactivate_for_storage(id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
