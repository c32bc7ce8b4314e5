//! The [`EntityManager`] owns every entity and its components and notifies
//! subscribers synchronously about each mutation.
//!
//! Entities are either *active* (visible to queries) or *deactivated*: parked
//! while the chunk or player that holds them is unloaded. Deactivated entities
//! still [`exist`](EntityManager::exists), so references to them stay valid.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::builtin::{EntityInfo, Location, ENTITY_INFO, LOCATION};
use crate::component::{Component, ComponentType};
use crate::entity::{EntityId, IdCounter, ManagerId};
use crate::EcsError;

// ---------------------------------------------------------------------------
// EntityChangeSubscriber
// ---------------------------------------------------------------------------

/// Synchronous observer of entity mutations.
///
/// Callbacks run on the thread that performed the mutation, after it took
/// effect, except [`on_entity_destroyed`](Self::on_entity_destroyed) and
/// [`on_before_deactivation`](Self::on_before_deactivation) which run while
/// the entity is still active so its components can be inspected.
pub trait EntityChangeSubscriber: Send + Sync {
    /// A component type was added to an entity. Defaults to
    /// [`on_component_changed`](Self::on_component_changed).
    fn on_component_added(&self, manager: &EntityManager, entity: EntityId, ty: &ComponentType) {
        self.on_component_changed(manager, entity, ty);
    }

    fn on_component_changed(&self, _manager: &EntityManager, _entity: EntityId, _ty: &ComponentType) {
    }

    fn on_component_removed(&self, _manager: &EntityManager, _entity: EntityId, _ty: &ComponentType) {
    }

    fn on_entity_destroyed(&self, _manager: &EntityManager, _entity: EntityId) {}

    fn on_before_deactivation(&self, _manager: &EntityManager, _entity: EntityId) {}

    fn on_reactivation(&self, _manager: &EntityManager, _entity: EntityId) {}
}

// ---------------------------------------------------------------------------
// EntityManager
// ---------------------------------------------------------------------------

type ComponentMap = BTreeMap<ComponentType, Component>;

/// Id-addressed entity store with change notification.
pub struct EntityManager {
    id: ManagerId,
    ids: IdCounter,
    active: HashMap<EntityId, ComponentMap>,
    deactivated: HashMap<EntityId, ComponentMap>,
    subscribers: Vec<Arc<dyn EntityChangeSubscriber>>,
}

impl EntityManager {
    pub fn new() -> Self {
        Self {
            id: ManagerId::next(),
            ids: IdCounter::new(),
            active: HashMap::new(),
            deactivated: HashMap::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn manager_id(&self) -> ManagerId {
        self.id
    }

    /// Register a subscriber for all future mutations.
    pub fn subscribe(&mut self, subscriber: Arc<dyn EntityChangeSubscriber>) {
        self.subscribers.push(subscriber);
    }

    // -- id counter ---------------------------------------------------------

    pub fn next_id(&self) -> u64 {
        self.ids.next_id()
    }

    pub fn set_next_id(&mut self, next: u64) {
        self.ids.set_next_id(next);
    }

    // -- lifecycle ----------------------------------------------------------

    /// Create an entity with a freshly allocated id.
    pub fn create(&mut self, components: impl IntoIterator<Item = Component>) -> EntityId {
        let id = self.ids.allocate();
        self.insert_new(id, components);
        id
    }

    /// Create an entity with a caller-chosen id.
    ///
    /// Fails if the id is active. A deactivated entity with the same id is
    /// replaced without a reactivation event.
    pub fn create_with_id(
        &mut self,
        id: EntityId,
        components: impl IntoIterator<Item = Component>,
    ) -> Result<(), EcsError> {
        if self.active.contains_key(&id) {
            return Err(EcsError::EntityAlreadyExists { entity: id });
        }
        self.deactivated.remove(&id);
        self.ids.observe(id);
        self.insert_new(id, components);
        Ok(())
    }

    /// Bring an entity back from storage.
    ///
    /// A deactivated entity is reactivated with `components` replacing what it
    /// held; any other id is created fresh.
    pub fn restore_entity(
        &mut self,
        id: EntityId,
        components: impl IntoIterator<Item = Component>,
    ) -> Result<(), EcsError> {
        if self.deactivated.remove(&id).is_some() {
            self.active.insert(id, Self::component_map(components));
            for subscriber in &self.subscribers {
                subscriber.on_reactivation(self, id);
            }
            return Ok(());
        }
        self.create_with_id(id, components)
    }

    /// Destroy an active or deactivated entity.
    pub fn destroy(&mut self, id: EntityId) -> Result<(), EcsError> {
        if !self.exists(id) {
            return Err(EcsError::NoSuchEntity { entity: id });
        }
        for subscriber in &self.subscribers {
            subscriber.on_entity_destroyed(self, id);
        }
        self.active.remove(&id);
        self.deactivated.remove(&id);
        Ok(())
    }

    /// Park an active entity while its container is unloaded.
    pub fn deactivate_for_storage(&mut self, id: EntityId) -> Result<(), EcsError> {
        if !self.active.contains_key(&id) {
            return Err(EcsError::NoSuchEntity { entity: id });
        }
        for subscriber in &self.subscribers {
            subscriber.on_before_deactivation(self, id);
        }
        if let Some(components) = self.active.remove(&id) {
            self.deactivated.insert(id, components);
        }
        tracing::trace!(entity = %id, "entity deactivated for storage");
        Ok(())
    }

    /// Reactivate a deactivated entity with the components it was parked with.
    pub fn reactivate(&mut self, id: EntityId) -> Result<(), EcsError> {
        let components = self
            .deactivated
            .remove(&id)
            .ok_or(EcsError::NoSuchEntity { entity: id })?;
        self.active.insert(id, components);
        for subscriber in &self.subscribers {
            subscriber.on_reactivation(self, id);
        }
        Ok(())
    }

    // -- components ---------------------------------------------------------

    /// Add a component, or replace the existing one of the same type.
    pub fn add_component(&mut self, id: EntityId, component: Component) -> Result<(), EcsError> {
        let components = self
            .active
            .get_mut(&id)
            .ok_or(EcsError::NoSuchEntity { entity: id })?;
        let ty = component.component_type().clone();
        let replaced = components.insert(ty.clone(), component).is_some();
        for subscriber in &self.subscribers {
            if replaced {
                subscriber.on_component_changed(self, id, &ty);
            } else {
                subscriber.on_component_added(self, id, &ty);
            }
        }
        Ok(())
    }

    /// Store a new value for a component. Always notifies as a change.
    pub fn save_component(&mut self, id: EntityId, component: Component) -> Result<(), EcsError> {
        let components = self
            .active
            .get_mut(&id)
            .ok_or(EcsError::NoSuchEntity { entity: id })?;
        let ty = component.component_type().clone();
        components.insert(ty.clone(), component);
        for subscriber in &self.subscribers {
            subscriber.on_component_changed(self, id, &ty);
        }
        Ok(())
    }

    /// Remove a component type. Returns the removed value, if any.
    pub fn remove_component(
        &mut self,
        id: EntityId,
        ty: &ComponentType,
    ) -> Result<Option<Component>, EcsError> {
        let components = self
            .active
            .get_mut(&id)
            .ok_or(EcsError::NoSuchEntity { entity: id })?;
        let removed = components.remove(ty);
        if removed.is_some() {
            for subscriber in &self.subscribers {
                subscriber.on_component_removed(self, id, ty);
            }
        }
        Ok(removed)
    }

    pub fn component(&self, id: EntityId, ty: &ComponentType) -> Option<&Component> {
        self.active.get(&id).and_then(|components| components.get(ty))
    }

    pub fn has_component(&self, id: EntityId, ty: &ComponentType) -> bool {
        self.component(id, ty).is_some()
    }

    /// All components of an active entity, ordered by type name.
    pub fn components(&self, id: EntityId) -> Option<impl Iterator<Item = &Component> + '_> {
        self.active.get(&id).map(|components| components.values())
    }

    // -- queries ------------------------------------------------------------

    /// `true` for active and deactivated entities.
    pub fn exists(&self, id: EntityId) -> bool {
        self.active.contains_key(&id) || self.deactivated.contains_key(&id)
    }

    pub fn is_active(&self, id: EntityId) -> bool {
        self.active.contains_key(&id)
    }

    pub fn is_deactivated(&self, id: EntityId) -> bool {
        self.deactivated.contains_key(&id)
    }

    /// Ids of all active entities in ascending order.
    pub fn active_entities(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.active.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Entity info of an active or deactivated entity, defaulted if absent.
    pub fn entity_info(&self, id: EntityId) -> EntityInfo {
        self.active
            .get(&id)
            .or_else(|| self.deactivated.get(&id))
            .and_then(|components| components.get(&ENTITY_INFO))
            .map(EntityInfo::from_component)
            .unwrap_or_default()
    }

    pub fn is_persistent(&self, id: EntityId) -> bool {
        self.entity_info(id).persistent
    }

    pub fn is_always_relevant(&self, id: EntityId) -> bool {
        self.entity_info(id).always_relevant
    }

    /// The existing owner of `id`, if any.
    pub fn owner_of(&self, id: EntityId) -> Result<Option<EntityId>, EcsError> {
        self.entity_info(id).owner.resolve(self)
    }

    pub fn location(&self, id: EntityId) -> Option<Location> {
        self.component(id, &LOCATION)
            .and_then(Location::from_component)
    }

    // -- internals ----------------------------------------------------------

    fn component_map(components: impl IntoIterator<Item = Component>) -> ComponentMap {
        components
            .into_iter()
            .map(|c| (c.component_type().clone(), c))
            .collect()
    }

    fn insert_new(&mut self, id: EntityId, components: impl IntoIterator<Item = Component>) {
        let components = Self::component_map(components);
        let types: Vec<ComponentType> = components.keys().cloned().collect();
        self.active.insert(id, components);
        for subscriber in &self.subscribers {
            for ty in &types {
                subscriber.on_component_added(self, id, ty);
            }
        }
    }
}

impl Default for EntityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("id", &self.id)
            .field("next_id", &self.ids.next_id())
            .field("active", &self.active.len())
            .field("deactivated", &self.deactivated.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_ref::EntityRef;
    use std::sync::Mutex;

    // -- helpers ------------------------------------------------------------

    /// Records every callback as a string.
    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    impl Log {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
        fn push(&self, s: String) {
            self.0.lock().unwrap().push(s);
        }
    }

    impl EntityChangeSubscriber for Log {
        fn on_component_added(&self, _: &EntityManager, e: EntityId, ty: &ComponentType) {
            self.push(format!("added {e} {ty}"));
        }
        fn on_component_changed(&self, _: &EntityManager, e: EntityId, ty: &ComponentType) {
            self.push(format!("changed {e} {ty}"));
        }
        fn on_component_removed(&self, _: &EntityManager, e: EntityId, ty: &ComponentType) {
            self.push(format!("removed {e} {ty}"));
        }
        fn on_entity_destroyed(&self, m: &EntityManager, e: EntityId) {
            self.push(format!("destroyed {e} exists={}", m.exists(e)));
        }
        fn on_before_deactivation(&self, m: &EntityManager, e: EntityId) {
            self.push(format!("deactivating {e} active={}", m.is_active(e)));
        }
        fn on_reactivation(&self, m: &EntityManager, e: EntityId) {
            self.push(format!("reactivated {e} active={}", m.is_active(e)));
        }
    }

    fn health(value: i64) -> Component {
        Component::new(ComponentType::new("test:health")).with("value", value)
    }

    fn subscribed() -> (EntityManager, Arc<Log>) {
        let mut manager = EntityManager::new();
        let log = Arc::new(Log::default());
        manager.subscribe(log.clone());
        (manager, log)
    }

    // -- tests --------------------------------------------------------------

    #[test]
    fn add_then_replace_fires_added_then_changed() {
        let (mut manager, log) = subscribed();
        let e = manager.create(Vec::new());
        manager.add_component(e, health(1)).unwrap();
        manager.add_component(e, health(2)).unwrap();
        assert_eq!(
            log.take(),
            vec![
                format!("added {e} test:health"),
                format!("changed {e} test:health")
            ]
        );
        let ty = ComponentType::new("test:health");
        assert_eq!(manager.component(e, &ty), Some(&health(2)));
    }

    #[test]
    fn destroy_notifies_while_entity_still_exists() {
        let (mut manager, log) = subscribed();
        let e = manager.create(vec![health(1)]);
        log.take();
        manager.destroy(e).unwrap();
        assert_eq!(log.take(), vec![format!("destroyed {e} exists=true")]);
        assert!(!manager.exists(e));
        assert!(matches!(manager.destroy(e), Err(EcsError::NoSuchEntity { .. })));
    }

    #[test]
    fn deactivated_entities_exist_but_are_not_active() {
        let (mut manager, log) = subscribed();
        let e = manager.create(vec![health(5)]);
        log.take();

        manager.deactivate_for_storage(e).unwrap();
        assert!(manager.exists(e));
        assert!(!manager.is_active(e));
        assert!(manager.active_entities().is_empty());

        manager.reactivate(e).unwrap();
        assert!(manager.is_active(e));
        assert_eq!(
            log.take(),
            vec![
                format!("deactivating {e} active=true"),
                format!("reactivated {e} active=true")
            ]
        );
    }

    #[test]
    fn restore_reactivates_with_stored_components() {
        let (mut manager, log) = subscribed();
        let e = manager.create(vec![health(1)]);
        manager.deactivate_for_storage(e).unwrap();
        log.take();

        manager.restore_entity(e, vec![health(9)]).unwrap();
        assert_eq!(log.take(), vec![format!("reactivated {e} active=true")]);
        let ty = ComponentType::new("test:health");
        assert_eq!(manager.component(e, &ty), Some(&health(9)));
    }

    #[test]
    fn create_with_id_bumps_counter_and_rejects_duplicates() {
        let mut manager = EntityManager::new();
        manager.create_with_id(EntityId::new(50), Vec::new()).unwrap();
        assert_eq!(manager.next_id(), 51);
        assert!(matches!(
            manager.create_with_id(EntityId::new(50), Vec::new()),
            Err(EcsError::EntityAlreadyExists { .. })
        ));
    }

    #[test]
    fn entity_without_info_is_persistent_and_unowned() {
        let mut manager = EntityManager::new();
        let e = manager.create(Vec::new());
        assert!(manager.is_persistent(e));
        assert!(!manager.is_always_relevant(e));
        assert_eq!(manager.owner_of(e).unwrap(), None);
    }

    #[test]
    fn owner_resolves_through_entity_info() {
        let mut manager = EntityManager::new();
        let owner = manager.create(Vec::new());
        let owned = manager.create(vec![EntityInfo::owned_by(owner).to_component()]);
        assert_eq!(manager.owner_of(owned).unwrap(), Some(owner));

        manager.destroy(owner).unwrap();
        assert_eq!(manager.owner_of(owned).unwrap(), None);
        assert_eq!(
            manager.entity_info(owned).owner,
            EntityRef::Live(owner)
        );
    }

    #[test]
    fn save_component_reports_a_change() {
        let (mut manager, log) = subscribed();
        let e = manager.create(vec![health(1)]);
        log.take();
        manager.save_component(e, health(5)).unwrap();
        assert_eq!(log.take(), vec![format!("changed {e} test:health")]);
        let ty = ComponentType::new("test:health");
        assert_eq!(manager.component(e, &ty), Some(&health(5)));
        assert!(manager
            .save_component(EntityId::from_raw(999), health(1))
            .is_err());
    }

    #[test]
    fn remove_missing_component_is_silent() {
        let (mut manager, log) = subscribed();
        let e = manager.create(Vec::new());
        let removed = manager
            .remove_component(e, &ComponentType::new("test:none"))
            .unwrap();
        assert!(removed.is_none());
        assert!(log.take().is_empty());
    }
}
