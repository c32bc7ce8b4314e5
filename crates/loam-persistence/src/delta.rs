//! Change tracking between saves.
//!
//! The [`EntitySetDeltaRecorder`] observes the live entity manager and keeps,
//! per persistent entity, the latest value of every changed component and the
//! set of removed component types, plus the ids destroyed or deactivated since
//! the last snapshot. Component values are deep-copied with every entity
//! reference swapped for a [`DelayedEntityRef`], so a recorder never holds a
//! live reference into the simulation's manager.
//!
//! A recorder is never cleared. When a save starts, the storage manager swaps
//! in a fresh one and hands the old one to the save transaction.

use std::collections::{BTreeMap, BTreeSet};

use loam_ecs::component::{Component, ComponentType, EntityRefCopyStrategy};
use loam_ecs::entity::EntityId;
use loam_ecs::entity_ref::{DelayedEntityRef, EntityRef};
use loam_ecs::manager::{EntityChangeSubscriber, EntityManager};
use loam_ecs::EcsError;
use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// EntityDelta
// ---------------------------------------------------------------------------

/// Pending component changes of one entity.
#[derive(Debug, Clone, Default)]
pub struct EntityDelta {
    changed: BTreeMap<ComponentType, Component>,
    removed: BTreeSet<ComponentType>,
}

impl EntityDelta {
    /// Record the latest value of a component, cancelling a pending removal.
    pub fn set_changed_component(&mut self, component: Component) {
        let ty = component.component_type().clone();
        self.removed.remove(&ty);
        self.changed.insert(ty, component);
    }

    /// Record a removal, dropping any pending change of that type.
    pub fn remove_component(&mut self, ty: &ComponentType) {
        self.changed.remove(ty);
        self.removed.insert(ty.clone());
    }

    pub fn changed_components(&self) -> impl Iterator<Item = &Component> {
        self.changed.values()
    }

    pub fn removed_components(&self) -> impl Iterator<Item = &ComponentType> {
        self.removed.iter()
    }

    pub fn changed_component(&self, ty: &ComponentType) -> Option<&Component> {
        self.changed.get(ty)
    }
}

// ---------------------------------------------------------------------------
// Copy strategy
// ---------------------------------------------------------------------------

/// Replaces entity references with delayed ones and remembers each of them
/// so they can be bound later.
struct DelayedRefCopyStrategy<'a> {
    delayed_refs: &'a mut Vec<DelayedEntityRef>,
}

impl EntityRefCopyStrategy for DelayedRefCopyStrategy<'_> {
    fn copy_ref(&mut self, reference: &EntityRef) -> EntityRef {
        let delayed = match reference {
            EntityRef::Null => return EntityRef::Null,
            EntityRef::Live(id) => DelayedEntityRef::new(*id),
            EntityRef::Delayed(existing) if existing.is_bound() => {
                DelayedEntityRef::new(existing.id())
            }
            EntityRef::Delayed(existing) => existing.clone(),
        };
        self.delayed_refs.push(delayed.clone());
        EntityRef::Delayed(delayed)
    }
}

// ---------------------------------------------------------------------------
// EntitySetDeltaRecorder
// ---------------------------------------------------------------------------

/// Accumulated changes of all persistent entities since the last snapshot.
#[derive(Debug, Default)]
pub struct EntitySetDeltaRecorder {
    entity_deltas: BTreeMap<EntityId, EntityDelta>,
    destroyed: BTreeSet<EntityId>,
    deactivated: BTreeSet<EntityId>,
    delayed_refs: Vec<DelayedEntityRef>,
}

impl EntitySetDeltaRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_entity_component_change(
        &mut self,
        manager: &EntityManager,
        entity: EntityId,
        ty: &ComponentType,
    ) {
        if !manager.is_persistent(entity) {
            return;
        }
        if let Some(component) = manager.component(entity, ty) {
            self.record_change(entity, component);
        }
    }

    pub fn on_entity_component_removed(
        &mut self,
        manager: &EntityManager,
        entity: EntityId,
        ty: &ComponentType,
    ) {
        if manager.is_persistent(entity) {
            self.entity_deltas
                .entry(entity)
                .or_default()
                .remove_component(ty);
        }
    }

    /// Destroy wins over any change recorded earlier in this cycle.
    pub fn on_entity_destroyed(&mut self, manager: &EntityManager, entity: EntityId) {
        if manager.is_persistent(entity) {
            self.entity_deltas.remove(&entity);
            self.destroyed.insert(entity);
        }
    }

    pub fn on_before_deactivation(&mut self, manager: &EntityManager, entity: EntityId) {
        if manager.is_persistent(entity) {
            self.deactivated.insert(entity);
        }
    }

    /// A reloaded entity is recorded in full so the save thread's copy is
    /// brought back up to date.
    pub fn on_reactivation(&mut self, manager: &EntityManager, entity: EntityId) {
        if !manager.is_persistent(entity) {
            return;
        }
        self.deactivated.remove(&entity);
        if let Some(components) = manager.components(entity) {
            for component in components {
                self.record_change(entity, component);
            }
        }
    }

    fn record_change(&mut self, entity: EntityId, component: &Component) {
        let mut strategy = DelayedRefCopyStrategy {
            delayed_refs: &mut self.delayed_refs,
        };
        let copy = component.copy_with(&mut strategy);
        self.entity_deltas
            .entry(entity)
            .or_default()
            .set_changed_component(copy);
    }

    // -- accessors ----------------------------------------------------------

    pub fn entity_deltas(&self) -> &BTreeMap<EntityId, EntityDelta> {
        &self.entity_deltas
    }

    pub fn destroyed_entities(&self) -> &BTreeSet<EntityId> {
        &self.destroyed
    }

    pub fn deactivated_entities(&self) -> &BTreeSet<EntityId> {
        &self.deactivated
    }

    pub fn is_empty(&self) -> bool {
        self.entity_deltas.is_empty() && self.destroyed.is_empty() && self.deactivated.is_empty()
    }

    /// Bind every delayed reference created by this recorder to `manager`.
    pub fn bind_all_delayed_entity_refs_to(&self, manager: &EntityManager) -> Result<(), EcsError> {
        for delayed in &self.delayed_refs {
            if !delayed.is_bound() {
                delayed.bind_to(manager)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DeltaTracker
// ---------------------------------------------------------------------------

/// Subscriber registered with the live manager. Forwards to the current
/// recorder and swaps it out when a save takes the accumulated changes.
#[derive(Debug, Default)]
pub(crate) struct DeltaTracker {
    recorder: Mutex<EntitySetDeltaRecorder>,
}

impl DeltaTracker {
    /// Take the current recorder, leaving a fresh one in its place.
    pub(crate) fn take(&self) -> EntitySetDeltaRecorder {
        std::mem::replace(&mut *self.recorder.lock(), EntitySetDeltaRecorder::new())
    }
}

impl EntityChangeSubscriber for DeltaTracker {
    fn on_component_changed(&self, manager: &EntityManager, entity: EntityId, ty: &ComponentType) {
        self.recorder
            .lock()
            .on_entity_component_change(manager, entity, ty);
    }

    fn on_component_removed(&self, manager: &EntityManager, entity: EntityId, ty: &ComponentType) {
        self.recorder
            .lock()
            .on_entity_component_removed(manager, entity, ty);
    }

    fn on_entity_destroyed(&self, manager: &EntityManager, entity: EntityId) {
        self.recorder.lock().on_entity_destroyed(manager, entity);
    }

    fn on_before_deactivation(&self, manager: &EntityManager, entity: EntityId) {
        self.recorder.lock().on_before_deactivation(manager, entity);
    }

    fn on_reactivation(&self, manager: &EntityManager, entity: EntityId) {
        self.recorder.lock().on_reactivation(manager, entity);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loam_ecs::prelude::*;
    use std::sync::Arc;

    // -- helpers ------------------------------------------------------------

    fn value(v: i64) -> Component {
        Component::new(ComponentType::new("test:c")).with("value", v)
    }

    fn tracked() -> (EntityManager, Arc<DeltaTracker>) {
        let mut manager = EntityManager::new();
        let tracker = Arc::new(DeltaTracker::default());
        manager.subscribe(tracker.clone());
        (manager, tracker)
    }

    fn recorded_value(recorder: &EntitySetDeltaRecorder, e: EntityId) -> Option<i64> {
        recorder.entity_deltas()[&e]
            .changed_component(&ComponentType::new("test:c"))
            .and_then(|c| c.field("value"))
            .and_then(FieldValue::as_int)
    }

    // -- tests --------------------------------------------------------------

    #[test]
    fn latest_change_wins() {
        let (mut manager, tracker) = tracked();
        let e = manager.create(vec![value(1)]);
        manager.add_component(e, value(2)).unwrap();
        manager.add_component(e, value(3)).unwrap();
        let recorder = tracker.take();
        assert_eq!(recorded_value(&recorder, e), Some(3));
    }

    #[test]
    fn destroy_drops_pending_changes() {
        let (mut manager, tracker) = tracked();
        let e = manager.create(vec![value(1)]);
        manager.destroy(e).unwrap();
        let recorder = tracker.take();
        assert!(!recorder.entity_deltas().contains_key(&e));
        assert!(recorder.destroyed_entities().contains(&e));
    }

    #[test]
    fn transient_entities_are_ignored() {
        let (mut manager, tracker) = tracked();
        let e = manager.create(vec![EntityInfo::transient().to_component(), value(1)]);
        manager.destroy(e).unwrap();
        assert!(tracker.take().is_empty());
    }

    #[test]
    fn remove_then_add_cancels_removal() {
        let (mut manager, tracker) = tracked();
        let e = manager.create(vec![value(1)]);
        let ty = ComponentType::new("test:c");
        manager.remove_component(e, &ty).unwrap();
        {
            let recorder = tracker.take();
            let delta = &recorder.entity_deltas()[&e];
            assert_eq!(delta.removed_components().collect::<Vec<_>>(), vec![&ty]);
            assert!(delta.changed_component(&ty).is_none());
        }
        manager.remove_component(e, &ty).unwrap();
        manager.add_component(e, value(4)).unwrap();
        let recorder = tracker.take();
        let delta = &recorder.entity_deltas()[&e];
        assert_eq!(delta.removed_components().count(), 0);
        assert_eq!(recorded_value(&recorder, e), Some(4));
    }

    #[test]
    fn copies_hold_unbound_delayed_references() {
        let (mut manager, tracker) = tracked();
        let owner = manager.create(Vec::new());
        let e = manager.create(vec![EntityInfo::owned_by(owner).to_component()]);
        let recorder = tracker.take();

        let info = recorder.entity_deltas()[&e]
            .changed_component(&ENTITY_INFO)
            .map(EntityInfo::from_component)
            .unwrap();
        let EntityRef::Delayed(delayed) = info.owner else {
            panic!("expected delayed owner reference");
        };
        assert_eq!(delayed.state(), DelayedState::Unbound(owner));

        let private = EntityManager::new();
        recorder.bind_all_delayed_entity_refs_to(&private).unwrap();
        assert!(delayed.is_bound());
        assert_eq!(delayed.resolve(&private).unwrap(), None);
    }

    #[test]
    fn deactivation_and_reactivation_are_tracked() {
        let (mut manager, tracker) = tracked();
        let e = manager.create(vec![value(7)]);
        tracker.take();

        manager.deactivate_for_storage(e).unwrap();
        let recorder = tracker.take();
        assert!(recorder.deactivated_entities().contains(&e));

        manager.reactivate(e).unwrap();
        let recorder = tracker.take();
        assert!(!recorder.deactivated_entities().contains(&e));
        assert_eq!(recorded_value(&recorder, e), Some(7));
    }

    #[test]
    fn take_replaces_recorder() {
        let (mut manager, tracker) = tracked();
        let e = manager.create(vec![value(1)]);
        let first = tracker.take();
        manager.add_component(e, value(2)).unwrap();
        assert_eq!(recorded_value(&first, e), Some(1));
        assert_eq!(recorded_value(&tracker.take(), e), Some(2));
    }
}
