//! References from one entity's component data to another entity.
//!
//! Components held by the live [`EntityManager`] use [`EntityRef::Live`]. When
//! a component is copied for an off-thread save, live references are swapped
//! for [`DelayedEntityRef`]s: forward references that carry only the numeric
//! id until they are bound, exactly once, to the manager that will resolve
//! them.
//!
//! ```
//! use loam_ecs::prelude::*;
//!
//! let mut manager = EntityManager::new();
//! let target = manager.create(Vec::new());
//!
//! let delayed = DelayedEntityRef::new(target);
//! assert!(delayed.resolve(&manager).is_err());
//!
//! delayed.bind_to(&manager).unwrap();
//! assert_eq!(delayed.resolve(&manager).unwrap(), Some(target));
//! ```

use crate::entity::{EntityId, ManagerId};
use crate::manager::EntityManager;
use crate::EcsError;
use std::fmt;
use std::sync::{Arc, OnceLock};

// ---------------------------------------------------------------------------
// EntityRef
// ---------------------------------------------------------------------------

/// A reference stored inside a component field.
#[derive(Clone, Default)]
pub enum EntityRef {
    /// Points at nothing.
    #[default]
    Null,
    /// A reference owned by the manager that holds the component.
    Live(EntityId),
    /// A forward reference created while copying a component for saving.
    Delayed(DelayedEntityRef),
}

impl EntityRef {
    /// The id this reference was created for, bound or not.
    pub fn id(&self) -> Option<EntityId> {
        match self {
            EntityRef::Null => None,
            EntityRef::Live(id) => Some(*id),
            EntityRef::Delayed(delayed) => Some(delayed.id()),
        }
    }

    /// Resolve the reference against `manager`.
    ///
    /// Returns `Ok(None)` for a null reference or a target that no longer
    /// exists in that manager. Delayed references fail when unbound or bound
    /// elsewhere.
    pub fn resolve(&self, manager: &EntityManager) -> Result<Option<EntityId>, EcsError> {
        match self {
            EntityRef::Null => Ok(None),
            EntityRef::Live(id) => Ok(manager.exists(*id).then_some(*id)),
            EntityRef::Delayed(delayed) => delayed.resolve(manager),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, EntityRef::Null)
    }
}

impl From<EntityId> for EntityRef {
    fn from(id: EntityId) -> Self {
        EntityRef::Live(id)
    }
}

impl From<Option<EntityId>> for EntityRef {
    fn from(id: Option<EntityId>) -> Self {
        id.map_or(EntityRef::Null, EntityRef::Live)
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (EntityRef::Null, EntityRef::Null) => true,
            (EntityRef::Live(a), EntityRef::Live(b)) => a == b,
            (EntityRef::Delayed(a), EntityRef::Delayed(b)) => a.id() == b.id(),
            _ => false,
        }
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Null => write!(f, "EntityRef::Null"),
            EntityRef::Live(id) => write!(f, "EntityRef::Live({id})"),
            EntityRef::Delayed(delayed) => write!(f, "EntityRef::Delayed({:?})", delayed.state()),
        }
    }
}

// ---------------------------------------------------------------------------
// DelayedEntityRef
// ---------------------------------------------------------------------------

/// Observable state of a [`DelayedEntityRef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayedState {
    /// Created but not yet bound; every use fails.
    Unbound(EntityId),
    /// Bound to `manager`. `target` is `None` if the entity did not exist
    /// there at bind time.
    Bound {
        manager: ManagerId,
        target: Option<EntityId>,
    },
}

#[derive(Debug, Clone, Copy)]
struct Binding {
    manager: ManagerId,
    target: Option<EntityId>,
}

#[derive(Debug)]
struct DelayedInner {
    id: EntityId,
    binding: OnceLock<Binding>,
}

/// A reference by id that is bound to an [`EntityManager`] after creation.
///
/// Clones share the binding, so binding the copy held by a delta recorder
/// binds every component snapshot that carries the same reference.
#[derive(Clone)]
pub struct DelayedEntityRef {
    inner: Arc<DelayedInner>,
}

impl DelayedEntityRef {
    pub fn new(id: EntityId) -> Self {
        Self {
            inner: Arc::new(DelayedInner {
                id,
                binding: OnceLock::new(),
            }),
        }
    }

    pub fn id(&self) -> EntityId {
        self.inner.id
    }

    pub fn state(&self) -> DelayedState {
        match self.inner.binding.get() {
            None => DelayedState::Unbound(self.inner.id),
            Some(binding) => DelayedState::Bound {
                manager: binding.manager,
                target: binding.target,
            },
        }
    }

    pub fn is_bound(&self) -> bool {
        self.inner.binding.get().is_some()
    }

    /// Bind to `manager`. A second bind is an error.
    pub fn bind_to(&self, manager: &EntityManager) -> Result<(), EcsError> {
        let id = self.inner.id;
        let binding = Binding {
            manager: manager.manager_id(),
            target: manager.exists(id).then_some(id),
        };
        self.inner
            .binding
            .set(binding)
            .map_err(|_| EcsError::AlreadyBound { entity: id })
    }

    /// Resolve against the manager this reference was bound to.
    pub fn resolve(&self, manager: &EntityManager) -> Result<Option<EntityId>, EcsError> {
        let id = self.inner.id;
        let binding = self
            .inner
            .binding
            .get()
            .ok_or(EcsError::UnboundReference { entity: id })?;
        if binding.manager != manager.manager_id() {
            return Err(EcsError::WrongManager {
                entity: id,
                bound_to: binding.manager,
                used_with: manager.manager_id(),
            });
        }
        Ok(binding.target.filter(|target| manager.exists(*target)))
    }
}

impl fmt::Debug for DelayedEntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DelayedEntityRef({:?})", self.state())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbound_reference_fails_fast() {
        let manager = EntityManager::new();
        let delayed = DelayedEntityRef::new(EntityId::new(7));
        assert_eq!(delayed.state(), DelayedState::Unbound(EntityId::new(7)));
        assert!(matches!(
            delayed.resolve(&manager),
            Err(EcsError::UnboundReference { .. })
        ));
    }

    #[test]
    fn double_bind_is_an_error() {
        let manager = EntityManager::new();
        let delayed = DelayedEntityRef::new(EntityId::new(1));
        delayed.bind_to(&manager).unwrap();
        assert!(matches!(
            delayed.bind_to(&manager),
            Err(EcsError::AlreadyBound { .. })
        ));
    }

    #[test]
    fn wrong_manager_is_an_error() {
        let first = EntityManager::new();
        let second = EntityManager::new();
        let delayed = DelayedEntityRef::new(EntityId::new(1));
        delayed.bind_to(&first).unwrap();
        assert!(matches!(
            delayed.resolve(&second),
            Err(EcsError::WrongManager { .. })
        ));
    }

    #[test]
    fn bound_reference_observes_destroy() {
        let mut manager = EntityManager::new();
        let target = manager.create(Vec::new());
        let delayed = DelayedEntityRef::new(target);
        delayed.bind_to(&manager).unwrap();
        assert_eq!(delayed.resolve(&manager).unwrap(), Some(target));

        manager.destroy(target).unwrap();
        assert_eq!(delayed.resolve(&manager).unwrap(), None);
    }

    #[test]
    fn clones_share_binding() {
        let manager = EntityManager::new();
        let delayed = DelayedEntityRef::new(EntityId::new(3));
        let copy = delayed.clone();
        delayed.bind_to(&manager).unwrap();
        assert!(copy.is_bound());
    }

    #[test]
    fn live_ref_resolves_only_existing_entities() {
        let mut manager = EntityManager::new();
        let id = manager.create(Vec::new());
        assert_eq!(EntityRef::Live(id).resolve(&manager).unwrap(), Some(id));
        assert_eq!(
            EntityRef::Live(EntityId::new(999)).resolve(&manager).unwrap(),
            None
        );
        assert_eq!(EntityRef::Null.resolve(&manager).unwrap(), None);
    }
}
