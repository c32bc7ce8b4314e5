//! Loam ECS -- a small id-addressed entity-component manager.
//!
//! Entities are numeric ids holding dynamic [`Component`](component::Component)s.
//! Every mutation is reported synchronously to registered
//! [`EntityChangeSubscriber`](manager::EntityChangeSubscriber)s, which is what
//! the persistence layer builds its change tracking on.
//!
//! # Quick Start
//!
//! ```
//! use loam_ecs::prelude::*;
//!
//! let mut manager = EntityManager::new();
//! let chest = manager.create(vec![
//!     Location::new(4.0, 10.0, -3.0).to_component(),
//!     Component::new(ComponentType::new("core:inventory")).with("slots", 9),
//! ]);
//!
//! let data = EntitySerializer::new().serialize(&manager, chest).unwrap();
//! assert_eq!(data.id, chest);
//! assert_eq!(data.components.len(), 2);
//! ```

#![deny(unsafe_code)]

pub mod builtin;
pub mod component;
pub mod entity;
pub mod entity_ref;
pub mod manager;
pub mod serializer;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity is neither active nor deactivated.
    #[error("entity {entity:?} does not exist")]
    NoSuchEntity { entity: entity::EntityId },

    /// An entity with this id is already active.
    #[error("entity {entity:?} already exists")]
    EntityAlreadyExists { entity: entity::EntityId },

    /// A delayed reference was used before being bound to a manager.
    #[error("delayed reference to {entity:?} used before being bound")]
    UnboundReference { entity: entity::EntityId },

    /// A delayed reference was bound a second time.
    #[error("delayed reference to {entity:?} is already bound")]
    AlreadyBound { entity: entity::EntityId },

    /// A delayed reference was resolved against a manager it is not bound to.
    #[error("delayed reference to {entity:?} is bound to {bound_to} but was used with {used_with}")]
    WrongManager {
        entity: entity::EntityId,
        bound_to: entity::ManagerId,
        used_with: entity::ManagerId,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::builtin::{Client, EntityInfo, Location, CLIENT, ENTITY_INFO, LOCATION};
    pub use crate::component::{
        Component, ComponentType, EntityRefCopyStrategy, FieldValue, IdentityCopyStrategy,
    };
    pub use crate::entity::{EntityId, ManagerId};
    pub use crate::entity_ref::{DelayedEntityRef, DelayedState, EntityRef};
    pub use crate::manager::{EntityChangeSubscriber, EntityManager};
    pub use crate::serializer::{ComponentData, EntityData, EntitySerializer, StoredValue};
    pub use crate::EcsError;
}
