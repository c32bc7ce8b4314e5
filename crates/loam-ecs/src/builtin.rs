//! Well-known components the persistence layer reads.
//!
//! These are ordinary [`Component`]s; the structs here are typed views that
//! convert to and from the dynamic representation.

use crate::component::{Component, ComponentType, FieldValue};
use crate::entity_ref::EntityRef;

/// Persistence and ownership flags of an entity.
pub const ENTITY_INFO: ComponentType = ComponentType::from_static("engine:entity-info");
/// World position of an entity.
pub const LOCATION: ComponentType = ComponentType::from_static("engine:location");
/// Marks the entity that represents a connected network client.
pub const CLIENT: ComponentType = ComponentType::from_static("engine:client");

// ---------------------------------------------------------------------------
// EntityInfo
// ---------------------------------------------------------------------------

/// Typed view of [`ENTITY_INFO`].
///
/// An entity without this component is persistent, not always-relevant and
/// unowned.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityInfo {
    pub persistent: bool,
    pub always_relevant: bool,
    pub owner: EntityRef,
    pub parent_prefab: Option<String>,
}

impl Default for EntityInfo {
    fn default() -> Self {
        Self {
            persistent: true,
            always_relevant: false,
            owner: EntityRef::Null,
            parent_prefab: None,
        }
    }
}

impl EntityInfo {
    pub fn transient() -> Self {
        Self {
            persistent: false,
            ..Self::default()
        }
    }

    pub fn owned_by(owner: impl Into<EntityRef>) -> Self {
        Self {
            owner: owner.into(),
            ..Self::default()
        }
    }

    pub fn from_component(component: &Component) -> Self {
        let defaults = Self::default();
        Self {
            persistent: component
                .field("persistent")
                .and_then(FieldValue::as_bool)
                .unwrap_or(defaults.persistent),
            always_relevant: component
                .field("always_relevant")
                .and_then(FieldValue::as_bool)
                .unwrap_or(defaults.always_relevant),
            owner: component
                .field("owner")
                .and_then(FieldValue::as_entity)
                .cloned()
                .unwrap_or_default(),
            parent_prefab: component
                .field("parent_prefab")
                .and_then(FieldValue::as_text)
                .map(str::to_owned),
        }
    }

    pub fn to_component(&self) -> Component {
        let mut component = Component::new(ENTITY_INFO)
            .with("persistent", self.persistent)
            .with("always_relevant", self.always_relevant)
            .with("owner", self.owner.clone());
        if let Some(prefab) = &self.parent_prefab {
            component.set("parent_prefab", prefab.as_str());
        }
        component
    }
}

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// Typed view of [`LOCATION`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub world_position: [f32; 3],
}

impl Location {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            world_position: [x, y, z],
        }
    }

    pub fn from_component(component: &Component) -> Option<Self> {
        component
            .field("world_position")
            .and_then(FieldValue::as_vec3)
            .map(|world_position| Self { world_position })
    }

    pub fn to_component(&self) -> Component {
        Component::new(LOCATION).with("world_position", FieldValue::Vec3(self.world_position))
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Typed view of [`CLIENT`]: the player's character, if spawned.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Client {
    pub character: EntityRef,
}

impl Client {
    pub fn from_component(component: &Component) -> Self {
        Self {
            character: component
                .field("character")
                .and_then(FieldValue::as_entity)
                .cloned()
                .unwrap_or_default(),
        }
    }

    pub fn to_component(&self) -> Component {
        Component::new(CLIENT).with("character", self.character.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let info = EntityInfo::from_component(&Component::new(ENTITY_INFO));
        assert_eq!(info, EntityInfo::default());
        assert!(info.persistent);
    }

    #[test]
    fn entity_info_roundtrips_through_component() {
        let info = EntityInfo {
            persistent: false,
            always_relevant: true,
            owner: EntityRef::Live(EntityId::new(4)),
            parent_prefab: Some("core:chest".to_owned()),
        };
        assert_eq!(EntityInfo::from_component(&info.to_component()), info);
    }

    #[test]
    fn location_requires_position_field() {
        assert_eq!(Location::from_component(&Component::new(LOCATION)), None);
        let loc = Location::new(1.0, -2.5, 3.0);
        assert_eq!(Location::from_component(&loc.to_component()), Some(loc));
    }
}
