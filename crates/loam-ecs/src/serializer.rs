//! Conversion between live entities and their serde form.
//!
//! [`EntityData`] is the storage representation of one entity. Entity
//! references are flattened to `Option<EntityId>`: the id survives only if
//! the referenced entity exists in the manager doing the serializing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::component::{Component, ComponentType, FieldValue};
use crate::entity::EntityId;
use crate::entity_ref::EntityRef;
use crate::manager::EntityManager;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Storage types
// ---------------------------------------------------------------------------

/// A field value as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Vec3([f32; 3]),
    List(Vec<StoredValue>),
    Entity(Option<EntityId>),
}

/// One component as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentData {
    #[serde(rename = "type")]
    pub ty: ComponentType,
    pub fields: BTreeMap<String, StoredValue>,
}

/// One entity as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityData {
    pub id: EntityId,
    pub components: Vec<ComponentData>,
}

impl EntityData {
    pub fn component(&self, ty: &ComponentType) -> Option<&ComponentData> {
        self.components.iter().find(|c| &c.ty == ty)
    }
}

// ---------------------------------------------------------------------------
// EntitySerializer
// ---------------------------------------------------------------------------

/// Turns active entities into [`EntityData`] and back.
#[derive(Debug, Default, Clone, Copy)]
pub struct EntitySerializer;

impl EntitySerializer {
    pub fn new() -> Self {
        Self
    }

    /// Serialize an active entity of `manager`.
    ///
    /// Fails on a missing entity and on any delayed reference that is unbound
    /// or bound to a different manager.
    pub fn serialize(&self, manager: &EntityManager, id: EntityId) -> Result<EntityData, EcsError> {
        let components = manager
            .components(id)
            .ok_or(EcsError::NoSuchEntity { entity: id })?;
        let components = components
            .map(|c| self.serialize_component(manager, c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(EntityData { id, components })
    }

    pub fn serialize_component(
        &self,
        manager: &EntityManager,
        component: &Component,
    ) -> Result<ComponentData, EcsError> {
        let fields = component
            .fields()
            .iter()
            .map(|(name, value)| Ok((name.clone(), store_value(manager, value)?)))
            .collect::<Result<BTreeMap<_, _>, EcsError>>()?;
        Ok(ComponentData {
            ty: component.component_type().clone(),
            fields,
        })
    }

    /// Rebuild the components of a stored entity. References come back as
    /// [`EntityRef::Live`].
    pub fn deserialize(&self, data: &EntityData) -> (EntityId, Vec<Component>) {
        let components = data
            .components
            .iter()
            .map(|c| {
                let fields = c
                    .fields
                    .iter()
                    .map(|(name, value)| (name.clone(), load_value(value)))
                    .collect();
                Component::from_parts(c.ty.clone(), fields)
            })
            .collect();
        (data.id, components)
    }
}

fn store_value(manager: &EntityManager, value: &FieldValue) -> Result<StoredValue, EcsError> {
    Ok(match value {
        FieldValue::Null => StoredValue::Null,
        FieldValue::Bool(v) => StoredValue::Bool(*v),
        FieldValue::Int(v) => StoredValue::Int(*v),
        FieldValue::Float(v) => StoredValue::Float(*v),
        FieldValue::Text(v) => StoredValue::Text(v.clone()),
        FieldValue::Vec3(v) => StoredValue::Vec3(*v),
        FieldValue::List(items) => StoredValue::List(
            items
                .iter()
                .map(|v| store_value(manager, v))
                .collect::<Result<_, _>>()?,
        ),
        FieldValue::Entity(r) => StoredValue::Entity(r.resolve(manager)?),
    })
}

fn load_value(value: &StoredValue) -> FieldValue {
    match value {
        StoredValue::Null => FieldValue::Null,
        StoredValue::Bool(v) => FieldValue::Bool(*v),
        StoredValue::Int(v) => FieldValue::Int(*v),
        StoredValue::Float(v) => FieldValue::Float(*v),
        StoredValue::Text(v) => FieldValue::Text(v.clone()),
        StoredValue::Vec3(v) => FieldValue::Vec3(*v),
        StoredValue::List(items) => FieldValue::List(items.iter().map(load_value).collect()),
        StoredValue::Entity(id) => FieldValue::Entity(EntityRef::from(*id)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
