//! Dynamic component values.
//!
//! A [`Component`] is a named bag of [`FieldValue`]s keyed by field name and
//! tagged with its [`ComponentType`]. Field order is deterministic
//! (`BTreeMap`) so serialized stores are stable across runs.

use crate::entity_ref::EntityRef;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ComponentType
// ---------------------------------------------------------------------------

/// Name of a component type, e.g. `"engine:location"`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentType(Cow<'static, str>);

impl ComponentType {
    /// A component type with a static name, usable in `const` items.
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentType({})", self.0)
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// FieldValue
// ---------------------------------------------------------------------------

/// A single field of a component.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Vec3([f32; 3]),
    List(Vec<FieldValue>),
    Entity(EntityRef),
}

impl FieldValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<[f32; 3]> {
        match self {
            FieldValue::Vec3(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            FieldValue::Entity(r) => Some(r),
            _ => None,
        }
    }

    fn copy_with(&self, strategy: &mut dyn EntityRefCopyStrategy) -> FieldValue {
        match self {
            FieldValue::Entity(r) => FieldValue::Entity(strategy.copy_ref(r)),
            FieldValue::List(items) => {
                FieldValue::List(items.iter().map(|v| v.copy_with(strategy)).collect())
            }
            other => other.clone(),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(i64::from(v))
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_owned())
    }
}

impl From<EntityRef> for FieldValue {
    fn from(v: EntityRef) -> Self {
        FieldValue::Entity(v)
    }
}

// ---------------------------------------------------------------------------
// Copy strategy
// ---------------------------------------------------------------------------

/// Decides what an entity reference becomes when a component is copied.
pub trait EntityRefCopyStrategy {
    fn copy_ref(&mut self, reference: &EntityRef) -> EntityRef;
}

/// Copies references unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCopyStrategy;

impl EntityRefCopyStrategy for IdentityCopyStrategy {
    fn copy_ref(&mut self, reference: &EntityRef) -> EntityRef {
        reference.clone()
    }
}

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// A component instance: a type name plus its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    ty: ComponentType,
    fields: BTreeMap<String, FieldValue>,
}

impl Component {
    pub fn new(ty: ComponentType) -> Self {
        Self {
            ty,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.to_owned(), value.into());
        self
    }

    pub fn component_type(&self) -> &ComponentType {
        &self.ty
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) {
        self.fields.insert(name.to_owned(), value.into());
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub(crate) fn from_parts(ty: ComponentType, fields: BTreeMap<String, FieldValue>) -> Self {
        Self { ty, fields }
    }

    /// Deep copy, passing every embedded entity reference (including those
    /// nested in lists) through `strategy`.
    pub fn copy_with(&self, strategy: &mut dyn EntityRefCopyStrategy) -> Component {
        Component {
            ty: self.ty.clone(),
            fields: self
                .fields
                .iter()
                .map(|(name, value)| (name.clone(), value.copy_with(strategy)))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;

    struct Counting {
        seen: Vec<EntityId>,
    }

    impl EntityRefCopyStrategy for Counting {
        fn copy_ref(&mut self, reference: &EntityRef) -> EntityRef {
            if let Some(id) = reference.id() {
                self.seen.push(id);
            }
            EntityRef::Null
        }
    }

    #[test]
    fn builder_sets_fields() {
        let c = Component::new(ComponentType::new("test:health"))
            .with("value", 10)
            .with("alive", true);
        assert_eq!(c.field("value"), Some(&FieldValue::Int(10)));
        assert_eq!(c.field("alive").and_then(FieldValue::as_bool), Some(true));
        assert_eq!(c.component_type().name(), "test:health");
    }

    #[test]
    fn copy_with_rewrites_nested_references() {
        let c = Component::new(ComponentType::new("test:inventory"))
            .with("holder", EntityRef::Live(EntityId::new(1)))
            .with(
                "items",
                FieldValue::List(vec![
                    FieldValue::Entity(EntityRef::Live(EntityId::new(2))),
                    FieldValue::Int(5),
                ]),
            );
        let mut strategy = Counting { seen: Vec::new() };
        let copy = c.copy_with(&mut strategy);

        strategy.seen.sort();
        assert_eq!(strategy.seen, vec![EntityId::new(1), EntityId::new(2)]);
        assert_eq!(copy.field("holder"), Some(&FieldValue::Entity(EntityRef::Null)));
        assert_eq!(
            copy.field("items"),
            Some(&FieldValue::List(vec![
                FieldValue::Entity(EntityRef::Null),
                FieldValue::Int(5)
            ]))
        );
    }

    #[test]
    fn static_and_owned_types_compare_equal() {
        const LOCATION: ComponentType = ComponentType::from_static("engine:location");
        assert_eq!(LOCATION, ComponentType::new("engine:location"));
    }
}
