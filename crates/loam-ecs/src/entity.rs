//! Entity identifiers and manager identity.
//!
//! An [`EntityId`] is a plain 64-bit number handed out by a per-manager
//! counter. Ids are never recycled within one save, so an id read back from
//! disk names the same entity that was written.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A numeric entity identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Construct an `EntityId` from its raw number.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Reconstruct from a raw `u64`.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// IdCounter
// ---------------------------------------------------------------------------

/// Hands out monotonically increasing [`EntityId`]s.
///
/// Ids start at 1; zero is reserved so that a serialized `0` is never
/// mistaken for a live entity.
#[derive(Debug, Clone)]
pub struct IdCounter {
    next: u64,
}

impl IdCounter {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Allocate the next id.
    pub fn allocate(&mut self) -> EntityId {
        let id = EntityId(self.next);
        self.next += 1;
        id
    }

    /// The id that the next call to [`allocate`](Self::allocate) returns.
    pub fn next_id(&self) -> u64 {
        self.next
    }

    /// Overwrite the counter.
    pub fn set_next_id(&mut self, next: u64) {
        self.next = next;
    }

    /// Make sure `id` can never be allocated again.
    pub fn observe(&mut self, id: EntityId) {
        if id.0 >= self.next {
            self.next = id.0 + 1;
        }
    }
}

impl Default for IdCounter {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ManagerId
// ---------------------------------------------------------------------------

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one [`EntityManager`](crate::manager::EntityManager).
///
/// Delayed references remember the manager they were bound to and refuse to
/// resolve against any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManagerId(u64);

impl ManagerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "manager#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_starts_at_one() {
        let mut counter = IdCounter::new();
        assert_eq!(counter.allocate(), EntityId::new(1));
        assert_eq!(counter.allocate(), EntityId::new(2));
        assert_eq!(counter.next_id(), 3);
    }

    #[test]
    fn observe_only_moves_forward() {
        let mut counter = IdCounter::new();
        counter.observe(EntityId::new(10));
        assert_eq!(counter.next_id(), 11);
        counter.observe(EntityId::new(4));
        assert_eq!(counter.next_id(), 11);
    }

    #[test]
    fn raw_roundtrip() {
        let id = EntityId::new(42);
        assert_eq!(EntityId::from_raw(id.to_raw()), id);
        assert_eq!(format!("{id}"), "42");
        assert_eq!(format!("{id:?}"), "EntityId(42)");
    }

    #[test]
    fn manager_ids_are_unique() {
        assert_ne!(ManagerId::next(), ManagerId::next());
    }
}
