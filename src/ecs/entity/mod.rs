//! Entity existence tracking.
//!
//! An entity is nothing more than an occupied slot in a sparse array: there
//! is no per-entity record beyond that. Structural operations that touch
//! *other* registries (attaching a component, running collection-update
//! against every system, freeing components on delete) live on
//! [`crate::ecs::Ecs`], which is the only place that can see the component
//! registry and the system registry at once.

use crate::ecs::id::Id;
use crate::ecs::storage::sparse_array::SparseArray;

#[derive(Default)]
pub struct Entities {
    slots: SparseArray<()>,
}

impl Entities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next free entity id.
    pub fn create(&mut self) -> Id {
        self.slots.insert_free(())
    }

    pub fn exists(&self, id: Id) -> bool {
        self.slots.contains(id)
    }

    /// Free `id`'s slot. Returns `true` if it was occupied.
    pub fn free(&mut self, id: Id) -> bool {
        self.slots.remove(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = Id> + '_ {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// A human-readable, stable rendering of an entity id.
pub fn entity_to_string(id: Id) -> String {
    format!("entity#{}", id.value())
}
