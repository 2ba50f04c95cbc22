//! Component type registry and per-type storage columns.
//!
//! A cheap name-to-id index kept separate from the actual per-type state,
//! registered once and read many times. Registration only ever happens on
//! the owning thread before the worker pool exists, so a plain guarded map
//! is enough here (see DESIGN.md for why `dashmap` isn't pulled in).

mod registry;

pub use registry::{ComponentRegistration, Registry, StorageMode};

use crate::ecs::id::Id;

/// Identifies a single component instance: which type, on which entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentId {
    pub entity: Id,
    pub type_id: Id,
}
