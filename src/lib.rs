//! A single-process entity-component-system dispatch engine: component
//! storage, entity existence, system registration, a dependency-respecting
//! scheduler, a worker thread pool and deferred command buffers.
//!
//! See [`ecs::Ecs`] for the facade tying these together.

pub mod ecs;

pub use ecs::id::Id;
pub use ecs::Ecs;
