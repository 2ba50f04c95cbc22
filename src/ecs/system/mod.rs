//! System registration, the maintained per-system entity queue, and the
//! per-system event FIFO.
//!
//! A system record pairs an archetype pointer with a thread-safety flag and
//! a dependency set. User behavior is a capability trait (`SystemBehavior`)
//! rather than a function-pointer-plus-userdata callback, since that's the
//! idiomatic shape for dynamic dispatch in safe Rust.

pub mod command;
mod registry;

pub use command::CommandBuffer;
pub use registry::Registry;

use std::ops::Range;
use std::sync::Arc;

use crate::ecs::archetype::Archetype;
use crate::ecs::component::{ComponentId, Registry as ComponentRegistry};
use crate::ecs::id::Id;

/// User behavior attached to a system. `update` runs once per matching
/// entity (or once with an empty slice if the archetype has no required
/// components); `event` runs once per queued event, in FIFO order, after the
/// tick's dispatch plan has finished.
///
/// `components` is ordered to match `archetype.component_types` and each
/// pointer is valid for the duration of the call only.
pub trait SystemBehavior: Send + Sync {
    fn update(&self, entity: Id, components: &[*mut u8]);

    fn event(&self) {}
}

/// Declared scheduling metadata for a system.
#[derive(Debug, Clone, Default)]
pub struct UpdateInfo {
    pub is_thread_safe: bool,
    pub updates_other_entities: bool,
    pub creates_or_deletes: bool,
    pub after_systems: Vec<String>,
}

impl UpdateInfo {
    /// A system is safe to run concurrently with other systems only if it's
    /// declared thread-safe and touches no entity or component outside its
    /// own archetype slice: `is_thread_safe` and not `updates_other_entities`
    /// and not `creates_or_deletes`.
    pub fn derive_thread_safe(&self) -> bool {
        self.is_thread_safe && !self.updates_other_entities && !self.creates_or_deletes
    }
}

/// Everything needed to register a system.
pub struct SystemRegistration {
    pub name: String,
    pub archetype: Archetype,
    pub behavior: Arc<dyn SystemBehavior>,
    pub update_info: UpdateInfo,
}

/// Gather component pointers for `entity` in archetype order into `scratch`,
/// resizing it as needed. Returns `false` if any required component was
/// missing, in which case `scratch` was cleared but left incomplete and
/// must not be passed to `update`.
///
/// An entity present in a system's queue is expected to carry every
/// component the archetype names, so a miss here means the queue has
/// drifted out of sync with the component registry; the caller is
/// responsible for logging and skipping the entity rather than handing the
/// system a short slice.
pub fn gather_components(
    components: &ComponentRegistry,
    archetype: &Archetype,
    entity: Id,
    scratch: &mut Vec<*mut u8>,
) -> bool {
    scratch.clear();
    for &type_id in &archetype.component_types {
        match components.get_by_id(ComponentId { entity, type_id }) {
            Some(ptr) => scratch.push(ptr),
            None => return false,
        }
    }
    true
}

/// Run `system_id`'s update callback over the entities in `range`: if the
/// archetype has no required components the update runs once with no
/// entity; otherwise it runs once per entity present in the system's queue
/// within `range`. `range.end == 0` means "through the end of the queue".
/// Shared by in-line execution, on-thread plan items, and each worker's job
/// loop so the three call sites can never drift apart on entity-gathering
/// behavior.
pub fn run_range(
    system_id: Id,
    range: Range<u32>,
    systems: &Registry,
    components: &ComponentRegistry,
    scratch: &mut Vec<*mut u8>,
) {
    systems.with_record(system_id, |record| {
        if record.archetype.component_types.is_empty() {
            record.behavior.update(Id::NONE, &[]);
            return;
        }

        let end = if range.end == 0 { u32::MAX } else { range.end };
        let mut cursor = range.start.saturating_sub(1);
        while let Some(entity) = record.queue.next(cursor) {
            if entity.value() >= end {
                break;
            }
            cursor = entity.value();
            if !gather_components(components, &record.archetype, entity, scratch) {
                log::warn!(
                    "system {system_id}: entity {entity} is missing a required component, skipping"
                );
                continue;
            }
            record.behavior.update(entity, scratch);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::{ComponentRegistration, StorageMode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingSystem {
        calls: Mutex<Vec<Id>>,
    }
    impl SystemBehavior for RecordingSystem {
        fn update(&self, entity: Id, _components: &[*mut u8]) {
            self.calls.lock().unwrap().push(entity);
        }
    }

    #[test]
    fn run_range_visits_only_entities_within_bounds() {
        let components = ComponentRegistry::new();
        components.register(ComponentRegistration::new("Position", 4, StorageMode::Dense));
        let position = components.id_of("Position").unwrap();

        let recorder = Arc::new(RecordingSystem {
            calls: Mutex::new(Vec::new()),
        });
        let mut systems = Registry::new();
        systems.register(SystemRegistration {
            name: "A".to_string(),
            archetype: Archetype::new("a", vec![position]),
            behavior: recorder.clone(),
            update_info: UpdateInfo {
                is_thread_safe: true,
                ..Default::default()
            },
        });
        let system_id = systems.id_of("A").unwrap();

        for raw in 1..=5u32 {
            let entity = Id::from_raw(raw);
            components.create(position, entity);
            systems.collection_update(entity, &components);
        }

        let mut scratch = Vec::new();
        run_range(system_id, 2..4, &systems, &components, &mut scratch);

        let seen = recorder.calls.lock().unwrap().clone();
        assert_eq!(seen, vec![Id::from_raw(2), Id::from_raw(3)]);
    }

    #[test]
    fn run_range_end_zero_means_through_the_end() {
        let components = ComponentRegistry::new();
        components.register(ComponentRegistration::new("Position", 4, StorageMode::Dense));
        let position = components.id_of("Position").unwrap();

        let recorder = Arc::new(RecordingSystem {
            calls: Mutex::new(Vec::new()),
        });
        let mut systems = Registry::new();
        systems.register(SystemRegistration {
            name: "A".to_string(),
            archetype: Archetype::new("a", vec![position]),
            behavior: recorder.clone(),
            update_info: UpdateInfo {
                is_thread_safe: true,
                ..Default::default()
            },
        });
        let system_id = systems.id_of("A").unwrap();

        for raw in 1..=3u32 {
            let entity = Id::from_raw(raw);
            components.create(position, entity);
            systems.collection_update(entity, &components);
        }

        let mut scratch = Vec::new();
        run_range(system_id, 2..0, &systems, &components, &mut scratch);

        let seen = recorder.calls.lock().unwrap().clone();
        assert_eq!(seen, vec![Id::from_raw(2), Id::from_raw(3)]);
    }

    #[test]
    fn run_range_with_empty_archetype_invokes_once_with_no_entity() {
        let components = ComponentRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        struct CountingSystem(Arc<AtomicUsize>);
        impl SystemBehavior for CountingSystem {
            fn update(&self, entity: Id, components: &[*mut u8]) {
                assert!(entity.is_none());
                assert!(components.is_empty());
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let mut systems = Registry::new();
        systems.register(SystemRegistration {
            name: "Tick".to_string(),
            archetype: Archetype::new("empty", vec![]),
            behavior: Arc::new(CountingSystem(calls.clone())),
            update_info: UpdateInfo {
                is_thread_safe: true,
                ..Default::default()
            },
        });
        let system_id = systems.id_of("Tick").unwrap();

        let mut scratch = Vec::new();
        run_range(system_id, 0..0, &systems, &components, &mut scratch);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_range_skips_entity_with_missing_required_component() {
        let components = ComponentRegistry::new();
        components.register(ComponentRegistration::new("Position", 4, StorageMode::Dense));
        components.register(ComponentRegistration::new("Velocity", 4, StorageMode::Dense));
        let position = components.id_of("Position").unwrap();
        let velocity = components.id_of("Velocity").unwrap();

        let recorder = Arc::new(RecordingSystem {
            calls: Mutex::new(Vec::new()),
        });
        let mut systems = Registry::new();
        systems.register(SystemRegistration {
            name: "A".to_string(),
            archetype: Archetype::new("pv", vec![position, velocity]),
            behavior: recorder.clone(),
            update_info: UpdateInfo {
                is_thread_safe: true,
                ..Default::default()
            },
        });
        let system_id = systems.id_of("A").unwrap();

        let ok_entity = Id::from_raw(1);
        let drifted_entity = Id::from_raw(2);
        for entity in [ok_entity, drifted_entity] {
            components.create(position, entity);
            components.create(velocity, entity);
            systems.collection_update(entity, &components);
        }
        // Simulate the queue drifting out of sync with the registry: the
        // component is removed without a matching collection_update.
        components.delete(velocity, drifted_entity);

        let mut scratch = Vec::new();
        run_range(system_id, 1..0, &systems, &components, &mut scratch);

        let seen = recorder.calls.lock().unwrap().clone();
        assert_eq!(seen, vec![ok_entity]);
    }
}
