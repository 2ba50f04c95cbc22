use std::sync::{Arc, RwLock};

use crossbeam::queue::SegQueue;
use log::warn;

use crate::ecs::archetype::Archetype;
use crate::ecs::component::Registry as ComponentRegistry;
use crate::ecs::id::Id;
use crate::ecs::storage::hash_map::HashMap as IdHashMap;
use crate::ecs::storage::hash_set::HashSet as IdHashSet;
use crate::ecs::storage::sparse_array::SparseArray;
use crate::ecs::system::{SystemBehavior, SystemRegistration};

/// A registered system: its archetype, behavior, scheduling metadata, and
/// its two pieces of owned mutable state, the entity queue and the event
/// FIFO.
pub struct SystemRecord {
    pub name: String,
    pub name_hash: Id,
    pub archetype: Archetype,
    pub behavior: Arc<dyn SystemBehavior>,
    pub is_thread_safe: bool,
    pub after_systems: IdHashSet,
    pub queue: SparseArray<()>,
    events: SegQueue<()>,
}

impl SystemRecord {
    /// Smallest present entity index in the queue, if any.
    pub fn first_present(&self) -> Option<u32> {
        self.queue.next(0).map(Id::value)
    }

    pub fn last_filled(&self) -> u32 {
        self.queue.last_filled()
    }
}

/// Owns every registered system, in registration order, plus the dirty flag
/// the scheduler consults before rebuilding its plan.
pub struct Registry {
    order: Vec<Id>,
    systems: IdHashMap<RwLock<SystemRecord>>,
    dirty: bool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            systems: IdHashMap::default(),
            dirty: true,
        }
    }

    /// Register a system. Rejects duplicate names, leaving state unchanged.
    pub fn register(&mut self, reg: SystemRegistration) -> bool {
        if reg.name.is_empty() {
            warn!("system_register: empty name rejected");
            return false;
        }
        let name_hash = Id::from_name(&reg.name);
        if self.systems.contains(name_hash) {
            warn!("system_register: duplicate name '{}'", reg.name);
            return false;
        }
        let after_systems = reg
            .update_info
            .after_systems
            .iter()
            .map(|n| Id::from_name(n))
            .collect();
        let record = SystemRecord {
            name: reg.name,
            name_hash,
            archetype: reg.archetype,
            behavior: reg.behavior,
            is_thread_safe: reg.update_info.derive_thread_safe(),
            after_systems,
            queue: SparseArray::default(),
            events: SegQueue::new(),
        };
        self.systems.insert(name_hash, RwLock::new(record));
        self.order.push(name_hash);
        self.dirty = true;
        true
    }

    /// Remove a system by name. No-op if unknown.
    pub fn unregister(&mut self, name: &str) {
        let name_hash = Id::from_name(name);
        if self.systems.delete(name_hash).is_some() {
            self.order.retain(|&id| id != name_hash);
            self.dirty = true;
        }
    }

    pub fn id_of(&self, name: &str) -> Option<Id> {
        let id = Id::from_name(name);
        self.systems.contains(id).then_some(id)
    }

    /// Registration order, survivors only.
    pub fn order(&self) -> &[Id] {
        &self.order
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn with_record<R>(&self, id: Id, f: impl FnOnce(&SystemRecord) -> R) -> Option<R> {
        let lock = self.systems.get(id)?;
        Some(f(&lock.read().expect("system record poisoned")))
    }

    pub fn with_record_mut<R>(&self, id: Id, f: impl FnOnce(&mut SystemRecord) -> R) -> Option<R> {
        let lock = self.systems.get(id)?;
        Some(f(&mut lock.write().expect("system record poisoned")))
    }

    /// Push one event onto `name`'s FIFO. Returns `false` if `name` is unknown.
    pub fn queue_event(&self, name: &str) -> bool {
        let Some(id) = self.id_of(name) else {
            return false;
        };
        self.with_record(id, |record| record.events.push(())).is_some()
    }

    /// Drain every system's event queue, in registration order, invoking its
    /// event callback once per queued event.
    pub fn drain_events(&self) {
        for &id in &self.order {
            self.with_record(id, |record| {
                while record.events.pop().is_some() {
                    record.behavior.event();
                }
            });
        }
    }

    /// Eagerly maintained "collection update": re-derive whether `entity`
    /// belongs in every system's queue given its current component set.
    /// Called after every attach/detach and on creation/deletion.
    pub fn collection_update(&self, entity: Id, components: &ComponentRegistry) {
        for &id in &self.order {
            self.with_record_mut(id, |record| {
                let matches = record
                    .archetype
                    .is_subset_of(|type_id| components.has_component(type_id, entity));
                let present = record.queue.contains(entity);
                if matches && !present {
                    record.queue.insert_at(entity, ());
                } else if !matches && present {
                    record.queue.remove(entity);
                }
            });
        }
    }

    /// Remove `entity` from every system's queue unconditionally (used by
    /// entity deletion, which no longer has a component set to check).
    pub fn remove_entity_everywhere(&self, entity: Id) {
        for &id in &self.order {
            self.with_record_mut(id, |record| {
                record.queue.remove(entity);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::{ComponentRegistration, StorageMode};
    use crate::ecs::system::UpdateInfo;

    struct NoopSystem;
    impl SystemBehavior for NoopSystem {
        fn update(&self, _entity: Id, _components: &[*mut u8]) {}
    }

    fn registration(name: &str, archetype: Archetype) -> SystemRegistration {
        SystemRegistration {
            name: name.to_string(),
            archetype,
            behavior: Arc::new(NoopSystem),
            update_info: UpdateInfo {
                is_thread_safe: true,
                ..Default::default()
            },
        }
    }

    #[test]
    fn register_rejects_duplicate_name() {
        let mut registry = Registry::new();
        assert!(registry.register(registration("Physics", Archetype::new("a", vec![]))));
        assert!(!registry.register(registration("Physics", Archetype::new("b", vec![]))));
    }

    #[test]
    fn unregister_removes_from_order_and_marks_dirty() {
        let mut registry = Registry::new();
        registry.register(registration("Physics", Archetype::new("a", vec![])));
        registry.mark_clean();
        registry.unregister("Physics");
        assert!(registry.order().is_empty());
        assert!(registry.is_dirty());
    }

    #[test]
    fn collection_update_tracks_entity_queue_coherence() {
        let mut components = ComponentRegistry::new();
        components.register(ComponentRegistration::new("Position", 8, StorageMode::Dense));
        components.register(ComponentRegistration::new("Velocity", 8, StorageMode::Dense));
        let position = components.id_of("Position").unwrap();
        let velocity = components.id_of("Velocity").unwrap();

        let mut systems = Registry::new();
        systems.register(registration(
            "Physics",
            Archetype::new("PV", vec![position, velocity]),
        ));
        let physics = systems.id_of("Physics").unwrap();
        let entity = Id::from_raw(1);

        components.create(position, entity);
        systems.collection_update(entity, &components);
        assert!(!systems
            .with_record(physics, |r| r.queue.contains(entity))
            .unwrap());

        components.create(velocity, entity);
        systems.collection_update(entity, &components);
        assert!(systems
            .with_record(physics, |r| r.queue.contains(entity))
            .unwrap());

        components.delete(position, entity);
        systems.collection_update(entity, &components);
        assert!(!systems
            .with_record(physics, |r| r.queue.contains(entity))
            .unwrap());
    }

    #[test]
    fn queue_event_then_drain_invokes_callback_per_event() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingSystem(Arc<AtomicUsize>);
        impl SystemBehavior for CountingSystem {
            fn update(&self, _entity: Id, _components: &[*mut u8]) {}
            fn event(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        registry.register(SystemRegistration {
            name: "A".to_string(),
            archetype: Archetype::new("a", vec![]),
            behavior: Arc::new(CountingSystem(counter.clone())),
            update_info: UpdateInfo::default(),
        });

        assert!(registry.queue_event("A"));
        assert!(registry.queue_event("A"));
        assert!(registry.queue_event("A"));
        assert!(!registry.queue_event("Missing"));

        registry.drain_events();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
