//! The dispatch engine: the `Ecs` facade tying together component storage,
//! entity existence, system registration, scheduling, the worker pool and
//! deferred command buffers.
//!
//! `Ecs` is the central container for entities, components and systems,
//! built around flat name-hash-keyed registries rather than archetype
//! storage tables.

pub mod archetype;
pub mod component;
pub mod entity;
pub mod id;
pub mod schedule;
pub mod storage;
pub mod system;
pub mod worker;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::warn;

use archetype::Archetype;
use component::{ComponentRegistration, Registry as ComponentRegistry};
use entity::Entities;
use id::Id;
use schedule::{PlanItem, Scheduler, DEFAULT_THREAD_MIN_LOAD};
use system::command::CommandKind;
use system::{CommandBuffer, Registry as SystemRegistry, SystemRegistration};
use worker::WorkerPool;

/// Sizing hints for the ECS's internal storage. None of these affect
/// behavior; they only seed initial capacities.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocInfo {
    pub components: usize,
    pub entities: usize,
    pub systems: usize,
    pub cm_types: usize,
    pub system_entities: usize,
}

/// The dispatch-engine container: owns every registry, the worker pool and
/// the table of live command buffers. Not `Send`/`Sync` itself, since it is
/// meant to be driven by a single owning thread that calls `update`, the
/// same way worker threads only ever touch the registries through the
/// narrow, read-only interfaces exposed to them during a dispatch.
pub struct Ecs {
    #[allow(dead_code)]
    alloc_info: AllocInfo,
    entities: Entities,
    components: Arc<ComponentRegistry>,
    systems: Arc<RwLock<SystemRegistry>>,
    archetypes: archetype::Registry,
    scheduler: Scheduler,
    workers: WorkerPool,
    buffers: Mutex<Vec<(Id, Arc<CommandBuffer>)>>,
    next_buffer_id: AtomicU32,
}

impl Default for Ecs {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Ecs {
    /// Construct an empty ECS. `alloc_info` is sizing hints only (see
    /// [`AllocInfo`]); it has no effect on behavior.
    pub fn new(alloc_info: Option<AllocInfo>) -> Self {
        let components = Arc::new(ComponentRegistry::new());
        let systems = Arc::new(RwLock::new(SystemRegistry::new()));
        Self {
            alloc_info: alloc_info.unwrap_or_default(),
            entities: Entities::new(),
            components: components.clone(),
            systems: systems.clone(),
            archetypes: archetype::Registry::new(),
            scheduler: Scheduler::new(DEFAULT_THREAD_MIN_LOAD),
            workers: WorkerPool::new(components, systems),
            buffers: Mutex::new(Vec::new()),
            next_buffer_id: AtomicU32::new(1),
        }
    }

    /// Grow the worker pool to `n` threads. Shrinking is a logged no-op.
    pub fn set_threads(&mut self, n: usize) {
        self.workers.set_threads(n);
    }

    // -- Component types ----------------------------------------------------

    pub fn component_register(&self, reg: ComponentRegistration) -> bool {
        self.components.register(reg)
    }

    pub fn component_has(&self, name: &str) -> bool {
        self.components.has(name)
    }

    /// `"{name}(#{id})"`, or a placeholder if `type_id` is not registered.
    pub fn component_to_string(&self, type_id: Id) -> String {
        match self.components.name_of(type_id) {
            Some(name) => format!("{name}(#{})", type_id.value()),
            None => format!("Component(#{})", type_id.value()),
        }
    }

    // -- Entities -------------------------------------------------------------

    /// Create a new entity. If `archetype` names a registered archetype,
    /// every one of its required component types is attached immediately.
    pub fn entity_new(&mut self, archetype: Option<&str>) -> Id {
        let id = self.entities.create();
        if let Some(name) = archetype {
            match self.archetypes.get(name) {
                Some(archetype) => {
                    for &type_id in &archetype.component_types {
                        self.add_component_internal(id, type_id);
                    }
                }
                None => warn!("entity_new: unknown archetype '{name}'"),
            }
        }
        id
    }

    /// Delete an entity: every component it owns is destroyed (dtor, if
    /// any), it is removed from every system's entity queue, then its slot
    /// is freed.
    pub fn entity_delete(&mut self, id: Id) {
        if !self.entities.exists(id) {
            return;
        }
        for type_id in self.components.all_type_ids() {
            self.components.delete(type_id, id);
        }
        self.systems
            .read()
            .expect("system registry poisoned")
            .remove_entity_everywhere(id);
        self.entities.free(id);
    }

    pub fn entity_exists(&self, id: Id) -> bool {
        self.entities.exists(id)
    }

    /// Attach `type_id` to `entity`, returning the new instance's pointer.
    /// `None` if the entity doesn't exist or the type isn't registered.
    pub fn entity_add_component(&mut self, entity: Id, type_id: Id) -> Option<*mut u8> {
        if !self.entities.exists(entity) {
            return None;
        }
        if !self.add_component_internal(entity, type_id) {
            return None;
        }
        self.components.get(type_id, entity)
    }

    pub fn entity_get_component(&self, entity: Id, type_id: Id) -> Option<*mut u8> {
        self.components.get(type_id, entity)
    }

    pub fn entity_delete_component(&mut self, entity: Id, type_id: Id) {
        self.components.delete(type_id, entity);
        self.run_collection_update(entity);
    }

    /// Resolve `component_names` and store the named archetype. `None` if
    /// any name is not a registered component type.
    pub fn entity_register_archetype(
        &mut self,
        name: impl Into<String>,
        component_names: &[&str],
    ) -> Option<Arc<Archetype>> {
        self.archetypes.register(name, component_names, &self.components)
    }

    fn add_component_internal(&mut self, entity: Id, type_id: Id) -> bool {
        if !self.components.create(type_id, entity) {
            return false;
        }
        self.run_collection_update(entity);
        true
    }

    fn run_collection_update(&self, entity: Id) {
        self.systems
            .read()
            .expect("system registry poisoned")
            .collection_update(entity, &self.components);
    }

    // -- Systems --------------------------------------------------------------

    /// Register a system. A freshly registered system's queue is populated
    /// immediately against every entity that already exists, rather than
    /// waiting for the next attach/detach to discover it.
    pub fn system_register(&mut self, reg: SystemRegistration) -> bool {
        if !self.systems.write().expect("system registry poisoned").register(reg) {
            return false;
        }
        for entity in self.entities.iter() {
            self.run_collection_update(entity);
        }
        true
    }

    pub fn system_unregister(&mut self, name: &str) {
        self.systems.write().expect("system registry poisoned").unregister(name);
    }

    pub fn system_queue_event(&self, name: &str) -> bool {
        self.systems.read().expect("system registry poisoned").queue_event(name)
    }

    // -- Command buffers --------------------------------------------------------

    /// Allocate a command buffer. The returned handle is shared with the
    /// ECS's buffer table; it is drained and discarded at the next barrier.
    pub fn cb_new(&self) -> Arc<CommandBuffer> {
        let id = Id::from_raw(self.next_buffer_id.fetch_add(1, Ordering::Relaxed));
        let buffer = Arc::new(CommandBuffer::new());
        self.buffers
            .lock()
            .expect("command buffer table poisoned")
            .push((id, buffer.clone()));
        buffer
    }

    /// Discard a command buffer before it is ever applied.
    pub fn cb_delete(&self, buffer: &Arc<CommandBuffer>) {
        self.buffers
            .lock()
            .expect("command buffer table poisoned")
            .retain(|(_, b)| !Arc::ptr_eq(b, buffer));
    }

    /// Apply every pending command buffer, in the order each was created,
    /// each buffer's commands in FIFO order. Called at every barrier and
    /// discards every buffer it applies.
    fn apply_command_buffers(&mut self) {
        let buffers = std::mem::take(&mut *self.buffers.lock().expect("command buffer table poisoned"));
        for (_, buffer) in buffers {
            let mut placeholders: HashMap<u32, Id> = HashMap::new();
            for command in buffer.drain() {
                let entity = placeholders.get(&command.arg0.value()).copied().unwrap_or(command.arg0);
                match command.kind {
                    CommandKind::CreateEntity => {
                        let real = self.entities.create();
                        placeholders.insert(command.arg0.value(), real);
                    }
                    CommandKind::DeleteEntity => {
                        if self.entities.exists(entity) {
                            self.entity_delete(entity);
                        }
                    }
                    CommandKind::AttachComponent => {
                        let type_id = command.arg1;
                        if self.entities.exists(entity) && self.components.has_id(type_id) {
                            self.add_component_internal(entity, type_id);
                        } else {
                            warn!("command buffer: dropping attach of unknown entity/type at barrier");
                        }
                    }
                    CommandKind::DetachComponent => {
                        let type_id = command.arg1;
                        if self.entities.exists(entity) {
                            self.components.delete(type_id, entity);
                            self.run_collection_update(entity);
                        } else {
                            warn!("command buffer: dropping detach of unknown entity at barrier");
                        }
                    }
                }
            }
        }
    }

    // -- Tick -------------------------------------------------------------------

    /// Run one tick: rebuild the dispatch plan if dirty, walk it, drain
    /// event queues, and settle with one final barrier.
    pub fn update(&mut self) {
        let num_threads = self.workers.len();
        let plan = {
            let mut systems = self.systems.write().expect("system registry poisoned");
            self.scheduler.ensure_plan(&mut systems, num_threads).to_vec()
        };

        let mut scratch: Vec<*mut u8> = Vec::new();
        for item in &plan {
            match item {
                PlanItem::Queued(system_id, range) => {
                    if self.workers.is_empty() {
                        self.run_inline(*system_id, range.clone(), &mut scratch);
                    } else {
                        self.workers.dispatch_queued(*system_id, range.clone());
                    }
                }
                PlanItem::OnThread(system_id, range) => {
                    self.workers.synchronize();
                    self.run_inline(*system_id, range.clone(), &mut scratch);
                }
                PlanItem::Barrier => {
                    self.workers.synchronize();
                    self.apply_command_buffers();
                }
            }
        }

        // The plan may contain no in-line `Barrier` at all (a single-system
        // plan never needs one), so command buffers filled during dispatch
        // are guaranteed at least one application point: this final sync.
        // Events are pushed from inside a system's update callback too, so
        // the event queues cannot be drained safely until every worker is
        // idle.
        self.workers.synchronize();
        self.apply_command_buffers();
        self.systems.read().expect("system registry poisoned").drain_events();
        self.workers.synchronize();
    }

    fn run_inline(&self, system_id: Id, range: std::ops::Range<u32>, scratch: &mut Vec<*mut u8>) {
        let systems = self.systems.read().expect("system registry poisoned");
        system::run_range(system_id, range, &systems, &self.components, scratch);
    }

    // -- Introspection (tooling/tests) -------------------------------------------

    /// The type id of a registered component. Panics if `name` isn't
    /// registered; a tooling/test convenience, not part of the fallible
    /// registration surface.
    pub fn component_id(&self, name: &str) -> Id {
        self.components
            .id_of(name)
            .unwrap_or_else(|| panic!("component_id: '{name}' is not registered"))
    }

    /// Every currently-existing entity id.
    pub fn all_entities(&self) -> Vec<Id> {
        self.entities.iter().collect()
    }

    /// A snapshot of `name`'s entity queue. Empty (and logged) if `name`
    /// isn't a registered system.
    pub fn system_queue_snapshot(&self, name: &str) -> Vec<Id> {
        let systems = self.systems.read().expect("system registry poisoned");
        let Some(id) = systems.id_of(name) else {
            warn!("system_queue_snapshot: unknown system '{name}'");
            return Vec::new();
        };
        systems
            .with_record(id, |record| record.queue.iter().collect())
            .unwrap_or_default()
    }

    /// Number of barrier items in the current dispatch plan, rebuilding it
    /// first if the registry is dirty or the worker count changed.
    pub fn plan_barrier_count(&mut self) -> usize {
        let num_threads = self.workers.len();
        let mut systems = self.systems.write().expect("system registry poisoned");
        self.scheduler
            .ensure_plan(&mut systems, num_threads)
            .iter()
            .filter(|item| matches!(item, PlanItem::Barrier))
            .count()
    }
}
