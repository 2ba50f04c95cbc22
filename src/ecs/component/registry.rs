use std::collections::HashMap as StdHashMap;
use std::sync::RwLock;

use log::warn;

use crate::ecs::id::Id;
use crate::ecs::storage::hash_map::HashMap as IdHashMap;

/// A constructor or destructor hook run against the raw bytes of a single
/// component instance at create/delete time.
pub type Hook = Box<dyn Fn(&mut [u8]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// One instance per entity.
    Dense,
    /// One shared instance referenced by many entities. Same contract as
    /// `Dense` from the dispatch core's point of view: the allocator
    /// strategy behind it is informative only.
    Flyweight,
    /// Zero bytes stored; ctor/dtor are never invoked.
    Tag,
}

/// Everything needed to register a component type.
pub struct ComponentRegistration {
    pub name: String,
    pub size: usize,
    pub storage: StorageMode,
    pub ctor: Option<Hook>,
    pub dtor: Option<Hook>,
}

impl ComponentRegistration {
    pub fn new(name: impl Into<String>, size: usize, storage: StorageMode) -> Self {
        Self {
            name: name.into(),
            size,
            storage,
            ctor: None,
            dtor: None,
        }
    }

    pub fn with_ctor(mut self, ctor: Hook) -> Self {
        self.ctor = Some(ctor);
        self
    }

    pub fn with_dtor(mut self, dtor: Hook) -> Self {
        self.dtor = Some(dtor);
        self
    }
}

struct ComponentInfo {
    name: String,
    size: usize,
    ctor: Option<Hook>,
    dtor: Option<Hook>,
    column: IdHashMap<Box<[u8]>>,
}

struct Inner {
    by_name: StdHashMap<String, Id>,
    infos: IdHashMap<ComponentInfo>,
}

/// Owns every registered component type and its column.
///
/// Every operation takes `&self`: registration and lookup both lock the same
/// `RwLock`, which is what lets a [`crate::ecs::worker::WorkerPool`] hold a
/// shared `Arc` reference to the whole registry for the lifetime of the ECS
/// instead of a raw back-pointer.
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                by_name: StdHashMap::new(),
                infos: IdHashMap::default(),
            }),
        }
    }

    /// Register a component type. Returns `false` (state unchanged) if the
    /// name is empty or already registered.
    pub fn register(&self, reg: ComponentRegistration) -> bool {
        if reg.name.is_empty() {
            warn!("component_register: empty name rejected");
            return false;
        }
        let id = Id::from_name(&reg.name);
        let mut inner = self.inner.write().expect("component registry poisoned");
        if inner.by_name.contains_key(&reg.name) {
            warn!("component_register: duplicate name '{}'", reg.name);
            return false;
        }
        if inner.infos.contains(id) {
            // Distinct names hashing to the same id collide on the type id
            // namespace, which must stay unique regardless of name.
            warn!("component_register: id collision for '{}'", reg.name);
            return false;
        }
        let size = match reg.storage {
            StorageMode::Tag => 0,
            _ => reg.size,
        };
        inner.by_name.insert(reg.name.clone(), id);
        inner.infos.insert(
            id,
            ComponentInfo {
                name: reg.name,
                size,
                ctor: reg.ctor,
                dtor: reg.dtor,
                column: IdHashMap::default(),
            },
        );
        true
    }

    pub fn has(&self, name: &str) -> bool {
        self.inner
            .read()
            .expect("component registry poisoned")
            .by_name
            .contains_key(name)
    }

    pub fn has_id(&self, type_id: Id) -> bool {
        self.inner
            .read()
            .expect("component registry poisoned")
            .infos
            .contains(type_id)
    }

    pub fn id_of(&self, name: &str) -> Option<Id> {
        self.inner
            .read()
            .expect("component registry poisoned")
            .by_name
            .get(name)
            .copied()
    }

    pub fn name_of(&self, type_id: Id) -> Option<String> {
        self.inner
            .read()
            .expect("component registry poisoned")
            .infos
            .get(type_id)
            .map(|info| info.name.clone())
    }

    pub fn size_of(&self, type_id: Id) -> Option<usize> {
        self.inner
            .read()
            .expect("component registry poisoned")
            .infos
            .get(type_id)
            .map(|info| info.size)
    }

    /// Insert a zeroed instance at `entity` in `type_id`'s column, running
    /// the constructor if one was registered. Fails if `type_id` is unknown.
    pub fn create(&self, type_id: Id, entity: Id) -> bool {
        let mut inner = self.inner.write().expect("component registry poisoned");
        let Some(info) = inner.infos.get_mut(type_id) else {
            return false;
        };
        let mut bytes = vec![0u8; info.size].into_boxed_slice();
        if let Some(ctor) = &info.ctor {
            ctor(&mut bytes);
        }
        info.column.insert(entity, bytes);
        true
    }

    /// Stable pointer to the component instance, or `None`.
    ///
    /// Takes only a read lock: concurrent workers iterating disjoint entity
    /// ranges of disjoint systems must never serialize on this call. Handing
    /// out `*mut u8` from a shared borrow is sound only because of the
    /// barrier protocol's external guarantee: no component is created,
    /// destroyed or moved while any worker holds one of these pointers.
    pub fn get(&self, type_id: Id, entity: Id) -> Option<*mut u8> {
        let inner = self.inner.read().expect("component registry poisoned");
        let info = inner.infos.get(type_id)?;
        let slot = info.column.get(entity)?;
        Some(slot.as_ptr() as *mut u8)
    }

    /// Stable pointer looked up by combined entity/type id, the same value
    /// as `get(id.type_id, id.entity)`. Used by callers that already carry
    /// a [`super::ComponentId`] rather than the pair of raw ids.
    pub fn get_by_id(&self, id: super::ComponentId) -> Option<*mut u8> {
        self.get(id.type_id, id.entity)
    }

    pub fn has_component(&self, type_id: Id, entity: Id) -> bool {
        self.inner
            .read()
            .expect("component registry poisoned")
            .infos
            .get(type_id)
            .map(|info| info.column.contains(entity))
            .unwrap_or(false)
    }

    /// Run the destructor (if any) and remove the instance at `entity` from
    /// `type_id`'s column. No-op if either is absent.
    pub fn delete(&self, type_id: Id, entity: Id) {
        let mut inner = self.inner.write().expect("component registry poisoned");
        let Some(info) = inner.infos.get_mut(type_id) else {
            return;
        };
        if let Some(mut bytes) = info.column.delete(entity) {
            if let Some(dtor) = &info.dtor {
                dtor(&mut bytes);
            }
        }
    }

    /// All registered type ids, for iterating an entity's full component set
    /// (used by entity deletion and collection-update sweeps).
    pub fn all_type_ids(&self) -> Vec<Id> {
        self.inner
            .read()
            .expect("component registry poisoned")
            .infos
            .iter()
            .map(|(id, _)| id)
            .collect()
    }
}
