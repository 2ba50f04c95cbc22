//! Entity archetypes: named, ordered sets of required component type ids.

use std::sync::Arc;

use crate::ecs::component::Registry as ComponentRegistry;
use crate::ecs::id::Id;
use crate::ecs::storage::hash_map::HashMap as IdHashMap;

/// An owned archetype record: a name, its hash, and the component type ids a
/// matching entity must possess.
#[derive(Debug, Clone)]
pub struct Archetype {
    pub name: String,
    pub name_hash: Id,
    pub component_types: Vec<Id>,
}

impl Archetype {
    pub fn new(name: impl Into<String>, component_types: Vec<Id>) -> Self {
        let name = name.into();
        let name_hash = Id::from_name(&name);
        Self {
            name,
            name_hash,
            component_types,
        }
    }

    /// `true` iff every required component type appears in `components`.
    pub fn is_subset_of(&self, components: impl Fn(Id) -> bool) -> bool {
        self.component_types.iter().all(|&t| components(t))
    }

    /// `true` iff this archetype and `other` share no component type. Used
    /// by the scheduler's parallel-compose predicate.
    pub fn disjoint_from(&self, other: &Archetype) -> bool {
        self.component_types
            .iter()
            .all(|t| !other.component_types.contains(t))
    }
}

/// Owns every named archetype registered against the ECS. Bound to the
/// lifetime of the ECS; single-threaded, since registration only ever
/// happens on the owning thread.
#[derive(Default)]
pub struct Registry {
    by_name_hash: IdHashMap<Arc<Archetype>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `component_names` to type ids via `components` and store the
    /// resulting archetype. Fails (returns `None`, state unchanged) if any
    /// name is not a registered component type.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        component_names: &[&str],
        components: &ComponentRegistry,
    ) -> Option<Arc<Archetype>> {
        let mut component_types = Vec::with_capacity(component_names.len());
        for &component_name in component_names {
            component_types.push(components.id_of(component_name)?);
        }
        let archetype = Arc::new(Archetype::new(name, component_types));
        self.by_name_hash.insert(archetype.name_hash, archetype.clone());
        Some(archetype)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Archetype>> {
        self.by_name_hash.get(Id::from_name(name)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::{ComponentRegistration, StorageMode};

    #[test]
    fn register_resolves_names_to_type_ids() {
        let components = ComponentRegistry::new();
        components.register(ComponentRegistration::new("Position", 8, StorageMode::Dense));
        components.register(ComponentRegistration::new("Velocity", 8, StorageMode::Dense));
        let position = components.id_of("Position").unwrap();
        let velocity = components.id_of("Velocity").unwrap();

        let mut registry = Registry::new();
        let archetype = registry
            .register("Physics", &["Position", "Velocity"], &components)
            .unwrap();
        assert_eq!(archetype.component_types, vec![position, velocity]);
        assert!(Arc::ptr_eq(&archetype, &registry.get("Physics").unwrap()));
    }

    #[test]
    fn register_fails_on_unknown_component_name() {
        let components = ComponentRegistry::new();
        let mut registry = Registry::new();
        assert!(registry.register("Physics", &["Nope"], &components).is_none());
    }

    #[test]
    fn is_subset_of_checks_every_required_type() {
        let archetype = Archetype::new("Physics", vec![Id::from_raw(1), Id::from_raw(2)]);
        assert!(archetype.is_subset_of(|t| t.value() <= 2));
        assert!(!archetype.is_subset_of(|t| t.value() == 1));
    }

    #[test]
    fn disjoint_from_detects_shared_component() {
        let a = Archetype::new("A", vec![Id::from_raw(1)]);
        let b = Archetype::new("B", vec![Id::from_raw(2)]);
        let c = Archetype::new("C", vec![Id::from_raw(1), Id::from_raw(3)]);
        assert!(a.disjoint_from(&b));
        assert!(!a.disjoint_from(&c));
    }

    #[test]
    fn empty_archetype_is_subset_of_anything() {
        let archetype = Archetype::new("Empty", vec![]);
        assert!(archetype.is_subset_of(|_| false));
    }
}
