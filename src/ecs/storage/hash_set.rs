//! `Id`-keyed hash set: [`super::hash_map::HashMap`] with zero-size values.
//!
//! Used wherever only membership matters, not an associated value: a
//! system's declared `after_systems` dependency set, and the scheduler's
//! per-step visited/seen bookkeeping.

use crate::ecs::id::Id;
use crate::ecs::storage::hash_map::HashMap;

#[derive(Default)]
pub struct HashSet {
    inner: HashMap<()>,
}

impl HashSet {
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            inner: HashMap::new(initial_capacity),
        }
    }

    /// Insert `id`. Returns `true` if it was newly inserted.
    pub fn insert(&mut self, id: Id) -> bool {
        self.inner.insert(id, ()).is_none()
    }

    #[inline]
    pub fn contains(&self, id: Id) -> bool {
        self.inner.contains(id)
    }

    /// Returns `true` if `id` was present.
    pub fn remove(&mut self, id: Id) -> bool {
        self.inner.delete(id).is_some()
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.inner.count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Id> + '_ {
        self.inner.iter().map(|(id, _)| id)
    }
}

impl FromIterator<Id> for HashSet {
    fn from_iter<I: IntoIterator<Item = Id>>(iter: I) -> Self {
        let mut set = Self::default();
        for id in iter {
            set.insert(id);
        }
        set
    }
}
