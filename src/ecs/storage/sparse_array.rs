//! Id-indexed sparse array with stable addresses and ordered traversal.
//!
//! Backs both the entity table (`ecs::entity`, values are `()`: existence
//! is membership) and each system's maintained entity queue (`ecs::system`,
//! values are also `()`, the key is the matching entity id).
//!
//! Addresses are kept stable the same way [`super::pool::Pool`] keeps them
//! stable: storage grows by appending whole segments, never by reallocating
//! or moving previously-allocated segments.
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use fixedbitset::FixedBitSet;

use crate::ecs::id::Id;

/// A sparse, `Id`-keyed array.
///
/// - `insert_free` mints the smallest unused id (≥ 1; `0` is reserved) and
///   stores a value at it.
/// - `insert_at`/`remove`/`get`/`contains` operate on a caller-supplied id,
///   used when the id is already known (e.g. attaching an already-allocated
///   entity to a system's queue).
/// - `next`/`next_free` support amortised-O(1) ordered iteration over present
///   or absent keys respectively.
pub struct SparseArray<T> {
    segment_size: usize,
    segments: Vec<Box<[Option<T>]>>,
    occupied: FixedBitSet,
    /// Ids returned by `remove`/never yet allocated below `high_water`,
    /// ordered so the smallest is always reused first, at the cost of
    /// O(log n) reuse instead of a strict O(1) LIFO free-list.
    free: BinaryHeap<Reverse<u32>>,
    high_water: u32,
    last_filled: u32,
}

impl<T> Default for SparseArray<T> {
    fn default() -> Self {
        Self::new(64)
    }
}

impl<T> SparseArray<T> {
    /// Create an empty sparse array. `segment_size` is a sizing hint for the
    /// underlying segmented storage (see [`super::pool::Pool`]).
    pub fn new(segment_size: usize) -> Self {
        assert!(segment_size > 0, "segment_size must be greater than 0");
        Self {
            segment_size,
            segments: Vec::new(),
            occupied: FixedBitSet::new(),
            free: BinaryHeap::new(),
            // Index 0 is reserved ("none"); the first mintable id is 1.
            high_water: 1,
            last_filled: 0,
        }
    }

    /// Smallest unused index ≥ 1.
    pub fn first_free(&self) -> u32 {
        self.free.peek().map(|Reverse(i)| *i).unwrap_or(self.high_water)
    }

    /// One past the highest currently-used index, or 0 if empty.
    pub fn last_filled(&self) -> u32 {
        self.last_filled
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.occupied.count_ones(..)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` if `id` is currently occupied.
    pub fn contains(&self, id: Id) -> bool {
        let i = id.index();
        i < self.occupied.len() && self.occupied[i]
    }

    /// Borrow the value at `id`, if occupied.
    pub fn get(&self, id: Id) -> Option<&T> {
        if !self.contains(id) {
            return None;
        }
        let (segment, offset) = self.locate(id.index());
        self.segments.get(segment)?.get(offset)?.as_ref()
    }

    /// Mutably borrow the value at `id`, if occupied.
    pub fn get_mut(&mut self, id: Id) -> Option<&mut T> {
        if !self.contains(id) {
            return None;
        }
        let (segment, offset) = self.locate(id.index());
        self.segments.get_mut(segment)?.get_mut(offset)?.as_mut()
    }

    /// Allocate the smallest unused id and store `value` there.
    pub fn insert_free(&mut self, value: T) -> Id {
        let index = if let Some(Reverse(i)) = self.free.pop() {
            i
        } else {
            let i = self.high_water;
            self.high_water += 1;
            i
        };
        let id = Id::from_raw(index);
        self.insert_at(id, value);
        id
    }

    /// Store `value` at the caller-chosen `id` (overwriting if occupied).
    /// Panics if `id` is `Id::NONE`.
    pub fn insert_at(&mut self, id: Id, value: T) {
        assert!(!id.is_none(), "cannot insert at the reserved none id");
        let index = id.index();
        self.ensure_capacity(index);
        let (segment, offset) = self.locate(index);
        self.segments[segment][offset] = Some(value);
        self.occupied.insert(index);
        self.last_filled = self.last_filled.max(index as u32 + 1);
        // Bookkeeping: an externally-chosen id may jump ahead of high_water.
        if index as u32 >= self.high_water {
            self.high_water = index as u32 + 1;
        }
    }

    /// Remove and return the value at `id`, if occupied.
    pub fn remove(&mut self, id: Id) -> Option<T> {
        if !self.contains(id) {
            return None;
        }
        let index = id.index();
        let (segment, offset) = self.locate(index);
        let taken = self.segments[segment][offset].take();
        self.occupied.set(index, false);
        self.free.push(Reverse(index as u32));
        if index as u32 + 1 == self.last_filled {
            // Shrink the high-water mark past any now-trailing free slots.
            while self.last_filled > 0 && !self.occupied[self.last_filled as usize - 1] {
                self.last_filled -= 1;
            }
        }
        taken
    }

    /// Smallest present key strictly greater than `i`, or `None`.
    pub fn next(&self, i: u32) -> Option<Id> {
        let mut idx = i as usize + 1;
        while idx < self.occupied.len() {
            if self.occupied[idx] {
                return Some(Id::from_raw(idx as u32));
            }
            idx += 1;
        }
        None
    }

    /// Smallest absent key ≥ `i + 1`.
    pub fn next_free(&self, i: u32) -> u32 {
        let mut idx = i + 1;
        loop {
            if (idx as usize) >= self.occupied.len() || !self.occupied[idx as usize] {
                return idx;
            }
            idx += 1;
        }
    }

    /// Iterate all occupied ids in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = Id> + '_ {
        self.occupied.ones().map(|i| Id::from_raw(i as u32))
    }

    fn ensure_capacity(&mut self, index: usize) {
        if self.occupied.len() <= index {
            self.occupied.grow(index + 1);
        }
        while index >= self.segments.len() * self.segment_size {
            let segment = (0..self.segment_size)
                .map(|_| None)
                .collect::<Vec<_>>()
                .into_boxed_slice();
            self.segments.push(segment);
        }
    }

    #[inline]
    fn locate(&self, index: usize) -> (usize, usize) {
        (index / self.segment_size, index % self.segment_size)
    }
}
