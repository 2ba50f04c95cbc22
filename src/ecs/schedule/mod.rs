//! The dispatch plan builder.
//!
//! A rebuildable, cached linear plan gated behind a dirty flag: systems are
//! topo-sorted by declared dependency, adjacent thread-safe systems are
//! folded into parallel queued slices, and a barrier is inserted wherever
//! two adjacent systems can't run concurrently.

use std::collections::HashSet;
use std::ops::Range;

use log::debug;

use crate::ecs::id::Id;
use crate::ecs::system::Registry as SystemRegistry;

/// Minimum entity-queue length worth splitting across more than one worker.
pub const DEFAULT_THREAD_MIN_LOAD: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanItem {
    Queued(Id, Range<u32>),
    OnThread(Id, Range<u32>),
    Barrier,
}

/// A cached, rebuildable linear schedule.
pub struct Scheduler {
    plan: Vec<PlanItem>,
    thread_min_load: u32,
    last_num_threads: usize,
    built: bool,
}

impl Scheduler {
    pub fn new(thread_min_load: u32) -> Self {
        Self {
            plan: Vec::new(),
            thread_min_load,
            last_num_threads: usize::MAX,
            built: false,
        }
    }

    /// Rebuild the plan if the system registry is dirty or the worker count
    /// has changed since the last build; otherwise return the cached plan.
    pub fn ensure_plan(&mut self, systems: &mut SystemRegistry, num_threads: usize) -> &[PlanItem] {
        if !self.built || systems.is_dirty() || num_threads != self.last_num_threads {
            self.plan = arrange(systems, num_threads, self.thread_min_load);
            systems.mark_clean();
            self.last_num_threads = num_threads;
            self.built = true;
            debug!("dispatch plan rebuilt: {} items", self.plan.len());
        }
        &self.plan
    }

    pub fn plan(&self) -> &[PlanItem] {
        &self.plan
    }
}

/// Build the plan from the current system order and entity queues.
/// Traverses a dependency-respecting order derived from registration order
/// and each system's declared `after_systems`.
fn arrange(systems: &SystemRegistry, num_threads: usize, thread_min_load: u32) -> Vec<PlanItem> {
    let mut plan: Vec<PlanItem> = Vec::new();

    for system_id in topo_order(systems) {
        systems.with_record(system_id, |record| {
            let range = match record.first_present() {
                Some(first) => first..record.last_filled(),
                None => 0..0,
            };

            if needs_barrier(&plan, system_id, systems) {
                plan.push(PlanItem::Barrier);
            }

            if !record.is_thread_safe {
                plan.push(PlanItem::OnThread(system_id, range));
                return;
            }

            let len = range.end.saturating_sub(range.start);
            if num_threads > 1 && len >= thread_min_load {
                let chunk_count = num_threads.min(div_ceil(len as usize, thread_min_load as usize));
                for chunk in split_range(range, chunk_count) {
                    plan.push(PlanItem::Queued(system_id, chunk));
                }
            } else {
                plan.push(PlanItem::Queued(system_id, range));
            }
        });
    }

    plan
}

/// Order the registered systems so that every system appears after every
/// system named in its `after_systems` set, breaking ties by registration
/// order. A dependency cycle (or a dependency on an unregistered name)
/// cannot be satisfied; the offending systems are appended in registration
/// order rather than looping forever.
fn topo_order(systems: &SystemRegistry) -> Vec<Id> {
    let candidates = systems.order().to_vec();
    let mut placed: HashSet<Id> = HashSet::with_capacity(candidates.len());
    let mut remaining = candidates.clone();
    let mut result = Vec::with_capacity(candidates.len());

    while !remaining.is_empty() {
        let ready = remaining.iter().position(|&id| {
            systems
                .with_record(id, |record| {
                    record
                        .after_systems
                        .iter()
                        .all(|dep| placed.contains(&dep) || !candidates.contains(&dep))
                })
                .unwrap_or(true)
        });
        match ready {
            Some(index) => {
                let id = remaining.remove(index);
                placed.insert(id);
                result.push(id);
            }
            None => {
                debug!("dependency cycle among registered systems; falling back to registration order for the rest");
                result.extend(remaining.drain(..));
                break;
            }
        }
    }

    result
}

/// Walk backward through already-placed items, skipping past them as long as
/// they may run in parallel with `system_id` and are not a declared
/// dependency of it; stop at a `Barrier` (no conflict possible before it) or
/// the first conflicting item.
fn needs_barrier(plan: &[PlanItem], system_id: Id, systems: &SystemRegistry) -> bool {
    for item in plan.iter().rev() {
        let other_id = match item {
            PlanItem::Barrier => return false,
            PlanItem::Queued(id, _) | PlanItem::OnThread(id, _) => *id,
        };
        if other_id == system_id {
            continue;
        }
        let is_dependency = systems
            .with_record(system_id, |record| record.after_systems.contains(other_id))
            .unwrap_or(false);
        if is_dependency || !systems_in_parallel(system_id, other_id, systems) {
            return true;
        }
    }
    false
}

/// `true` iff the two systems' archetypes share no component type.
fn systems_in_parallel(a: Id, b: Id, systems: &SystemRegistry) -> bool {
    let archetype_a = systems.with_record(a, |r| r.archetype.clone());
    let archetype_b = systems.with_record(b, |r| r.archetype.clone());
    match (archetype_a, archetype_b) {
        (Some(a), Some(b)) => a.disjoint_from(&b),
        _ => true,
    }
}

fn div_ceil(numerator: usize, denominator: usize) -> usize {
    (numerator + denominator - 1) / denominator
}

/// Split `range` into `chunk_count` contiguous, near-equal sub-ranges.
fn split_range(range: Range<u32>, chunk_count: usize) -> Vec<Range<u32>> {
    let len = range.end - range.start;
    let chunk_count = chunk_count.max(1) as u32;
    let base = len / chunk_count;
    let remainder = len % chunk_count;
    let mut chunks = Vec::with_capacity(chunk_count as usize);
    let mut cursor = range.start;
    for i in 0..chunk_count {
        let size = base + u32::from(i < remainder);
        if size == 0 {
            continue;
        }
        chunks.push(cursor..cursor + size);
        cursor += size;
    }
    chunks
}
