//! The worker thread pool: persistent OS threads that execute queued slices
//! of a system's entity queue, synchronised with the caller through a
//! per-worker mutex/condvar ready-flag handshake plus one pool-wide ready
//! counter.
//!
//! A fixed pool of persistent OS threads owned by the pool; `Drop` cancels
//! and joins them. Readiness is tracked per worker with its own condvar so
//! the dispatcher can hand work to whichever thread signals free first,
//! rather than routing every job through a single shared queue.

use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use log::warn;

use crate::ecs::component::Registry as ComponentRegistry;
use crate::ecs::id::Id;
use crate::ecs::system::{self, Registry as SystemRegistry};

enum Job {
    Run(Id, Range<u32>),
    Shutdown,
}

struct WorkerState {
    ready: bool,
    job: Option<Job>,
}

struct WorkerHandle {
    state: Mutex<WorkerState>,
    cond: Condvar,
}

/// Everything a worker thread needs that it does not own exclusively: the
/// registries (read-only during a job) and the ECS-global ready handshake.
struct Shared {
    components: Arc<ComponentRegistry>,
    systems: Arc<RwLock<SystemRegistry>>,
    ready_threads: Mutex<usize>,
    ready_cond: Condvar,
}

struct Worker {
    handle: Arc<WorkerHandle>,
    thread: Option<JoinHandle<()>>,
}

/// A pool of worker threads bound to one ECS instance for its lifetime.
/// Grows monotonically: [`WorkerPool::set_threads`] with a smaller count
/// than the current size is a logged no-op.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<Worker>,
}

impl WorkerPool {
    pub fn new(components: Arc<ComponentRegistry>, systems: Arc<RwLock<SystemRegistry>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                components,
                systems,
                ready_threads: Mutex::new(0),
                ready_cond: Condvar::new(),
            }),
            workers: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Grow the pool to `n` workers. A smaller `n` is a no-op (logged at
    /// warn). Blocks until every worker, new and pre-existing, has signalled
    /// ready, so the call returns only once the pool can actually accept
    /// work.
    pub fn set_threads(&mut self, n: usize) {
        if n <= self.workers.len() {
            if n < self.workers.len() {
                warn!(
                    "set_threads({n}): shrinking the worker pool from {} is not supported; ignoring",
                    self.workers.len()
                );
            }
            return;
        }
        for _ in self.workers.len()..n {
            self.workers.push(Worker::spawn(self.shared.clone()));
        }
        self.synchronize();
    }

    /// Block until at least one worker is ready, then hand `(system, range)`
    /// to it. Only ever called by the single caller thread driving `update`.
    pub fn dispatch_queued(&self, system: Id, range: Range<u32>) {
        loop {
            {
                let mut ready = self.shared.ready_threads.lock().expect("ready counter poisoned");
                while *ready == 0 {
                    ready = self.shared.ready_cond.wait(ready).expect("ready counter poisoned");
                }
            }
            for worker in &self.workers {
                let mut state = worker.handle.state.lock().expect("worker state poisoned");
                if state.ready {
                    state.ready = false;
                    state.job = Some(Job::Run(system, range.clone()));
                    drop(state);
                    *self.shared.ready_threads.lock().expect("ready counter poisoned") -= 1;
                    worker.handle.cond.notify_one();
                    return;
                }
            }
            // The ready count said someone was free but the scan above found
            // nobody. Only possible if this were called concurrently from
            // more than one thread, which the dispatch contract forbids.
            // Loop defensively rather than deadlock.
        }
    }

    /// Block until every worker in the pool is ready. Used as the barrier
    /// synchronisation step between dependent stages of a dispatch plan.
    pub fn synchronize(&self) {
        if self.workers.is_empty() {
            return;
        }
        let mut ready = self.shared.ready_threads.lock().expect("ready counter poisoned");
        while *ready < self.workers.len() {
            ready = self.shared.ready_cond.wait(ready).expect("ready counter poisoned");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Let any in-flight jobs finish before tearing anything down.
        self.synchronize();
        for worker in &self.workers {
            let mut state = worker.handle.state.lock().expect("worker state poisoned");
            state.ready = false;
            state.job = Some(Job::Shutdown);
            drop(state);
            worker.handle.cond.notify_one();
        }
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

impl Worker {
    fn spawn(shared: Arc<Shared>) -> Self {
        let handle = Arc::new(WorkerHandle {
            state: Mutex::new(WorkerState {
                ready: false,
                job: None,
            }),
            cond: Condvar::new(),
        });
        let worker_handle = handle.clone();
        let thread = thread::Builder::new()
            .name("ecs-worker".into())
            .spawn(move || worker_loop(shared, worker_handle))
            .expect("failed to spawn ECS worker thread");
        Self {
            handle,
            thread: Some(thread),
        }
    }
}

fn worker_loop(shared: Arc<Shared>, handle: Arc<WorkerHandle>) {
    let mut scratch: Vec<*mut u8> = Vec::new();
    loop {
        let job = {
            let mut state = handle.state.lock().expect("worker state poisoned");
            state.ready = true;
            *shared.ready_threads.lock().expect("ready counter poisoned") += 1;
            shared.ready_cond.notify_all();
            while state.ready {
                state = handle.cond.wait(state).expect("worker state poisoned");
            }
            state.job.take()
        };

        match job {
            None | Some(Job::Shutdown) => break,
            Some(Job::Run(system_id, range)) => {
                let systems = shared.systems.read().expect("system registry poisoned");
                // A panicking user `update` is caught here so one bad system
                // doesn't take the whole pool down. Genuine allocator failure
                // still aborts the process and cannot be caught; this only
                // recovers from panics raised by ordinary system code.
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    system::run_range(system_id, range, &systems, &shared.components, &mut scratch);
                }));
                if let Err(payload) = result {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "<non-string panic payload>".to_string());
                    warn!("system update panicked during dispatch: {message}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::archetype::Archetype;
    use crate::ecs::component::{ComponentRegistration, StorageMode};
    use crate::ecs::system::{SystemBehavior, SystemRegistration, UpdateInfo};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSystem(Arc<AtomicUsize>);
    impl SystemBehavior for CountingSystem {
        fn update(&self, _entity: Id, _components: &[*mut u8]) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn setup(entity_count: u32) -> (Arc<ComponentRegistry>, Arc<RwLock<SystemRegistry>>, Id, Arc<AtomicUsize>) {
        let components = Arc::new(ComponentRegistry::new());
        components.register(ComponentRegistration::new("Position", 4, StorageMode::Dense));
        let position = components.id_of("Position").unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = SystemRegistry::new();
        registry.register(SystemRegistration {
            name: "A".to_string(),
            archetype: Archetype::new("a", vec![position]),
            behavior: Arc::new(CountingSystem(counter.clone())),
            update_info: UpdateInfo {
                is_thread_safe: true,
                ..Default::default()
            },
        });
        let system_id = registry.id_of("A").unwrap();

        for raw in 1..=entity_count {
            let entity = Id::from_raw(raw);
            components.create(position, entity);
            registry.collection_update(entity, &components);
        }

        (components, Arc::new(RwLock::new(registry)), system_id, counter)
    }

    #[test]
    fn set_threads_blocks_until_new_workers_are_ready() {
        let (components, systems, _system_id, _counter) = setup(0);
        let mut pool = WorkerPool::new(components, systems);
        pool.set_threads(3);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn set_threads_with_smaller_count_is_a_noop() {
        let (components, systems, _system_id, _counter) = setup(0);
        let mut pool = WorkerPool::new(components, systems);
        pool.set_threads(3);
        pool.set_threads(1);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn dispatch_queued_runs_every_entity_across_workers() {
        let (components, systems, system_id, counter) = setup(10_000);
        let mut pool = WorkerPool::new(components, systems);
        pool.set_threads(2);

        pool.dispatch_queued(system_id, 1..5_000);
        pool.dispatch_queued(system_id, 5_000..10_001);
        pool.synchronize();

        assert_eq!(counter.load(Ordering::SeqCst), 10_000);
    }

    #[test]
    fn panicking_update_is_caught_and_worker_stays_alive() {
        struct PanickingSystem;
        impl SystemBehavior for PanickingSystem {
            fn update(&self, _entity: Id, _components: &[*mut u8]) {
                panic!("boom");
            }
        }

        let components = Arc::new(ComponentRegistry::new());
        components.register(ComponentRegistration::new("Position", 4, StorageMode::Dense));
        let position = components.id_of("Position").unwrap();
        let entity = Id::from_raw(1);
        components.create(position, entity);

        let mut registry = SystemRegistry::new();
        registry.register(SystemRegistration {
            name: "Boom".to_string(),
            archetype: Archetype::new("a", vec![position]),
            behavior: Arc::new(PanickingSystem),
            update_info: UpdateInfo {
                is_thread_safe: true,
                ..Default::default()
            },
        });
        registry.collection_update(entity, &components);
        let system_id = registry.id_of("Boom").unwrap();
        let systems = Arc::new(RwLock::new(registry));

        let mut pool = WorkerPool::new(components, systems);
        pool.set_threads(1);
        pool.dispatch_queued(system_id, 1..2);
        pool.synchronize();
        // The worker survives the panic and is ready for more work.
        assert_eq!(pool.len(), 1);
    }
}
