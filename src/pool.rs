//! A fixed-size thread pool with a task queue, grounded on `original_source/include/WorkerPool.hpp`:
//! the same condvar pair (one for "a task is available", one for "the queue is idle") guarding a
//! single mutex, plus an `active` count incremented/decremented around each task's execution.
//!
//! The C++ original is a function-pointer pool specialized over one fixed argument-tuple type.
//! Rust's closures make that specialization unnecessary: [`WorkerPool`] queues boxed `FnOnce`
//! jobs instead. It is scoped (`std::thread::scope`) rather than `'static`, so [`crate::filter`]
//! can hand worker threads disjoint `&mut [u8]` windows of a single decode's buffer and let the
//! borrow checker prove those windows never overlap, instead of arguing it by convention.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, Scope, ScopedJoinHandle};

type Job<'scope> = Box<dyn FnOnce() + Send + 'scope>;

struct State<'scope> {
    queue: VecDeque<Job<'scope>>,
    active: usize,
    terminate: bool,
}

struct Shared<'scope> {
    state: Mutex<State<'scope>>,
    task_available: Condvar,
    idle: Condvar,
}

pub struct WorkerPool<'scope> {
    shared: Arc<Shared<'scope>>,
    workers: Vec<ScopedJoinHandle<'scope, ()>>,
}

impl<'scope> WorkerPool<'scope> {
    /// Spawns `thread_count` (at least 1) worker threads on `scope`, each blocked on the task
    /// queue until a job is submitted or the pool is dropped.
    pub fn new<'env>(scope: &'scope Scope<'scope, 'env>, thread_count: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                active: 0,
                terminate: false,
            }),
            task_available: Condvar::new(),
            idle: Condvar::new(),
        });

        let workers = (0..thread_count.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                scope.spawn(move || worker_loop(shared))
            })
            .collect();

        WorkerPool { shared, workers }
    }

    pub fn submit(&self, job: Job<'scope>) {
        let mut state = self.shared.state.lock().unwrap();
        state.queue.push_back(job);
        self.shared.task_available.notify_one();
    }

    /// Blocks until the queue is empty and no worker holds an active task.
    pub fn wait_until_idle(&self) {
        let state = self.shared.state.lock().unwrap();
        let _state = self
            .shared
            .idle
            .wait_while(state, |s| !s.queue.is_empty() || s.active > 0)
            .unwrap();
    }
}

/// Sized to the host's available parallelism, falling back to a single worker. A free function
/// (rather than an associated one) so it doesn't need a dummy outer lifetime parameter.
pub fn available_parallelism() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn worker_loop(shared: Arc<Shared<'_>>) {
    loop {
        let mut state = shared.state.lock().unwrap();
        state = shared
            .task_available
            .wait_while(state, |s| !s.terminate && s.queue.is_empty())
            .unwrap();

        if state.queue.is_empty() {
            debug_assert!(state.terminate);
            return;
        }

        let job = state.queue.pop_front().unwrap();
        state.active += 1;
        drop(state);

        job();

        let mut state = shared.state.lock().unwrap();
        state.active -= 1;
        if state.queue.is_empty() && state.active == 0 {
            shared.idle.notify_all();
        }
    }
}

impl<'scope> Drop for WorkerPool<'scope> {
    /// Signals termination, drops any pending (never-run) tasks, and joins every worker.
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.terminate = true;
            state.queue.clear();
            self.shared.task_available.notify_all();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
