//! Bounded work queue with an elastic worker pool.
//!
//! Tasks wait in a bounded FIFO; submitters block (up to a deadline) while it
//! is full. Workers are spawned on demand up to `max_threads`; those above
//! `core_threads` retire after `keep_alive` without work. A pending counter
//! covers queued and in-flight tasks, and waiters on it are woken the moment
//! it reaches zero.
//!
//! One pool serves one ingestion run and is discarded after `shutdown`.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub core_threads: usize,
    pub max_threads: usize,
    pub queue_capacity: usize,
    pub keep_alive: Duration,
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_threads: 10,
            max_threads: 20,
            queue_capacity: 1000,
            keep_alive: Duration::from_secs(10),
            thread_name: "ingest-worker".to_string(),
        }
    }
}

/// Why a task was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    Full,
    ShutDown,
}

#[derive(Debug, Default)]
pub struct PoolStats {
    pub completed: AtomicUsize,
    pub failed: AtomicUsize,
}

type Handler<T> = Arc<dyn Fn(T) -> Result<()> + Send + Sync>;

struct State<T> {
    queue: VecDeque<T>,
    pending: usize,
    workers: usize,
    idle: usize,
    spawned: usize,
    shutdown: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    drained: Condvar,
    terminated: Condvar,
    handler: Handler<T>,
    config: PoolConfig,
    stats: PoolStats,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct WorkerPool<T: Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new<F>(config: PoolConfig, handler: F) -> Self
    where
        F: Fn(T) -> Result<()> + Send + Sync + 'static,
    {
        let config = PoolConfig {
            core_threads: config.core_threads.max(1),
            max_threads: config.max_threads.max(config.core_threads.max(1)),
            queue_capacity: config.queue_capacity.max(1),
            ..config
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    pending: 0,
                    workers: 0,
                    idle: 0,
                    spawned: 0,
                    shutdown: false,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                drained: Condvar::new(),
                terminated: Condvar::new(),
                handler: Arc::new(handler),
                config,
                stats: PoolStats::default(),
            }),
        }
    }

    /// Queues `task`, waiting up to `timeout` for room.
    pub fn submit_timeout(&self, task: T, timeout: Duration) -> Result<(), Rejected> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            if state.shutdown {
                return Err(Rejected::ShutDown);
            }
            if state.queue.len() < self.shared.config.queue_capacity {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Rejected::Full);
            }
            state = self
                .shared
                .not_full
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        state.queue.push_back(task);
        state.pending += 1;
        if state.idle == 0 && state.workers < self.shared.config.max_threads {
            spawn_worker(&self.shared, &mut state);
        }
        drop(state);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Tasks queued but not yet picked up.
    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Tasks queued or running.
    pub fn pending(&self) -> usize {
        self.shared.lock().pending
    }

    pub fn workers(&self) -> usize {
        self.shared.lock().workers
    }

    pub fn stats(&self) -> &PoolStats {
        &self.shared.stats
    }

    /// Blocks until no task is queued or running, or `ceiling` elapses.
    ///
    /// `on_wait` receives the pending count each time the wait has lasted
    /// another `interval` without draining. Returns whether the pool drained.
    pub fn wait_drained<F>(&self, interval: Duration, ceiling: Duration, mut on_wait: F) -> bool
    where
        F: FnMut(usize),
    {
        let deadline = Instant::now() + ceiling;
        let mut state = self.shared.lock();
        loop {
            if state.pending == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let slice = interval.min(deadline - now);
            let (guard, timeout) = self
                .shared
                .drained
                .wait_timeout(state, slice)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
            if timeout.timed_out() && state.pending > 0 {
                let pending = state.pending;
                drop(state);
                on_wait(pending);
                state = self.shared.lock();
            }
        }
    }

    /// Stops accepting work and waits up to `timeout` for workers to finish
    /// what is already queued. Returns whether every worker exited in time.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        state.shutdown = true;
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();

        while state.workers > 0 {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    workers = state.workers,
                    queued = state.queue.len(),
                    "worker pool did not terminate in time"
                );
                return false;
            }
            state = self
                .shared
                .terminated
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

fn spawn_worker<T: Send + 'static>(shared: &Arc<Shared<T>>, state: &mut State<T>) {
    state.spawned += 1;
    let name = format!("{}-{}", shared.config.thread_name, state.spawned);
    let worker_shared = Arc::clone(shared);
    match std::thread::Builder::new()
        .name(name)
        .spawn(move || worker_loop(worker_shared))
    {
        Ok(_) => state.workers += 1,
        Err(err) => tracing::warn!(error = %err, "failed to spawn worker thread"),
    }
}

fn worker_loop<T: Send + 'static>(shared: Arc<Shared<T>>) {
    loop {
        let task = {
            let mut state = shared.lock();
            loop {
                if let Some(task) = state.queue.pop_front() {
                    shared.not_full.notify_one();
                    break task;
                }
                if state.shutdown {
                    retire(&shared, &mut state);
                    return;
                }
                state.idle += 1;
                let (guard, timeout) = shared
                    .not_empty
                    .wait_timeout(state, shared.config.keep_alive)
                    .unwrap_or_else(PoisonError::into_inner);
                state = guard;
                state.idle -= 1;
                if timeout.timed_out()
                    && state.queue.is_empty()
                    && state.workers > shared.config.core_threads
                {
                    retire(&shared, &mut state);
                    return;
                }
            }
        };

        let handler = Arc::clone(&shared.handler);
        match catch_unwind(AssertUnwindSafe(move || handler(task))) {
            Ok(Ok(())) => {
                shared.stats.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(err)) => {
                shared.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %err, "task failed");
            }
            Err(_) => {
                shared.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!("task panicked");
            }
        }

        let mut state = shared.lock();
        state.pending -= 1;
        if state.pending == 0 {
            shared.drained.notify_all();
        }
    }
}

fn retire<T>(shared: &Shared<T>, state: &mut State<T>) {
    state.workers -= 1;
    if state.workers == 0 {
        shared.terminated.notify_all();
    }
}
