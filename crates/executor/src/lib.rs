//! Bounded worker pools for command execution
//!
//! Commands run to completion on a fixed pool of worker threads; the only
//! blocking a worker does mid-command is waiting on a latch or a
//! conflicting transaction. The queue is bounded: when full, submission
//! fails immediately with `PoolFullError` instead of growing without
//! bound — that error is the caller's explicit backpressure signal.

#![warn(clippy::all)]

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::error;

/// Error returned when a pool's queue is at capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolFullError {
    /// The saturated pool's name.
    pub pool: String,
}

impl std::fmt::Display for PoolFullError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker pool {} queue is full", self.pool)
    }
}

impl std::error::Error for PoolFullError {}

/// Pool metrics snapshot.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    /// Tasks waiting in the queue.
    pub queue_depth: usize,
    /// Tasks currently executing.
    pub active_tasks: usize,
    /// Tasks completed since creation.
    pub tasks_completed: u64,
    /// Worker thread count.
    pub worker_count: usize,
}

type Task = Box<dyn FnOnce() + Send>;

struct PoolInner {
    name: String,
    queue: Mutex<VecDeque<Task>>,
    work_ready: Condvar,
    shutdown: AtomicBool,
    queue_depth: AtomicUsize,
    active_tasks: AtomicUsize,
    tasks_completed: AtomicU64,
    capacity: usize,
}

/// Fixed-size worker pool with a bounded FIFO queue.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `workers` threads serving a queue of at most `capacity`
    /// pending tasks.
    pub fn new(name: impl Into<String>, workers: usize, capacity: usize) -> Self {
        let inner = Arc::new(PoolInner {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
            queue_depth: AtomicUsize::new(0),
            active_tasks: AtomicUsize::new(0),
            tasks_completed: AtomicU64::new(0),
            capacity: capacity.max(1),
        });
        let handles = (0..workers.max(1))
            .map(|idx| {
                let inner = Arc::clone(&inner);
                std::thread::Builder::new()
                    .name(format!("{}-{}", inner.name, idx))
                    .spawn(move || worker_loop(inner))
                    .expect("spawn worker thread")
            })
            .collect();
        Self {
            inner,
            workers: Mutex::new(handles),
        }
    }

    /// Enqueue a task, or fail fast when the queue is at capacity.
    pub fn try_execute<F>(&self, task: F) -> Result<(), PoolFullError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.inner.queue.lock();
        if self.inner.shutdown.load(Ordering::Acquire) || queue.len() >= self.inner.capacity {
            return Err(PoolFullError {
                pool: self.inner.name.clone(),
            });
        }
        queue.push_back(Box::new(task));
        self.inner.queue_depth.store(queue.len(), Ordering::Release);
        drop(queue);
        self.inner.work_ready.notify_one();
        Ok(())
    }

    /// Current metrics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            queue_depth: self.inner.queue_depth.load(Ordering::Acquire),
            active_tasks: self.inner.active_tasks.load(Ordering::Acquire),
            tasks_completed: self.inner.tasks_completed.load(Ordering::Acquire),
            worker_count: self.workers.lock().len(),
        }
    }

    /// Stop accepting work, finish what is queued, join the workers.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.work_ready.notify_all();
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(inner: Arc<PoolInner>) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    inner.queue_depth.store(queue.len(), Ordering::Release);
                    break Some(task);
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    break None;
                }
                inner.work_ready.wait(&mut queue);
            }
        };
        let Some(task) = task else {
            return;
        };
        inner.active_tasks.fetch_add(1, Ordering::AcqRel);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task));
        inner.active_tasks.fetch_sub(1, Ordering::AcqRel);
        inner.tasks_completed.fetch_add(1, Ordering::AcqRel);
        if result.is_err() {
            error!(pool = %inner.name, "worker task panicked");
        }
    }
}

/// The engine's two command pools: reads and writes are admitted
/// independently so a write stall cannot starve reads of queue space.
pub struct PoolPair {
    /// Pool serving read commands.
    pub read: WorkerPool,
    /// Pool serving write commands.
    pub write: WorkerPool,
}

impl PoolPair {
    /// Build both pools with the same sizing.
    pub fn new(workers: usize, capacity: usize) -> Self {
        Self {
            read: WorkerPool::new("read-pool", workers, capacity),
            write: WorkerPool::new("write-pool", workers, capacity),
        }
    }
}
