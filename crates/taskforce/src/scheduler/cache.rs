//! Cache of worker objects whose execution thread has exited.
//!
//! Keeping the objects around decouples allocation (channel, timestamp)
//! from thread creation: restarting a cached worker only spawns a thread.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::scheduler::Worker;

/// Unordered, unbounded store of reusable worker objects.
pub struct WorkerCache<T> {
    workers: Mutex<Vec<Arc<Worker<T>>>>,
}

impl<T: Send + 'static> WorkerCache<T> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Take any cached worker object, or `None` when the cache is empty.
    pub fn acquire(&self) -> Option<Arc<Worker<T>>> {
        self.workers.lock().pop()
    }

    /// Store a worker object for later reuse.
    pub fn release(&self, worker: Arc<Worker<T>>) {
        self.workers.lock().push(worker);
    }

    /// Number of cached worker objects.
    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.workers.lock().is_empty()
    }
}

impl<T: Send + 'static> Default for WorkerCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
