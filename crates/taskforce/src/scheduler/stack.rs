//! Bounded LIFO of idle workers.
//!
//! The stack is ordered by push time, and because a worker's timestamp is
//! refreshed right after a successful push, entries are also sorted by
//! last-use from oldest (bottom) to newest (top). Expiry reclaims a prefix
//! of the stack found with a binary search over those timestamps.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::StackError;
use crate::scheduler::Worker;

/// LIFO container for workers that are alive but parked on an empty inbox.
pub struct IdleStack<T> {
    data: Mutex<Vec<Arc<Worker<T>>>>,
    size: usize,
}

impl<T: Send + 'static> IdleStack<T> {
    /// Create a stack bounded to `size` workers.
    pub fn new(size: usize) -> Self {
        Self {
            data: Mutex::new(Vec::with_capacity(size)),
            size,
        }
    }

    /// Number of parked workers.
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// True when no worker is parked.
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    /// Park a worker on top of the stack.
    ///
    /// The caller must refresh the worker's timestamp after this returns
    /// successfully, keeping the stack sorted by last-use.
    pub fn push(&self, worker: Arc<Worker<T>>) -> Result<(), StackError> {
        let mut data = self.data.lock();
        if data.len() >= self.size {
            return Err(StackError::Full);
        }
        data.push(worker);
        Ok(())
    }

    /// Take the most recently parked worker, if any.
    pub fn pop(&self) -> Option<Arc<Worker<T>>> {
        self.data.lock().pop()
    }

    /// Tell every parked worker to finish and drop all references.
    pub fn clear(&self) {
        let mut data = self.data.lock();
        for worker in data.drain(..) {
            worker.finish();
        }
    }

    /// Reclaim every worker whose last use is at or before `cutoff`.
    ///
    /// Expired workers form a prefix of the stack, located with a binary
    /// search; each one is told to finish. Returns the number removed.
    pub fn clear_expired(&self, cutoff: Instant) -> usize {
        let mut data = self.data.lock();
        let expired = data.partition_point(|worker| worker.last_used() <= cutoff);
        for worker in data.drain(..expired) {
            worker.finish();
        }
        expired
    }

    /// Reserved for dynamic resizing; currently a no-op.
    pub fn scale(&self, _capacity: i32) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn new_worker() -> Arc<Worker<usize>> {
        Arc::new(Worker::new())
    }

    #[test]
    fn test_push_pop_lifo_order() {
        let stack = IdleStack::new(4);
        let first = new_worker();
        let second = new_worker();

        stack.push(Arc::clone(&first)).unwrap();
        stack.push(Arc::clone(&second)).unwrap();
        assert_eq!(stack.len(), 2);

        let top = stack.pop().unwrap();
        assert!(Arc::ptr_eq(&top, &second));
        let next = stack.pop().unwrap();
        assert!(Arc::ptr_eq(&next, &first));
        assert!(stack.pop().is_none());
    }

    #[test]
    fn test_push_rejected_when_full() {
        let stack = IdleStack::new(1);
        stack.push(new_worker()).unwrap();
        assert_eq!(stack.push(new_worker()), Err(StackError::Full));
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_clear_empties_stack() {
        let stack = IdleStack::new(3);
        for _ in 0..3 {
            stack.push(new_worker()).unwrap();
        }
        stack.clear();
        assert!(stack.is_empty());
        assert!(stack.pop().is_none());
    }

    #[test]
    fn test_clear_expired_removes_old_prefix() {
        let stack = IdleStack::new(4);
        let old = new_worker();
        stack.push(Arc::clone(&old)).unwrap();
        old.refresh();

        thread::sleep(Duration::from_millis(20));
        let cutoff = Instant::now();
        thread::sleep(Duration::from_millis(20));

        let fresh = new_worker();
        stack.push(Arc::clone(&fresh)).unwrap();
        fresh.refresh();

        assert_eq!(stack.clear_expired(cutoff), 1);
        assert_eq!(stack.len(), 1);
        let survivor = stack.pop().unwrap();
        assert!(Arc::ptr_eq(&survivor, &fresh));
    }

    #[test]
    fn test_clear_expired_keeps_fresh_workers() {
        let stack = IdleStack::new(2);
        let cutoff = Instant::now();
        thread::sleep(Duration::from_millis(10));

        let worker = new_worker();
        stack.push(Arc::clone(&worker)).unwrap();
        worker.refresh();

        assert_eq!(stack.clear_expired(cutoff), 0);
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_clear_expired_removes_everything_past_cutoff() {
        let stack = IdleStack::new(3);
        for _ in 0..3 {
            let worker = new_worker();
            stack.push(Arc::clone(&worker)).unwrap();
            worker.refresh();
        }
        thread::sleep(Duration::from_millis(10));

        assert_eq!(stack.clear_expired(Instant::now()), 3);
        assert!(stack.is_empty());
    }
}
