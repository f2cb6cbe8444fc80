//! Scheduler core: capacity accounting, the admission gate, worker
//! handoffs, expiry coordination, and shutdown.
//!
//! Locking discipline: the gate mutex orders admission waits against
//! `put_ready`/`release` (both re-check the closed flag inside it, so a
//! worker can never be parked on the stack after the stack was cleared);
//! the stack and cache mutexes are leaves. Counters and the state flag are
//! atomics, so introspection never takes a lock.

use std::any::Any;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Once, Weak};
use std::time::{Duration, Instant};

use log::{debug, error};
use parking_lot::{Condvar, Mutex};

use crate::error::SchedulerError;
use crate::options::Options;
use crate::scheduler::{IdleStack, Worker, WorkerCache};

const STATE_OPENED: i32 = 0;
const STATE_CLOSED: i32 = 1;

/// Handler invoked by workers for every task.
pub type TaskHandler<T> = Arc<dyn Fn(T) + Send + Sync + 'static>;

/// Dispatches tasks to a bounded set of long-lived workers.
///
/// Workers come from three places, tried in order: the idle stack (most
/// recently used first), a freshly started thread when `running` is below
/// capacity, and — for submitters willing to wait — whichever of the two
/// the admission gate's wakeup reveals.
pub struct Scheduler<T> {
    me: Weak<Self>,

    state: AtomicI32,
    capacity: AtomicI32,
    running: AtomicI32,
    waiting: AtomicI32,

    gate: Mutex<()>,
    cond: Condvar,

    ready_workers: IdleStack<T>,
    cache_workers: WorkerCache<T>,

    done: Mutex<bool>,
    done_cond: Condvar,
    done_once: Once,

    handler: TaskHandler<T>,
    options: Options,
}

impl<T: Send + 'static> Scheduler<T> {
    /// Create an open scheduler with the given capacity and task handler.
    pub fn new(capacity: i32, handler: TaskHandler<T>, options: Options) -> Arc<Self> {
        assert!(capacity > 0, "scheduler capacity must be positive");
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            state: AtomicI32::new(STATE_OPENED),
            capacity: AtomicI32::new(capacity),
            running: AtomicI32::new(0),
            waiting: AtomicI32::new(0),
            gate: Mutex::new(()),
            cond: Condvar::new(),
            ready_workers: IdleStack::new(capacity as usize),
            cache_workers: WorkerCache::new(),
            done: Mutex::new(false),
            done_cond: Condvar::new(),
            done_once: Once::new(),
            handler,
            options,
        })
    }

    /// Obtain a worker with an empty inbox, ready to accept one task.
    ///
    /// Tries the idle stack first, then starts a new worker if a capacity
    /// slot can be reserved, and otherwise parks in the admission gate
    /// until one of those becomes possible (or fails fast under the
    /// non-blocking / bounded-waiters policies).
    pub fn get(&self) -> Result<Arc<Worker<T>>, SchedulerError> {
        loop {
            if let Some(worker) = self.ready_workers.pop() {
                return Ok(worker);
            }
            if self.closed() {
                return Err(SchedulerError::Closed);
            }
            if self.try_reserve() {
                return Ok(self.boot_worker());
            }
            self.blocking()?;
        }
    }

    /// Park a worker on the idle stack and wake one waiting submitter.
    ///
    /// An error tells the calling worker to exit instead: the scheduler is
    /// closed, or the stack is full (impossible in correct steady state
    /// but still a clean exit path).
    pub fn put_ready(&self, worker: &Arc<Worker<T>>) -> Result<(), SchedulerError> {
        let _gate = self.gate.lock();
        if self.closed() {
            return Err(SchedulerError::Closed);
        }
        self.ready_workers.push(Arc::clone(worker))?;
        // Refresh after the push so stack order matches timestamp order.
        worker.refresh();
        self.cond.notify_one();
        Ok(())
    }

    /// Return an exited worker's object to the cache, releasing its
    /// capacity slot, and wake one waiting submitter.
    pub fn put_cache(&self, worker: &Arc<Worker<T>>) {
        let running = self.running.fetch_sub(1, Ordering::AcqRel) - 1;
        self.cache_workers.release(Arc::clone(worker));
        if self.closed() && running == 0 {
            self.close_done();
        }
        self.signal_one();
    }

    /// The task handler workers run.
    pub fn handler(&self) -> &(dyn Fn(T) + Send + Sync) {
        self.handler.as_ref()
    }

    /// Route a task's panic payload to the configured handler, falling
    /// back to the log facade.
    pub fn recover(&self, payload: Box<dyn Any + Send>) {
        if let Some(handler) = &self.options.panic_handler {
            handler(payload);
            return;
        }
        error!("worker exited from panic: {}", panic_message(payload.as_ref()));
    }

    /// Reclaim idle workers unused for longer than `duration` (zero means
    /// the configured expiry). Wakes every waiting submitter when at
    /// least one worker was reclaimed, since each reclaimed slot frees
    /// room for a new worker.
    pub fn clear_expired(&self, duration: Duration) {
        if self.ready_workers.is_empty() {
            return;
        }
        let duration = if duration.is_zero() {
            self.options.expiry_duration
        } else {
            duration
        };
        if duration.is_zero() {
            return;
        }
        // A cutoff before the clock's epoch means nothing can be expired.
        let Some(cutoff) = Instant::now().checked_sub(duration) else {
            return;
        };
        let removed = self.ready_workers.clear_expired(cutoff);
        if removed > 0 {
            debug!("reclaimed {} expired idle workers", removed);
            if self.waiting() > 0 {
                self.broadcast();
            }
        }
    }

    /// Close the scheduler: finish every idle worker, wake all blocked
    /// submitters, and complete the done latch once no worker remains.
    pub fn release(&self) {
        if self
            .state
            .compare_exchange(STATE_OPENED, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        {
            let _gate = self.gate.lock();
            self.ready_workers.clear();
            self.cond.notify_all();
        }
        if self.running() == 0 {
            self.close_done();
        }
        debug!("scheduler released; running={}", self.running());
    }

    /// Block until every worker has exited, if any is still running.
    pub fn wait(&self) {
        if self.running() == 0 {
            return;
        }
        let mut done = self.done.lock();
        while !*done {
            self.done_cond.wait(&mut done);
        }
    }

    /// Like [`wait`](Self::wait) with a deadline. Returns false when the
    /// timeout expired before every worker exited.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.running() == 0 {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        while !*done {
            if self.done_cond.wait_until(&mut done, deadline).timed_out() {
                return *done;
            }
        }
        true
    }

    /// True once the scheduler is closed and the last worker has exited.
    pub fn done(&self) -> bool {
        *self.done.lock()
    }

    /// Maximum number of concurrently live workers.
    pub fn cap(&self) -> i32 {
        self.capacity.load(Ordering::Acquire)
    }

    /// Capacity slots currently unclaimed.
    pub fn free(&self) -> i32 {
        self.cap() - self.running()
    }

    /// Workers with a live execution thread, busy or idle.
    pub fn running(&self) -> i32 {
        self.running.load(Ordering::Acquire)
    }

    /// Submitters currently parked in the admission gate.
    pub fn waiting(&self) -> i32 {
        self.waiting.load(Ordering::Acquire)
    }

    /// Mark the scheduler open.
    pub fn open(&self) {
        self.state.store(STATE_OPENED, Ordering::Release);
    }

    /// Mark the scheduler closed without draining workers.
    pub fn close(&self) {
        self.state.store(STATE_CLOSED, Ordering::Release);
    }

    /// True while the scheduler accepts work.
    pub fn opened(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_OPENED
    }

    /// True once the scheduler has been closed.
    pub fn closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_CLOSED
    }

    /// Replace the capacity bound. Live workers are not rebalanced;
    /// reserved for future dynamic resizing.
    pub fn scale(&self, capacity: i32) {
        self.capacity.store(capacity, Ordering::Release);
        self.ready_workers.scale(capacity);
    }

    /// Claim a capacity slot for a new worker, bounded by `capacity`.
    fn try_reserve(&self) -> bool {
        self.running
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |running| {
                (running < self.cap()).then_some(running + 1)
            })
            .is_ok()
    }

    /// Start a worker for an already-reserved slot, reusing a cached
    /// object when one is available.
    fn boot_worker(&self) -> Arc<Worker<T>> {
        let scheduler = self.me.upgrade().expect("scheduler dropped while in use");
        let worker = self
            .cache_workers
            .acquire()
            .unwrap_or_else(|| Arc::new(Worker::new()));
        worker.run(scheduler);
        worker
    }

    /// Park the caller until capacity frees up or an idle worker appears.
    ///
    /// The waiter bound is checked before joining the waiters, so with
    /// `max_blocking_tasks = N` exactly N submitters can be parked and the
    /// N+1-th fails fast.
    fn blocking(&self) -> Result<(), SchedulerError> {
        let mut gate = self.gate.lock();
        if self.closed() {
            return Err(SchedulerError::Closed);
        }
        while self.opened() && self.free() <= 0 && self.ready_workers.is_empty() {
            if self.options.nonblocking {
                return Err(SchedulerError::Full);
            }
            let max_blocking = self.options.max_blocking_tasks;
            if max_blocking != 0 && self.waiting() as usize >= max_blocking {
                return Err(SchedulerError::Full);
            }
            self.waiting.fetch_add(1, Ordering::AcqRel);
            self.cond.wait(&mut gate);
            self.waiting.fetch_sub(1, Ordering::AcqRel);
            if self.closed() {
                return Err(SchedulerError::Closed);
            }
        }
        Ok(())
    }

    // Notifications take the gate mutex: the gate predicate reads atomics,
    // so an unlocked notify could slip between a waiter's predicate check
    // and its park and be lost.
    fn signal_one(&self) {
        let _gate = self.gate.lock();
        self.cond.notify_one();
    }

    fn broadcast(&self) {
        let _gate = self.gate.lock();
        self.cond.notify_all();
    }

    fn close_done(&self) {
        self.done_once.call_once(|| {
            *self.done.lock() = true;
            self.done_cond.notify_all();
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "opaque panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    fn noop_scheduler(capacity: i32) -> Arc<Scheduler<usize>> {
        let handler: TaskHandler<usize> = Arc::new(|_| {});
        Scheduler::new(capacity, handler, Options::default())
    }

    fn eventually(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        predicate()
    }

    #[test]
    fn test_new_scheduler_is_open_and_idle() {
        let scheduler = noop_scheduler(4);
        assert!(scheduler.opened());
        assert!(!scheduler.closed());
        assert_eq!(scheduler.cap(), 4);
        assert_eq!(scheduler.running(), 0);
        assert_eq!(scheduler.free(), 4);
        assert_eq!(scheduler.waiting(), 0);
    }

    #[test]
    fn test_get_reserves_capacity_slots() {
        let scheduler = noop_scheduler(2);
        let first = scheduler.get().unwrap();
        let second = scheduler.get().unwrap();
        assert_eq!(scheduler.running(), 2);
        assert_eq!(scheduler.free(), 0);

        first.finish();
        second.finish();
        assert!(eventually(Duration::from_secs(1), || scheduler.running() == 0));
        scheduler.release();
    }

    #[test]
    fn test_nonblocking_get_fails_at_capacity() {
        let handler: TaskHandler<usize> = Arc::new(|_| {});
        let scheduler = Scheduler::new(1, handler, Options::new().with_nonblocking(true));

        let worker = scheduler.get().unwrap();
        assert!(matches!(scheduler.get(), Err(SchedulerError::Full)));

        worker.finish();
        assert!(eventually(Duration::from_secs(1), || scheduler.running() == 0));
        scheduler.release();
    }

    #[test]
    fn test_put_ready_refreshes_after_push_and_pops_lifo() {
        let scheduler = noop_scheduler(2);
        let first = Arc::new(Worker::new());
        let second = Arc::new(Worker::new());

        scheduler.put_ready(&first).unwrap();
        thread::sleep(Duration::from_millis(5));
        scheduler.put_ready(&second).unwrap();

        assert!(second.last_used() >= first.last_used());
        let top = scheduler.get().unwrap();
        assert!(Arc::ptr_eq(&top, &second));
        scheduler.release();
    }

    #[test]
    fn test_stack_timestamps_nondecreasing() {
        let scheduler = noop_scheduler(4);
        for _ in 0..4 {
            let worker = Arc::new(Worker::new());
            scheduler.put_ready(&worker).unwrap();
            thread::sleep(Duration::from_millis(2));
        }

        let mut newest = Instant::now();
        while let Some(worker) = scheduler.ready_workers.pop() {
            assert!(worker.last_used() <= newest);
            newest = worker.last_used();
        }
        scheduler.release();
    }

    #[test]
    fn test_put_ready_rejected_after_release() {
        let scheduler = noop_scheduler(1);
        scheduler.release();
        let worker = Arc::new(Worker::new());
        assert_eq!(scheduler.put_ready(&worker), Err(SchedulerError::Closed));
    }

    #[test]
    fn test_release_wakes_blocked_getter() {
        let scheduler = noop_scheduler(1);
        let worker = scheduler.get().unwrap();

        let contender = Arc::clone(&scheduler);
        let waiter = thread::spawn(move || contender.get());
        assert!(eventually(Duration::from_secs(1), || scheduler.waiting() == 1));

        scheduler.release();
        assert!(matches!(waiter.join().unwrap(), Err(SchedulerError::Closed)));

        // The still-running worker exits through the cache and completes
        // the done latch.
        worker.finish();
        scheduler.wait();
        assert_eq!(scheduler.running(), 0);
    }

    #[test]
    fn test_worker_executes_and_returns_to_stack() {
        let counter = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&counter);
        let handler: TaskHandler<usize> = Arc::new(move |n| {
            sink.fetch_add(n, Ordering::SeqCst);
        });
        let scheduler = Scheduler::new(1, handler, Options::default());

        let worker = scheduler.get().unwrap();
        worker.put(7);
        assert!(eventually(Duration::from_secs(1), || {
            counter.load(Ordering::SeqCst) == 7
        }));
        assert!(eventually(Duration::from_secs(1), || {
            !scheduler.ready_workers.is_empty()
        }));
        assert_eq!(scheduler.running(), 1);

        scheduler.release();
        scheduler.wait();
        assert_eq!(scheduler.running(), 0);
    }

    #[test]
    fn test_exited_worker_object_is_reused() {
        let scheduler = noop_scheduler(1);
        let worker = scheduler.get().unwrap();
        worker.finish();
        assert!(eventually(Duration::from_secs(1), || scheduler.running() == 0));

        let reused = scheduler.get().unwrap();
        assert!(Arc::ptr_eq(&reused, &worker));
        assert_eq!(scheduler.running(), 1);

        reused.finish();
        assert!(eventually(Duration::from_secs(1), || scheduler.running() == 0));
        scheduler.release();
    }

    #[test]
    fn test_clear_expired_reclaims_idle_workers() {
        let counter = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&counter);
        let handler: TaskHandler<usize> = Arc::new(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        let scheduler = Scheduler::new(2, handler, Options::default());

        let first = scheduler.get().unwrap();
        let second = scheduler.get().unwrap();
        first.put(1);
        second.put(2);
        assert!(eventually(Duration::from_secs(1), || {
            scheduler.ready_workers.len() == 2
        }));

        thread::sleep(Duration::from_millis(20));
        scheduler.clear_expired(Duration::from_millis(1));
        assert!(scheduler.ready_workers.is_empty());
        assert!(eventually(Duration::from_secs(1), || scheduler.running() == 0));
        scheduler.release();
    }

    #[test]
    fn test_recover_prefers_panic_handler() {
        let caught = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&caught);
        let options = Options::new().with_panic_handler(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let handler: TaskHandler<usize> = Arc::new(|n| {
            if n == 13 {
                panic!("unlucky task");
            }
        });
        let scheduler = Scheduler::new(1, handler, options);

        let worker = scheduler.get().unwrap();
        worker.put(13);
        assert!(eventually(Duration::from_secs(1), || {
            caught.load(Ordering::SeqCst) == 1
        }));
        // The panicking worker released its slot through the cache.
        assert!(eventually(Duration::from_secs(1), || scheduler.running() == 0));
        scheduler.release();
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(payload.as_ref()), "owned message");

        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(payload.as_ref()), "opaque panic payload");
    }

    #[test]
    fn test_release_is_idempotent() {
        let scheduler = noop_scheduler(1);
        assert!(!scheduler.done());
        scheduler.release();
        scheduler.release();
        assert!(scheduler.closed());
        scheduler.wait();
        assert!(scheduler.done());
    }
}
