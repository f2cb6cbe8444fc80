//! Pool facade and the periodic expiry sweeper.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::trace;
use parking_lot::{Condvar, Mutex};

use crate::error::{PoolError, SchedulerError};
use crate::options::Options;
use crate::scheduler::{Scheduler, TaskHandler};

/// Boxed closure task for pools that execute submissions directly.
pub type BoxedTask = Box<dyn FnOnce() + Send + 'static>;

/// A pool whose tasks are boxed closures run as-is.
pub type ClosurePool = Pool<BoxedTask>;

/// Bounded worker pool dispatching tasks of type `T` to a user handler.
///
/// Submissions hand the task straight to a worker: one popped from the
/// idle stack, one newly started below the capacity bound, or — for
/// blocking submitters — one obtained after parking in the admission
/// gate. Workers idle past the expiry threshold are reclaimed by a
/// background sweeper owned by the pool.
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use taskforce::Pool;
///
/// let sum = Arc::new(AtomicUsize::new(0));
/// let sink = Arc::clone(&sum);
/// let pool = Pool::new(4, move |n: usize| {
///     sink.fetch_add(n, Ordering::SeqCst);
/// });
///
/// for n in 0..10 {
///     pool.submit(n).unwrap();
/// }
/// pool.release_with_wait();
/// assert_eq!(sum.load(Ordering::SeqCst), 45);
/// ```
pub struct Pool<T: Send + 'static> {
    scheduler: Arc<Scheduler<T>>,
    sweeper: Option<ExpirySweeper>,
}

impl<T: Send + 'static> Pool<T> {
    /// Create a pool with default options. A capacity of zero means one
    /// worker per logical CPU.
    pub fn new(capacity: usize, handler: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self::with_options(capacity, Options::default(), handler)
    }

    /// Create a pool with explicit options.
    pub fn with_options(
        capacity: usize,
        options: Options,
        handler: impl Fn(T) + Send + Sync + 'static,
    ) -> Self {
        let capacity = if capacity == 0 {
            num_cpus::get()
        } else {
            capacity
        };
        let capacity = i32::try_from(capacity).expect("pool capacity exceeds i32::MAX");
        let handler: TaskHandler<T> = Arc::new(handler);
        let scheduler = Scheduler::new(capacity, handler, options.clone());
        let sweeper = if options.expiry_duration.is_zero() {
            None
        } else {
            Some(ExpirySweeper::start(
                Arc::clone(&scheduler),
                options.expiry_duration,
            ))
        };
        Self { scheduler, sweeper }
    }

    /// Hand one task to a worker.
    ///
    /// Blocks in the admission gate while the pool is saturated, unless
    /// non-blocking mode or the waiter bound turns that into a
    /// [`PoolError::Submit`] failure.
    pub fn submit(&self, task: T) -> Result<(), PoolError> {
        if self.scheduler.closed() {
            return Err(PoolError::Closed);
        }
        match self.scheduler.get() {
            Ok(worker) => {
                worker.put(task);
                Ok(())
            }
            Err(SchedulerError::Closed) => Err(PoolError::Closed),
            Err(err) => Err(PoolError::Submit(err)),
        }
    }

    /// Close the pool: reject new submissions, finish idle workers, wake
    /// blocked submitters, and stop the expiry sweeper. In-flight tasks
    /// keep running.
    pub fn release(&self) {
        self.scheduler.release();
        if let Some(sweeper) = &self.sweeper {
            sweeper.stop();
        }
    }

    /// Block until every worker has exited.
    pub fn wait(&self) {
        self.scheduler.wait();
    }

    /// Release, then wait for every worker to exit.
    pub fn release_with_wait(&self) {
        self.release();
        self.scheduler.wait();
    }

    /// Release, then wait up to `timeout` for every worker to exit.
    ///
    /// On timeout the pool stays closed and workers keep draining in the
    /// background; nothing is rolled back.
    pub fn release_with_timeout(&self, timeout: Duration) -> Result<(), PoolError> {
        self.release();
        if self.scheduler.wait_timeout(timeout) {
            Ok(())
        } else {
            Err(PoolError::ReleaseTimeout)
        }
    }

    /// Maximum number of concurrently live workers.
    pub fn cap(&self) -> i32 {
        self.scheduler.cap()
    }

    /// Capacity slots currently unclaimed.
    pub fn free(&self) -> i32 {
        self.scheduler.free()
    }

    /// Workers with a live execution thread, busy or idle.
    pub fn running(&self) -> i32 {
        self.scheduler.running()
    }

    /// Submitters currently parked in the admission gate.
    pub fn waiting(&self) -> i32 {
        self.scheduler.waiting()
    }

    /// True while the pool accepts submissions.
    pub fn opened(&self) -> bool {
        self.scheduler.opened()
    }

    /// True once the pool has been released.
    pub fn closed(&self) -> bool {
        self.scheduler.closed()
    }
}

impl Pool<BoxedTask> {
    /// Pool that runs submitted closures directly, with default options.
    pub fn closure_pool(capacity: usize) -> ClosurePool {
        Self::closure_pool_with_options(capacity, Options::default())
    }

    /// Pool that runs submitted closures directly.
    pub fn closure_pool_with_options(capacity: usize, options: Options) -> ClosurePool {
        Pool::with_options(capacity, options, |task: BoxedTask| task())
    }

    /// Box and submit a closure.
    pub fn submit_fn(&self, task: impl FnOnce() + Send + 'static) -> Result<(), PoolError> {
        self.submit(Box::new(task))
    }
}

impl<T: Send + 'static> Drop for Pool<T> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Background thread that periodically asks the scheduler to reclaim
/// expired idle workers. The sweep period equals the expiry threshold, so
/// a worker can survive at most twice that long after its last use.
struct ExpirySweeper {
    shared: Arc<SweeperShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

struct SweeperShared {
    gate: Mutex<()>,
    wakeup: Condvar,
    shutdown: AtomicBool,
}

impl ExpirySweeper {
    fn start<T: Send + 'static>(scheduler: Arc<Scheduler<T>>, period: Duration) -> Self {
        let shared = Arc::new(SweeperShared {
            gate: Mutex::new(()),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let sweeper = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("taskforce-sweeper".to_string())
            .spawn(move || loop {
                {
                    let mut gate = sweeper.gate.lock();
                    if sweeper.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    sweeper.wakeup.wait_for(&mut gate, period);
                    // Re-check after waking: stop() signals under the gate
                    // lock, so a set flag is visible here.
                    if sweeper.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                }
                if scheduler.closed() {
                    break;
                }
                scheduler.clear_expired(Duration::ZERO);
            })
            .expect("failed to spawn expiry sweeper thread");
        trace!("expiry sweeper started with period {:?}", period);
        Self {
            shared,
            handle: Mutex::new(Some(handle)),
        }
    }

    fn stop(&self) {
        {
            let _gate = self.shared.gate.lock();
            self.shared.shutdown.store(true, Ordering::Release);
            self.shared.wakeup.notify_one();
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
            trace!("expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
