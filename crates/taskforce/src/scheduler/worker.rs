//! Worker objects and their execution loop.
//!
//! A worker couples a capacity-1 inbox with at most one live execution
//! thread. The thread blocks on the inbox, runs each received task through
//! the scheduler's handler, and parks itself back on the idle stack. It
//! exits when it receives the finish sentinel, when parking fails (the
//! scheduler closed or the stack was full), or after a task panics; every
//! exit routes the worker object to the scheduler's cache exactly once.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::trace;
use parking_lot::Mutex;

use crate::scheduler::Scheduler;

static NEXT_WORKER_ID: AtomicUsize = AtomicUsize::new(1);

/// What a producer deposits into a worker's inbox.
enum Message<T> {
    /// One unit of work for the handler.
    Task(T),
    /// Sentinel telling the execution thread to exit.
    Finish,
}

/// A single unit of execution paired with a one-slot inbox.
pub struct Worker<T> {
    id: usize,
    inbox_tx: Sender<Message<T>>,
    inbox_rx: Receiver<Message<T>>,
    last_used: Mutex<Instant>,
    live: AtomicBool,
}

impl<T: Send + 'static> Worker<T> {
    pub(crate) fn new() -> Self {
        let (inbox_tx, inbox_rx) = bounded(1);
        Self {
            id: NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed),
            inbox_tx,
            inbox_rx,
            last_used: Mutex::new(Instant::now()),
            live: AtomicBool::new(false),
        }
    }

    /// Identifier used for thread names and logging.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Deposit a task in the inbox.
    ///
    /// Never blocks under correct use: the scheduler only hands out
    /// workers whose inbox is empty.
    pub fn put(&self, task: T) {
        self.inbox_tx
            .send(Message::Task(task))
            .expect("worker inbox disconnected");
    }

    /// Deposit the finish sentinel; the execution thread exits after
    /// draining whatever is already in flight.
    pub(crate) fn finish(&self) {
        self.inbox_tx
            .send(Message::Finish)
            .expect("worker inbox disconnected");
    }

    /// When this worker last went idle (or was created).
    pub fn last_used(&self) -> Instant {
        *self.last_used.lock()
    }

    pub(crate) fn refresh(&self) {
        *self.last_used.lock() = Instant::now();
    }

    /// Start a fresh execution thread. The scheduler guarantees at most
    /// one live thread per worker; a second concurrent `run` is a bug.
    pub(crate) fn run(self: &Arc<Self>, scheduler: Arc<Scheduler<T>>) {
        let already_live = self.live.swap(true, Ordering::AcqRel);
        assert!(
            !already_live,
            "worker {} already has a live execution thread",
            self.id
        );
        trace!("worker {} starting execution thread", self.id);
        let worker = Arc::clone(self);
        thread::Builder::new()
            .name(format!("taskforce-worker-{}", self.id))
            .spawn(move || worker.run_loop(scheduler))
            .expect("failed to spawn worker thread");
    }

    fn run_loop(self: Arc<Self>, scheduler: Arc<Scheduler<T>>) {
        let _exit = ExitGuard {
            scheduler: Arc::clone(&scheduler),
            worker: Arc::clone(&self),
        };
        loop {
            match self.inbox_rx.recv() {
                Ok(Message::Task(task)) => {
                    let outcome =
                        panic::catch_unwind(AssertUnwindSafe(|| (scheduler.handler())(task)));
                    if let Err(payload) = outcome {
                        scheduler.recover(payload);
                        return;
                    }
                    if scheduler.put_ready(&self).is_err() {
                        return;
                    }
                }
                Ok(Message::Finish) | Err(_) => return,
            }
        }
    }
}

/// Routes the worker object to the cache when the execution thread exits,
/// no matter which path it took out of the loop.
struct ExitGuard<T: Send + 'static> {
    scheduler: Arc<Scheduler<T>>,
    worker: Arc<Worker<T>>,
}

impl<T: Send + 'static> Drop for ExitGuard<T> {
    fn drop(&mut self) {
        self.worker.live.store(false, Ordering::Release);
        trace!("worker {} execution thread exited", self.worker.id);
        self.scheduler.put_cache(&self.worker);
    }
}
