//! Bounded worker-thread pool with idle-worker reuse and expiry
//! reclamation.
//!
//! Tasks submitted by any number of producers are handed directly to
//! long-lived worker threads:
//! - **Idle stack**: finished workers park on a LIFO stack, so the most
//!   recently used worker is dispatched first and older ones age toward
//!   reclamation.
//! - **Capacity bound**: at most `capacity` workers are alive at once;
//!   saturated submitters block in an admission gate (or fail fast in
//!   non-blocking mode / past the waiter limit).
//! - **Expiry sweep**: a background sweeper finishes workers idle past
//!   the configured threshold, releasing their threads while keeping the
//!   worker objects cached for cheap restarts.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use taskforce::{Options, Pool};
//!
//! let hits = Arc::new(AtomicUsize::new(0));
//! let sink = Arc::clone(&hits);
//! let pool = Pool::with_options(
//!     2,
//!     Options::new().with_max_blocking_tasks(16),
//!     move |_task: u64| {
//!         sink.fetch_add(1, Ordering::SeqCst);
//!     },
//! );
//!
//! for task in 0..8 {
//!     pool.submit(task).unwrap();
//! }
//! pool.release_with_wait();
//! assert_eq!(hits.load(Ordering::SeqCst), 8);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod options;
pub mod pool;
pub mod scheduler;

pub use error::{PoolError, SchedulerError, StackError};
pub use options::{Options, PanicHandler};
pub use pool::{BoxedTask, ClosurePool, Pool};
pub use scheduler::{Scheduler, TaskHandler, Worker};
