//! Error types for the stack, scheduler, and pool layers.

use thiserror::Error;

/// Errors raised by the idle-worker stack.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
    /// The stack already holds as many workers as the scheduler's capacity.
    #[error("worker stack is full")]
    Full,
}

/// Errors raised by the scheduler's admission and handoff operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    /// The scheduler has been closed; no more workers are handed out.
    #[error("scheduler is closed")]
    Closed,

    /// The scheduler is already open.
    #[error("scheduler is already opened")]
    Opened,

    /// The scheduler is at capacity and the caller is not allowed to wait,
    /// either because non-blocking mode is on or because the waiter limit
    /// has been reached.
    #[error("scheduler is full")]
    Full,

    /// An idle worker could not be parked on the stack.
    #[error(transparent)]
    Stack(#[from] StackError),
}

/// Errors surfaced to users of the pool facade.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The pool has been released; submissions are rejected.
    #[error("pool is closed")]
    Closed,

    /// A submission failed inside the scheduler.
    #[error("failed to submit task: {0}")]
    Submit(#[from] SchedulerError),

    /// Reserved for a future timed submit operation.
    #[error("timed out while submitting a task")]
    SubmitTimeout,

    /// The deadline passed before every worker finished during release.
    #[error("timed out while releasing the pool")]
    ReleaseTimeout,
}
