//! Pool configuration.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked with the payload of a panicking task.
pub type PanicHandler = Arc<dyn Fn(Box<dyn Any + Send>) + Send + Sync>;

/// Tunables shared by the pool and its scheduler.
///
/// All fields are public; the `with_*` helpers exist for call-site chaining:
///
/// ```
/// use std::time::Duration;
/// use taskforce::Options;
///
/// let options = Options::new()
///     .with_nonblocking(true)
///     .with_expiry_duration(Duration::from_millis(500));
/// assert!(options.nonblocking);
/// ```
#[derive(Clone)]
pub struct Options {
    /// When true, `get` never waits for capacity and fails immediately
    /// with a "full" error instead.
    pub nonblocking: bool,

    /// Upper bound on the number of submitters parked in the admission
    /// gate at once. Zero means unlimited.
    pub max_blocking_tasks: usize,

    /// How long a worker may sit idle before the sweeper reclaims it.
    /// The sweep period equals this value; zero disables the sweeper.
    pub expiry_duration: Duration,

    /// Invoked with the panic payload when a task panics. When absent the
    /// payload is reported through the `log` facade instead.
    pub panic_handler: Option<PanicHandler>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            nonblocking: false,
            max_blocking_tasks: 0,
            expiry_duration: Duration::from_secs(1),
            panic_handler: None,
        }
    }
}

impl Options {
    /// Default options: blocking submits, unlimited waiters, 1 s expiry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set non-blocking mode.
    pub fn with_nonblocking(mut self, nonblocking: bool) -> Self {
        self.nonblocking = nonblocking;
        self
    }

    /// Cap the number of concurrently parked submitters (0 = unlimited).
    pub fn with_max_blocking_tasks(mut self, max_blocking_tasks: usize) -> Self {
        self.max_blocking_tasks = max_blocking_tasks;
        self
    }

    /// Set the idle-worker expiry threshold and sweep period.
    pub fn with_expiry_duration(mut self, expiry_duration: Duration) -> Self {
        self.expiry_duration = expiry_duration;
        self
    }

    /// Install a custom panic handler for worker panics.
    pub fn with_panic_handler(
        mut self,
        handler: impl Fn(Box<dyn Any + Send>) + Send + Sync + 'static,
    ) -> Self {
        self.panic_handler = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("nonblocking", &self.nonblocking)
            .field("max_blocking_tasks", &self.max_blocking_tasks)
            .field("expiry_duration", &self.expiry_duration)
            .field("panic_handler", &self.panic_handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = Options::new();
        assert!(!options.nonblocking);
        assert_eq!(options.max_blocking_tasks, 0);
        assert_eq!(options.expiry_duration, Duration::from_secs(1));
        assert!(options.panic_handler.is_none());
    }

    #[test]
    fn test_builder_chaining() {
        let options = Options::new()
            .with_nonblocking(true)
            .with_max_blocking_tasks(8)
            .with_expiry_duration(Duration::from_millis(250))
            .with_panic_handler(|_| {});
        assert!(options.nonblocking);
        assert_eq!(options.max_blocking_tasks, 8);
        assert_eq!(options.expiry_duration, Duration::from_millis(250));
        assert!(options.panic_handler.is_some());
    }

    #[test]
    fn test_debug_does_not_require_handler_debug() {
        let options = Options::new().with_panic_handler(|_| {});
        let rendered = format!("{:?}", options);
        assert!(rendered.contains("panic_handler: true"));
    }
}
