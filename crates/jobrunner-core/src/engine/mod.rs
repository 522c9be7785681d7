//! Execution engine: retry policy, per-job executor, priority dispatcher.

pub mod dispatcher;
pub mod executor;
pub mod retry;

pub use self::dispatcher::{Dispatcher, DispatcherHandle};
pub use self::executor::{Completion, Executor};
pub use self::retry::{Backoff, RetryPolicy};
