//! Retry policy: backoff bookkeeping and the dispatch loop built on it.
//!
//! ```text
//! Request → [RequestDispatcher] → [Transport]
//!                  ↑ failure
//!            [BackoffManager]
//! ```

pub mod backoff;
pub mod dispatcher;

pub use backoff::{BackoffConfig, BackoffError, BackoffManager, BackoffMode};
pub use dispatcher::{RequestDispatcher, RetryMode};
