//! Common concurrency and resilience patterns
//!
//! Shared by every component that talks to remote APIs.

pub mod executor;
pub mod retry;

pub use executor::{partition_results, BoundedExecutor};
pub use retry::{retry, BackoffStrategy, RetryPolicy};
