//! Retry and backoff primitives.
//!
//! This module provides the two building blocks used throughout the crate to
//! tolerate transient store and queue failures:
//!
//! - [`Backoff`] / [`BackoffConfig`] — exponential backoff with jitter,
//!   bounded by attempt count and elapsed wall-clock time
//! - [`Retryer`] — executes a unit of work with cancellable sleeps between
//!   attempts, judging retryability via a caller-supplied predicate

mod backoff;
mod retryer;

pub use backoff::{Backoff, BackoffConfig};
pub use retryer::Retryer;
