//! Retry execution with cancellable sleeps.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::backoff::{Backoff, BackoffConfig};
use crate::error::{Error, Result};

/// Executes a unit of work, retrying while a caller-supplied predicate says
/// the outcome is transient.
///
/// Errors returned by the work itself are **fatal** and surface immediately;
/// the predicate is consulted on the full outcome, which covers the
/// "succeeded, but the result indicates a transient condition" case (for
/// example a read that returned nothing because a writer has not caught up
/// yet).
///
/// A fresh [`Backoff`] is constructed per run, so attempt counters and the
/// elapsed clock are never shared between concurrent invocations.
///
/// # Example
///
/// ```ignore
/// let retryer = Retryer::fixed(5, Duration::from_millis(500));
/// let record = retryer
///     .run(
///         || records.fetch_message_record("orders", &message_id),
///         |outcome| matches!(outcome, Ok(None)),
///     )
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct Retryer {
    config: BackoffConfig,
}

impl Retryer {
    /// Create a retryer with the given backoff configuration.
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Create a retryer with a fixed delay and attempt count.
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self::new(BackoffConfig::fixed(attempts, delay))
    }

    /// Run `work`, retrying while `is_retryable` approves the outcome.
    ///
    /// Equivalent to [`run_cancellable`](Self::run_cancellable) with a
    /// never-firing token and no deadline.
    pub async fn run<T, W, Fut, P>(&self, work: W, is_retryable: P) -> Result<T>
    where
        W: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&Result<T>) -> bool,
    {
        self.run_cancellable(work, is_retryable, &CancellationToken::new(), None)
            .await
    }

    /// Run `work` with cancellation and deadline awareness.
    ///
    /// - If `cancel` fires during a between-attempt sleep, returns
    ///   [`Error::Canceled`] immediately without completing the wait.
    /// - If `deadline` is set and the time remaining before it is shorter
    ///   than the planned sleep, retrying stops and the current outcome is
    ///   returned as-is.
    pub async fn run_cancellable<T, W, Fut, P>(
        &self,
        mut work: W,
        is_retryable: P,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<T>
    where
        W: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&Result<T>) -> bool,
    {
        let mut backoff = Backoff::new(self.config.clone());

        loop {
            let outcome = work().await;

            // Errors from the work are fatal; only successful-but-transient
            // outcomes are retried.
            if outcome.is_err() || !is_retryable(&outcome) {
                return outcome;
            }

            let Some(interval) = backoff.next() else {
                return outcome;
            };

            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining < interval {
                    debug!(
                        attempts = backoff.attempts(),
                        remaining_ms = remaining.as_millis() as u64,
                        "Deadline closer than next retry interval, giving up"
                    );
                    return outcome;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => {
                    debug!(attempts = backoff.attempts(), "Retry wait canceled");
                    return Err(Error::Canceled);
                }
            }
        }
    }
}
