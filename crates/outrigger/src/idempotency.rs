//! Run-once guard for logical operations.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::{AcquireOutcome, DocumentStore, IdempotencyStatus, RecordStore};

/// A caller-supplied identifier deduplicating logically-equivalent
/// invocations of a guarded operation.
///
/// Use natural business keys (a request id, an order id) so correlation is
/// intuitive and duplicates collapse naturally.
///
/// # Example
///
/// ```
/// use outrigger::IdempotencyKey;
///
/// let key = IdempotencyKey::new("order-o-1-place");
/// assert_eq!(key.as_str(), "order-o-1-place");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Create a new idempotency key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Consume the wrapper and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<String> for IdempotencyKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for IdempotencyKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Extracts the idempotency key from a payload.
///
/// Derivable for enum payloads with `#[derive(HasIdempotencyKey)]` and an
/// `#[idempotency_key(field)]` attribute; see the crate-level documentation.
pub trait HasIdempotencyKey {
    /// Returns the idempotency key for this payload.
    ///
    /// Must return the same key for all payloads describing the same logical
    /// operation.
    fn idempotency_key(&self) -> IdempotencyKey;
}

/// Configuration for the idempotency guard.
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// How long a completed record suppresses re-execution.
    ///
    /// Default: 3600 seconds.
    pub ttl: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
        }
    }
}

/// Provides run-once semantics around an arbitrary operation.
///
/// The guard takes a lock on the idempotency key with a conditional create,
/// runs the guarded operation, then marks the record complete. The lock
/// carries two expiries: `expiry` bounds how long a completed record
/// suppresses duplicates, and `in_progress_expiry` bounds how long a crashed
/// holder can block retries — size the execution budget to the caller's own
/// deadline so an abandoned lock expires no later than the invocation that
/// took it would have timed out.
///
/// The guard resolves its own lock bookkeeping (the record is always
/// released on failure) but never retries the guarded operation.
///
/// # Example
///
/// ```ignore
/// let guard = IdempotencyGuard::new(RecordStore::new(store));
/// let order = guard
///     .process(&command.idempotency_key(), remaining_budget, async {
///         place_order(&command).await
///     })
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct IdempotencyGuard<S> {
    records: RecordStore<S>,
    config: IdempotencyConfig,
}

impl<S: DocumentStore> IdempotencyGuard<S> {
    /// Create a guard with the default configuration.
    pub fn new(records: RecordStore<S>) -> Self {
        Self::with_config(records, IdempotencyConfig::default())
    }

    /// Create a guard with an explicit configuration.
    pub fn with_config(records: RecordStore<S>, config: IdempotencyConfig) -> Self {
        Self { records, config }
    }

    /// Run `work` at most once per `key`.
    ///
    /// `budget` is the time left before the caller's deadline; pass `None`
    /// when unknown, in which case an abandoned lock is reclaimable
    /// immediately.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyCompleted`] — the operation already ran; treat as a
    ///   no-op success.
    /// - [`Error::InProgress`] — another invocation holds the lock; treat as
    ///   a retryable conflict.
    /// - Errors from `work` propagate unchanged after the lock is released.
    pub async fn process<T, Fut>(
        &self,
        key: &IdempotencyKey,
        budget: Option<Duration>,
        work: Fut,
    ) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let outcome = self
            .records
            .acquire_idempotency(
                key.as_str(),
                self.config.ttl,
                budget.unwrap_or(Duration::ZERO),
            )
            .await?;

        if outcome == AcquireOutcome::Held {
            return Err(self.classify_held(key).await?);
        }

        debug!(key = %key, "Idempotency lock acquired");

        match work.await {
            Ok(value) => {
                if let Err(err) = self
                    .records
                    .complete_idempotency(key.as_str(), self.config.ttl)
                    .await
                {
                    // A lock that cannot be completed must not stay stuck.
                    warn!(key = %key, error = %err, "Completion update failed, releasing lock");
                    self.release_quietly(key).await;
                    return Err(err);
                }
                Ok(value)
            }
            Err(err) => {
                self.release_quietly(key).await;
                Err(err)
            }
        }
    }

    /// Decide which conflict an already-held key represents.
    async fn classify_held(&self, key: &IdempotencyKey) -> Result<Error> {
        let record = self.records.fetch_idempotency(key.as_str()).await?;

        match record {
            Some(record) if record.status == IdempotencyStatus::Complete => {
                Ok(Error::AlreadyCompleted {
                    key: key.as_str().to_string(),
                })
            }
            // A record that vanished between the failed create and this read
            // was released by its holder; the conflict is still live from
            // this caller's perspective.
            _ => Ok(Error::InProgress {
                key: key.as_str().to_string(),
            }),
        }
    }

    /// Release the lock, logging instead of masking the caller's error.
    async fn release_quietly(&self, key: &IdempotencyKey) {
        if let Err(err) = self.records.release_idempotency(key.as_str()).await {
            warn!(key = %key, error = %err, "Failed to release idempotency lock");
        }
    }
}
