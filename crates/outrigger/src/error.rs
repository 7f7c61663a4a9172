//! Error types for outrigger.

use thiserror::Error;

use crate::queue::QueueError;
use crate::store::StoreError;

/// A `Result` alias with [`enum@Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in outrigger operations.
///
/// Variants fall into four groups:
///
/// | Group      | Variants                                                      |
/// |------------|---------------------------------------------------------------|
/// | Caller     | [`Validation`](Error::Validation), [`Business`](Error::Business) |
/// | Store      | [`PreconditionFailed`](Error::PreconditionFailed), [`DuplicateKey`](Error::DuplicateKey), [`WriteConflict`](Error::WriteConflict), [`ConditionalCheckFailed`](Error::ConditionalCheckFailed), [`TransactionConflict`](Error::TransactionConflict) |
/// | Framework  | [`InProgress`](Error::InProgress), [`AlreadyCompleted`](Error::AlreadyCompleted), [`MessageRecordNotFound`](Error::MessageRecordNotFound), [`TransactionClosed`](Error::TransactionClosed), [`UnknownQueue`](Error::UnknownQueue), [`DuplicateHandler`](Error::DuplicateHandler), [`Canceled`](Error::Canceled) |
/// | Passthrough| [`Serialization`](Error::Serialization), [`System`](Error::System), [`Store`](Error::Store), [`Queue`](Error::Queue) |
///
/// Store and queue adapters report classified [`StoreError`] / [`QueueError`]
/// kinds; callers match on these variants exhaustively instead of probing
/// error types dynamically.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller input failed validation before any I/O was attempted.
    #[error("validation error: {0}")]
    Validation(String),

    /// An expected domain rule was violated.
    ///
    /// Carries one or more rule-violation messages so several independent
    /// checks can be aggregated into a single failure.
    #[error("business rule violation: {}", .0.join("; "))]
    Business(Vec<String>),

    /// Unexpected failure wrapping a technical cause.
    #[error("system error: {context}: {source}")]
    System {
        /// What the framework was doing when the failure occurred.
        context: String,
        /// The underlying technical cause.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Failed to serialize or deserialize a payload or store item.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A single-item write's precondition did not hold.
    #[error("store precondition failed for {collection}/{key}")]
    PreconditionFailed {
        /// The collection the write targeted.
        collection: String,
        /// The item key the write targeted.
        key: String,
    },

    /// A create-style write found the key already present.
    #[error("duplicate key {collection}/{key}")]
    DuplicateKey {
        /// The collection the write targeted.
        collection: String,
        /// The item key the write targeted.
        key: String,
    },

    /// An update or delete lost a race with a concurrent modification.
    #[error("concurrent modification of {collection}/{key}")]
    WriteConflict {
        /// The collection the write targeted.
        collection: String,
        /// The item key the write targeted.
        key: String,
    },

    /// A multi-item write was canceled because an item's precondition failed.
    #[error("transaction canceled: conditional check failed")]
    ConditionalCheckFailed,

    /// A multi-item write was canceled by a conflicting transaction.
    #[error("transaction canceled: conflicting transaction")]
    TransactionConflict,

    /// Another invocation currently holds the idempotency lock for this key.
    ///
    /// Callers should treat this as a retryable conflict.
    #[error("operation for idempotency key {key} is in progress")]
    InProgress {
        /// The contended idempotency key.
        key: String,
    },

    /// The operation for this idempotency key already ran to completion.
    ///
    /// Callers should treat this as a no-op success, not a failure to surface.
    #[error("operation for idempotency key {key} already completed")]
    AlreadyCompleted {
        /// The already-completed idempotency key.
        key: String,
    },

    /// No outbox record exists (yet) for a delivered queue message.
    ///
    /// Reported by batch reconciliation after its retries are exhausted;
    /// marks the single message as failed so the queue redelivers it.
    #[error("no outbox record found for message {key}")]
    MessageRecordNotFound {
        /// The record key (`{queue}_{message_id}`).
        key: String,
    },

    /// The unit of work already ended; the transaction accepts no more staging.
    #[error("transaction has already been completed")]
    TransactionClosed,

    /// A delivered message named a queue no handler was registered for.
    #[error("no handler registered for queue: {0}")]
    UnknownQueue(String),

    /// A queue was registered with more than one handler.
    #[error("duplicate handler registration for queue: {0}")]
    DuplicateHandler(String),

    /// The caller's cancellation signal fired while waiting between retries.
    #[error("operation canceled")]
    Canceled,

    /// Unclassified store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Unclassified queue failure.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

impl Error {
    /// Create a business error with a single rule-violation message.
    pub fn business(message: impl Into<String>) -> Self {
        Error::Business(vec![message.into()])
    }

    /// Create a system error with context and a technical cause.
    pub fn system(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::System {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Returns `true` for the guard's "already completed" condition.
    ///
    /// Batch consumers use this to treat duplicate executions as successes.
    pub fn is_already_completed(&self) -> bool {
        matches!(self, Error::AlreadyCompleted { .. })
    }
}
