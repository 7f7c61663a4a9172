//! Framework-owned rows: queue message records and idempotency records.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;

use super::{DocumentStore, Precondition, StoreError, WriteOp};
use crate::error::{Error, Result};

/// Completion marker on a queue message record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    /// The consumer finished processing this message.
    #[serde(rename = "COMPLETE")]
    Complete,
}

/// Row proving a queue message belongs to a committed unit of work.
///
/// Written as part of the producer's multi-item commit, keyed by
/// `{queue}_{message_id}`. The consumer path never updates it; it is a
/// write-once reconciliation marker whose `delete_at` field governs storage
/// cleanup outside this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessageRecord {
    /// Queue-assigned message id.
    pub message_id: String,
    /// Unix-second expiry copied from the message's delete-time attribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_at: Option<i64>,
    /// De-duplication id the message was sent with, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedup_id: Option<String>,
    /// Optional completion marker set by downstream processing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
}

impl QueueMessageRecord {
    /// The store key for a message sent to `queue`.
    pub fn key(queue: &str, message_id: &str) -> String {
        format!("{queue}_{message_id}")
    }
}

/// Lifecycle state of an idempotency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdempotencyStatus {
    /// A guarded call holds the lock and has not finished.
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    /// The guarded call finished successfully.
    #[serde(rename = "COMPLETE")]
    Complete,
}

/// Run-once lock row for a guarded operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Unix second after which the record is stale and reclaimable.
    pub expiry: i64,
    /// Unix second after which an `IN_PROGRESS` record counts as abandoned.
    pub in_progress_expiry: i64,
    /// Current lifecycle state.
    pub status: IdempotencyStatus,
}

/// Outcome of attempting to acquire an idempotency lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The lock was created (or a stale one reclaimed).
    Acquired,
    /// A live record holds the key; inspect it to classify the conflict.
    Held,
}

/// Collection names for the framework's own rows.
#[derive(Debug, Clone)]
pub struct RecordStoreConfig {
    /// Collection holding [`QueueMessageRecord`]s. Default: `"queue_messages"`.
    pub message_collection: String,
    /// Collection holding [`IdempotencyRecord`]s. Default: `"idempotency"`.
    pub idempotency_collection: String,
}

impl Default for RecordStoreConfig {
    fn default() -> Self {
        Self {
            message_collection: "queue_messages".to_string(),
            idempotency_collection: "idempotency".to_string(),
        }
    }
}

/// Typed persistence for [`QueueMessageRecord`] and [`IdempotencyRecord`].
///
/// Thin layer over a [`DocumentStore`] that owns the key scheme, the JSON
/// shape of both record kinds, and the conditional expressions protecting
/// them. Classified single-item failures are translated into the crate's
/// sentinel error variants.
#[derive(Debug, Clone)]
pub struct RecordStore<S> {
    store: S,
    config: RecordStoreConfig,
}

impl<S: DocumentStore> RecordStore<S> {
    /// Create a record store with default collection names.
    pub fn new(store: S) -> Self {
        Self::with_config(store, RecordStoreConfig::default())
    }

    /// Create a record store with explicit collection names.
    pub fn with_config(store: S, config: RecordStoreConfig) -> Self {
        Self { store, config }
    }

    /// Build the transactional write that creates a message record.
    ///
    /// Appended to a unit of work's pending writes for every message sent
    /// during its end phase; `MustNotExist` keeps the record write-once.
    pub fn message_record_op(&self, queue: &str, record: &QueueMessageRecord) -> Result<WriteOp> {
        let key = QueueMessageRecord::key(queue, &record.message_id);
        let item = serde_json::to_value(record)?;
        Ok(WriteOp::put(
            &self.config.message_collection,
            key,
            item,
            Precondition::MustNotExist,
        ))
    }

    /// Fetch the message record for a delivered message, or `None`.
    pub async fn fetch_message_record(
        &self,
        queue: &str,
        message_id: &str,
    ) -> Result<Option<QueueMessageRecord>> {
        let key = QueueMessageRecord::key(queue, message_id);
        let item = self
            .store
            .get(&self.config.message_collection, &key)
            .await?;

        match item {
            Some(item) => Ok(Some(serde_json::from_value(item)?)),
            None => Ok(None),
        }
    }

    /// Try to create an `IN_PROGRESS` idempotency record for `key`.
    ///
    /// The conditional create succeeds when any of the following holds:
    /// no record exists; the existing record's `expiry` has passed; or the
    /// existing record is `IN_PROGRESS` and its `in_progress_expiry` has
    /// passed (an abandoned lock is reclaimed). `budget` is the time left
    /// before the caller's own deadline and bounds how long a crashed holder
    /// can block retries.
    pub async fn acquire_idempotency(
        &self,
        key: &str,
        ttl: Duration,
        budget: Duration,
    ) -> Result<AcquireOutcome> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let record = IdempotencyRecord {
            expiry: now + ttl.as_secs() as i64,
            in_progress_expiry: now + budget.as_secs() as i64,
            status: IdempotencyStatus::InProgress,
        };

        let reclaimable = Precondition::AnyOf(vec![
            Precondition::MustNotExist,
            Precondition::LessThan {
                attribute: "expiry".to_string(),
                value: json!(now),
            },
            Precondition::AllOf(vec![
                Precondition::Equals {
                    attribute: "status".to_string(),
                    value: json!("IN_PROGRESS"),
                },
                Precondition::LessThan {
                    attribute: "in_progress_expiry".to_string(),
                    value: json!(now),
                },
            ]),
        ]);

        let result = self
            .store
            .put(
                &self.config.idempotency_collection,
                key,
                serde_json::to_value(&record)?,
                &reclaimable,
            )
            .await;

        match result {
            Ok(()) => Ok(AcquireOutcome::Acquired),
            Err(StoreError::ConditionFailed { .. }) => Ok(AcquireOutcome::Held),
            Err(err) => Err(self.classify(err)),
        }
    }

    /// Fetch the idempotency record for `key`, or `None`.
    pub async fn fetch_idempotency(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let item = self
            .store
            .get(&self.config.idempotency_collection, key)
            .await?;

        match item {
            Some(item) => Ok(Some(serde_json::from_value(item)?)),
            None => Ok(None),
        }
    }

    /// Mark the idempotency record for `key` as complete with a fresh expiry.
    ///
    /// Fails with [`Error::PreconditionFailed`] when the record no longer
    /// exists (for example, reclaimed by another invocation in the meantime).
    pub async fn complete_idempotency(&self, key: &str, ttl: Duration) -> Result<()> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let mut set = BTreeMap::new();
        set.insert("status".to_string(), json!("COMPLETE"));
        set.insert("expiry".to_string(), json!(now + ttl.as_secs() as i64));

        self.store
            .update(
                &self.config.idempotency_collection,
                key,
                set,
                &Precondition::MustExist,
            )
            .await
            .map_err(|err| self.classify(err))
    }

    /// Delete the idempotency record for `key`, releasing the lock.
    pub async fn release_idempotency(&self, key: &str) -> Result<()> {
        self.store
            .delete(
                &self.config.idempotency_collection,
                key,
                &Precondition::Unconditional,
            )
            .await
            .map_err(|err| self.classify(err))
    }

    /// Translate classified single-item failures into sentinel variants.
    fn classify(&self, err: StoreError) -> Error {
        match err {
            StoreError::ConditionFailed { collection, key } => {
                Error::PreconditionFailed { collection, key }
            }
            StoreError::Conflict { collection, key } => Error::WriteConflict { collection, key },
            other => Error::Store(other),
        }
    }
}
