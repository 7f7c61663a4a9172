//! Unit-of-work coordination across the store and the queue.

use std::collections::BTreeMap;
use std::future::Future;
use std::mem;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::queue::{Message, QueueClient, QueueError, SentMessage};
use crate::store::{
    CancellationReason, DocumentStore, Precondition, QueueMessageRecord, RecordStore, StoreError,
    WriteOp,
};

#[derive(Debug, Default)]
struct TxInner {
    writes: Vec<WriteOp>,
    messages: Vec<Message>,
    closed: bool,
}

/// Pending work of one unit of work.
///
/// Handed to the closure run by [`TransactionCoordinator::execute`]. Staging
/// appends to the transaction's pending lists instead of performing I/O;
/// nothing becomes visible outside the unit of work until the unit ends
/// successfully.
///
/// The handle is cheaply cloneable so it can be passed into repository
/// helpers, but each transaction belongs to exactly one unit of work and is
/// sealed when that unit ends — staging on a sealed transaction fails with
/// [`Error::TransactionClosed`].
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    inner: Arc<Mutex<TxInner>>,
}

impl Transaction {
    fn new() -> Self {
        Self::default()
    }

    /// Stage a conditional write.
    pub fn stage_write(&self, op: WriteOp) -> Result<()> {
        let mut inner = self.inner.lock().expect("transaction lock poisoned");
        if inner.closed {
            return Err(Error::TransactionClosed);
        }
        inner.writes.push(op);
        Ok(())
    }

    /// Stage a conditional put.
    pub fn stage_put(
        &self,
        collection: impl Into<String>,
        key: impl Into<String>,
        item: Value,
        condition: Precondition,
    ) -> Result<()> {
        self.stage_write(WriteOp::put(collection, key, item, condition))
    }

    /// Stage a conditional attribute update.
    pub fn stage_update(
        &self,
        collection: impl Into<String>,
        key: impl Into<String>,
        set: BTreeMap<String, Value>,
        condition: Precondition,
    ) -> Result<()> {
        self.stage_write(WriteOp::update(collection, key, set, condition))
    }

    /// Stage a conditional delete.
    pub fn stage_delete(
        &self,
        collection: impl Into<String>,
        key: impl Into<String>,
        condition: Precondition,
    ) -> Result<()> {
        self.stage_write(WriteOp::delete(collection, key, condition))
    }

    /// Stage an outbound message for sending when the unit of work ends.
    pub fn stage_message(&self, message: Message) -> Result<()> {
        let mut inner = self.inner.lock().expect("transaction lock poisoned");
        if inner.closed {
            return Err(Error::TransactionClosed);
        }
        inner.messages.push(message);
        Ok(())
    }

    /// Number of writes currently staged.
    pub fn pending_writes(&self) -> usize {
        self.inner
            .lock()
            .expect("transaction lock poisoned")
            .writes
            .len()
    }

    /// Number of messages currently staged.
    pub fn pending_messages(&self) -> usize {
        self.inner
            .lock()
            .expect("transaction lock poisoned")
            .messages
            .len()
    }

    /// Detach the pending lists and refuse all further staging.
    fn seal(&self) -> (Vec<WriteOp>, Vec<Message>) {
        let mut inner = self.inner.lock().expect("transaction lock poisoned");
        inner.closed = true;
        (
            mem::take(&mut inner.writes),
            mem::take(&mut inner.messages),
        )
    }
}

/// Queue stand-in for units of work that never send messages.
///
/// Registered when a coordinator is built store-only; any attempt to send
/// through it is a framework misuse and fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoQueue;

impl QueueClient for NoQueue {
    async fn send(&self, message: &Message) -> std::result::Result<SentMessage, QueueError> {
        Err(QueueError::Backend(format!(
            "no queue client registered (message staged for {})",
            message.queue()
        )))
    }
}

/// Coordinates one unit of work across the store and the queue.
///
/// Business logic stages conditional writes and outbound messages on a
/// [`Transaction`]; when the unit of work ends, the coordinator runs a
/// two-phase flush: send every pending message for real, then execute every
/// pending write as one atomic multi-item conditional write.
///
/// # Consistency trade-off
///
/// Messages are sent **before** the store commit and the two steps are not
/// atomic: a send that succeeds followed by a commit that fails (or a unit
/// of work that returns an error) leaves delivered messages whose unit of
/// work never committed. Consumers detect this through the
/// [`QueueMessageRecord`] the commit creates for every sent message — a
/// delivered message without a record, after a bounded reconciliation wait,
/// is treated as the product of an aborted unit of work (see
/// [`BatchConsumer`](crate::delivery::BatchConsumer)). This trades a bounded
/// amount of ghost-message processing risk for avoiding a full two-phase
/// commit across the two systems.
///
/// The coordinator never retries internally. Store and queue failures abort
/// the unit of work and surface as classified conditions; the caller decides
/// whether a failed conditional check means "someone already did this" or a
/// genuine fault.
///
/// # Example
///
/// ```ignore
/// let coordinator = TransactionCoordinator::with_queue(store, queue);
/// let order_id = coordinator
///     .execute(|tx| async move {
///         tx.stage_put("orders", "o-1", order_item, Precondition::MustNotExist)?;
///         tx.stage_message(Message::json("shipping", &ship_request)?)?;
///         Ok("o-1")
///     })
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct TransactionCoordinator<S, Q = NoQueue> {
    store: S,
    queue: Q,
    records: RecordStore<S>,
}

impl<S: DocumentStore> TransactionCoordinator<S, NoQueue> {
    /// Create a coordinator over a store only.
    ///
    /// Units of work may stage writes but not messages.
    pub fn new(store: S) -> Self {
        Self::with_queue(store, NoQueue)
    }
}

impl<S: DocumentStore, Q: QueueClient> TransactionCoordinator<S, Q> {
    /// Create a coordinator over a store and a queue client.
    pub fn with_queue(store: S, queue: Q) -> Self {
        let records = RecordStore::new(store.clone());
        Self {
            store,
            queue,
            records,
        }
    }

    /// Replace the record store (to change collection names).
    pub fn with_records(mut self, records: RecordStore<S>) -> Self {
        self.records = records;
        self
    }

    /// Run one unit of work.
    ///
    /// Creates a [`Transaction`], hands it to `f`, and flushes the pending
    /// work when `f` returns — regardless of its outcome. See the type-level
    /// documentation for the flush ordering and its consistency trade-off.
    ///
    /// A unit of work with pending messages but no pending writes is a pure
    /// send: the store is not touched and no message records are created.
    pub async fn execute<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let tx = Transaction::new();
        let outcome = f(tx.clone()).await;
        self.end(tx, outcome).await
    }

    /// End the unit of work: send messages, then commit writes.
    async fn end<T>(&self, tx: Transaction, outcome: Result<T>) -> Result<T> {
        // Seal first so the transaction is detached whatever happens next.
        let (mut writes, messages) = tx.seal();

        debug!(
            pending_writes = writes.len(),
            pending_messages = messages.len(),
            committed = outcome.is_ok(),
            "Ending unit of work"
        );

        // Phase one: real sends. A failure here aborts before the store is
        // touched; messages already sent stay sent.
        let mut sent = Vec::with_capacity(messages.len());
        for message in &messages {
            let receipt = self.queue.send(message).await.map_err(|err| {
                warn!(queue = message.queue(), error = %err, "Message send failed, aborting unit of work");
                Error::Queue(err)
            })?;
            debug!(
                queue = message.queue(),
                message_id = %receipt.message_id,
                "Sent pending message"
            );
            sent.push(receipt);
        }

        // Link each sent message to this unit of work, but only when the
        // unit also writes to the store: a pure send is not a transaction.
        if !writes.is_empty() {
            for (message, receipt) in messages.iter().zip(&sent) {
                let record = QueueMessageRecord {
                    message_id: receipt.message_id.clone(),
                    delete_at: message.delete_at(),
                    dedup_id: message.dedup_id().map(str::to_string),
                    status: None,
                };
                writes.push(self.records.message_record_op(message.queue(), &record)?);
            }
        }

        // The business outcome decides only now: messages are already out,
        // the store write is not.
        let value = outcome?;

        if writes.is_empty() {
            return Ok(value);
        }

        // Phase two: one atomic multi-item conditional write.
        match self.store.transact_write(writes).await {
            Ok(()) => Ok(value),
            Err(StoreError::TransactionCanceled { reasons }) => {
                if reasons
                    .iter()
                    .any(|r| matches!(r, CancellationReason::Conflict))
                {
                    Err(Error::TransactionConflict)
                } else {
                    Err(Error::ConditionalCheckFailed)
                }
            }
            Err(other) => Err(Error::Store(other)),
        }
    }
}
