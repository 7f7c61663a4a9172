//! Transactional-outbox coordination for store-plus-queue handlers.
//!
//! Outrigger gives request and queue-batch handlers practical transactional
//! semantics over two systems that cannot commit together: a document store
//! with conditional writes and a message queue. It provides:
//!
//! - **Unit-of-work coordination** — [`TransactionCoordinator`] batches
//!   conditional writes and outbound messages, then flushes them in two
//!   phases when the unit of work ends
//! - **Run-once guards** — [`IdempotencyGuard`] prevents duplicate execution
//!   of a logical operation via conditional writes with TTL-based lock
//!   reclamation
//! - **Reconciling consumption** — [`BatchConsumer`] restores FIFO ordering,
//!   matches delivered messages to committed units of work, and reports
//!   partial-batch failure
//! - **Retry/backoff** — [`Retryer`] and [`Backoff`] tolerate transient
//!   store and queue failures, with cancellable sleeps
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                   TransactionCoordinator::execute                    │
//! │                                                                      │
//! │   1. Create Transaction (pending writes + pending messages)          │
//! │   2. Run business logic; staging appends, performs no I/O            │
//! │   3. Send pending messages (real sends, delivery ids assigned)       │
//! │   4. Append one QueueMessageRecord write per sent message            │
//! │   5. Commit all writes as one atomic conditional multi-item write    │
//! └───────────────────────────┬──────────────────────────────────────────┘
//!                             │ queue delivers a batch
//! ┌───────────────────────────▼──────────────────────────────────────────┐
//! │                     BatchConsumer::handle_batch                      │
//! │                                                                      │
//! │   1. Restore FIFO ordering (group id, sequence number)               │
//! │   2. Reconcile each message against its QueueMessageRecord,          │
//! │      retrying while absent (producer commit may lag the send)        │
//! │   3. Invoke the registered MessageHandler, strictly sequentially     │
//! │   4. Report failed message ids for redelivery                        │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Consistency Model
//!
//! Messages are sent **before** the store commit; the two are not atomic.
//! Delivery is at-least-once with idempotent consumers — not exactly-once.
//! See [`TransactionCoordinator`] for the trade-off and
//! [`BatchConsumer`] for the mitigation.
//!
//! # Example
//!
//! ```ignore
//! use outrigger::{
//!     BatchConsumer, MemQueue, MemStore, Message, Precondition, RecordStore,
//!     TransactionCoordinator,
//! };
//!
//! let store = MemStore::new();
//! let queue = MemQueue::new();
//!
//! // Producer: one unit of work writing an order and requesting shipping.
//! let coordinator = TransactionCoordinator::with_queue(store.clone(), queue.clone());
//! coordinator
//!     .execute(|tx| async move {
//!         tx.stage_put("orders", "o-1", order_item, Precondition::MustNotExist)?;
//!         tx.stage_message(Message::json("shipping", &ship_request)?)?;
//!         Ok(())
//!     })
//!     .await?;
//!
//! // Consumer: process the shipping queue with partial-batch failure.
//! let consumer = BatchConsumer::builder(RecordStore::new(store))
//!     .register(ShippingHandler::default())
//!     .build()?;
//! let disposition = consumer.handle_batch(queue.deliver("shipping", 10)).await;
//! ```

// Allow the crate to reference itself as `outrigger` for macro-generated code
extern crate self as outrigger;

pub mod delivery;
mod error;
mod idempotency;
pub mod queue;
pub mod retry;
pub mod store;
mod transaction;

pub use delivery::{
    BatchConsumer, BatchDisposition, ConsumerBuilder, ConsumerConfig, DeliveryContext,
    MessageHandler,
};
pub use error::{Error, Result};
pub use idempotency::{HasIdempotencyKey, IdempotencyConfig, IdempotencyGuard, IdempotencyKey};
pub use queue::{DeliveredMessage, MemQueue, Message, QueueClient, QueueError, SentMessage};
pub use retry::{Backoff, BackoffConfig, Retryer};
pub use store::{
    DocumentStore, IdempotencyRecord, IdempotencyStatus, MemStore, MessageStatus, Precondition,
    QueueMessageRecord, RecordStore, RecordStoreConfig, StoreError, WriteOp,
};
pub use transaction::{NoQueue, Transaction, TransactionCoordinator};

// Re-export derive macros
pub use outrigger_macros::HasIdempotencyKey;
