//! Queue-triggered batch consumption.
//!
//! This module provides the consuming half of the outbox pattern:
//!
//! - [`MessageHandler`] — trait for per-queue business handlers
//! - [`DeliveryContext`] — message identity handed to handlers
//! - [`BatchConsumer`] / [`ConsumerBuilder`] — ordered, reconciling batch
//!   processing with partial-batch failure reporting
//! - [`ConsumerConfig`] — reconciliation and abandonment tuning
//!
//! # Example
//!
//! ```ignore
//! let consumer = BatchConsumer::builder(RecordStore::new(store))
//!     .register(OrderHandler::new(coordinator))
//!     .config(ConsumerConfig::default())
//!     .build()?;
//!
//! let disposition = consumer.handle_batch(batch.clone()).await;
//! let redeliver = disposition.failed_ids(&batch);
//! ```

mod consumer;
mod context;
pub(crate) mod handler;

pub use consumer::{BatchConsumer, BatchDisposition, ConsumerBuilder, ConsumerConfig};
pub use context::DeliveryContext;
pub use handler::MessageHandler;
