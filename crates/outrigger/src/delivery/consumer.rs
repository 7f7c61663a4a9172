//! Batch consumer: ordering, reconciliation, and partial-batch failure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::context::DeliveryContext;
use super::handler::{HandlerRegistry, MessageHandler};
use crate::error::{Error, Result};
use crate::queue::DeliveredMessage;
use crate::retry::Retryer;
use crate::store::{DocumentStore, QueueMessageRecord, RecordStore};

/// Configuration for batch consumption.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// How many times to retry an absent message-record lookup.
    ///
    /// Tolerates the producer's send-before-commit ordering: the record may
    /// not be visible yet when its message arrives. Default: 5.
    pub reconcile_retries: u32,

    /// Fixed delay between reconciliation lookups. Default: 500ms.
    pub reconcile_delay: Duration,

    /// Delivery count at which a still-missing record is treated as
    /// permanently missing.
    ///
    /// A message redelivered this many times without its record ever
    /// appearing came from a unit of work that never committed; it is
    /// acknowledged without processing. Default: 2.
    pub abandon_after_receives: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            reconcile_retries: 5,
            reconcile_delay: Duration::from_millis(500),
            abandon_after_receives: 2,
        }
    }
}

/// Which messages of a consumed batch should be redelivered.
///
/// Returned to the invoking queue runtime; listed messages are redelivered,
/// all others are acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchDisposition {
    /// Exactly the named messages failed (possibly none).
    Partial {
        /// Ids of messages to redeliver.
        failed: Vec<String>,
    },
    /// Sentinel: the batch hit an unrecovered fault and partial state is
    /// unknown; every message must be redelivered.
    AllFailed,
}

impl BatchDisposition {
    /// A disposition with no failures.
    pub fn clean() -> Self {
        BatchDisposition::Partial { failed: Vec::new() }
    }

    /// Returns `true` when no message needs redelivery.
    pub fn is_clean(&self) -> bool {
        matches!(self, BatchDisposition::Partial { failed } if failed.is_empty())
    }

    /// Resolve the ids to redeliver against the consumed batch.
    pub fn failed_ids(&self, batch: &[DeliveredMessage]) -> Vec<String> {
        match self {
            BatchDisposition::Partial { failed } => failed.clone(),
            BatchDisposition::AllFailed => batch.iter().map(|m| m.id.clone()).collect(),
        }
    }
}

/// Outcome of reconciling a delivered message against its record.
enum Reconciliation {
    /// The producing unit of work committed.
    Committed(QueueMessageRecord),
    /// The record never appeared and the message has been redelivered enough
    /// times that it never will; acknowledge without processing.
    Abandoned,
}

/// Builder for a [`BatchConsumer`].
///
/// Registers one [`MessageHandler`] per logical queue; duplicate
/// registrations are detected and surfaced at build time.
pub struct ConsumerBuilder<S> {
    records: RecordStore<S>,
    registry: HandlerRegistry,
    duplicate_queue: Option<String>,
    config: ConsumerConfig,
}

impl<S: DocumentStore> ConsumerBuilder<S> {
    fn new(records: RecordStore<S>) -> Self {
        Self {
            records,
            registry: HandlerRegistry::new(),
            duplicate_queue: None,
            config: ConsumerConfig::default(),
        }
    }

    /// Register a handler for its queue.
    ///
    /// The queue name comes from the handler's `QUEUE` constant. Each queue
    /// can only be registered once; duplicates are reported by
    /// [`build`](Self::build).
    pub fn register<H: MessageHandler>(mut self, handler: H) -> Self {
        if !self.registry.register(handler) {
            if self.duplicate_queue.is_none() {
                self.duplicate_queue = Some(H::QUEUE.to_string());
            }
        }
        self
    }

    /// Set the consumer configuration.
    ///
    /// If not called, uses [`ConsumerConfig::default()`].
    pub fn config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the consumer.
    pub fn build(self) -> Result<BatchConsumer<S>> {
        if let Some(queue) = self.duplicate_queue {
            return Err(Error::DuplicateHandler(queue));
        }
        Ok(BatchConsumer {
            records: self.records,
            registry: Arc::new(self.registry),
            config: self.config,
        })
    }
}

/// Consumes one queue-delivered batch of messages.
///
/// For each batch the consumer restores FIFO ordering, reconciles every
/// message against its [`QueueMessageRecord`] (tolerating replication lag
/// behind the producer's send-then-commit ordering), invokes the registered
/// handler strictly sequentially, and reports which messages should be
/// redelivered.
///
/// # Lifecycle
///
/// 1. Classify the batch: FIFO if any message carries a group id
/// 2. If FIFO, stable-sort by `(group id, sequence number)`
/// 3. Per message, in order: reconcile, then invoke the handler
/// 4. Collect failed message ids; in a FIFO batch every message after the
///    first failure is failed unprocessed, so no group item overtakes an
///    unresolved earlier one
/// 5. A panic anywhere fails the entire batch
///
/// # Example
///
/// ```ignore
/// let consumer = BatchConsumer::builder(RecordStore::new(store))
///     .register(OrderHandler { .. })
///     .register(ShippingHandler { .. })
///     .build()?;
///
/// let disposition = consumer.handle_batch(batch).await;
/// ```
#[derive(Clone, Debug)]
pub struct BatchConsumer<S> {
    records: RecordStore<S>,
    registry: Arc<HandlerRegistry>,
    config: ConsumerConfig,
}

impl<S: DocumentStore> BatchConsumer<S> {
    /// Create a consumer builder.
    pub fn builder(records: RecordStore<S>) -> ConsumerBuilder<S> {
        ConsumerBuilder::new(records)
    }

    /// Returns the number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.registry.len()
    }

    /// Process one batch and report which messages to redeliver.
    ///
    /// Runs the batch inside a fault boundary: a panic in any handler (or in
    /// the consumer itself) is converted into
    /// [`BatchDisposition::AllFailed`], never propagated to the caller,
    /// because partial completion state is unknowable after a fault.
    pub async fn handle_batch(&self, batch: Vec<DeliveredMessage>) -> BatchDisposition {
        self.handle_batch_cancellable(batch, CancellationToken::new(), None)
            .await
    }

    /// Process one batch under the invocation's cancellation signal and
    /// deadline.
    ///
    /// Reconciliation sleeps are interrupted when `cancel` fires or when
    /// `deadline` leaves less time than the next planned wait; affected
    /// messages are reported as failed so the queue redelivers them to a
    /// fresh invocation.
    pub async fn handle_batch_cancellable(
        &self,
        batch: Vec<DeliveredMessage>,
        cancel: CancellationToken,
        deadline: Option<Instant>,
    ) -> BatchDisposition {
        let consumer = self.clone();
        let task =
            tokio::spawn(async move { consumer.process_batch(batch, cancel, deadline).await });

        match task.await {
            Ok(disposition) => disposition,
            Err(fault) => {
                error!(error = %fault, "Batch processing fault, failing entire batch");
                BatchDisposition::AllFailed
            }
        }
    }

    /// Process the batch messages strictly sequentially.
    async fn process_batch(
        &self,
        mut batch: Vec<DeliveredMessage>,
        cancel: CancellationToken,
        deadline: Option<Instant>,
    ) -> BatchDisposition {
        let fifo = batch.iter().any(|m| m.group_id.is_some());
        if fifo {
            // Stable sort: ungrouped messages keep their delivery order.
            batch.sort_by(|a, b| {
                (a.group_id.as_deref(), a.sequence_number)
                    .cmp(&(b.group_id.as_deref(), b.sequence_number))
            });
        }

        info!(messages = batch.len(), fifo, "Processing batch");

        let mut failed: Vec<String> = Vec::new();

        for message in &batch {
            // An earlier failure in a FIFO batch poisons everything after
            // it: a later item must never succeed past an unresolved one.
            if fifo && !failed.is_empty() {
                debug!(
                    message_id = %message.id,
                    group = message.group_id.as_deref().unwrap_or(""),
                    "Skipping message after earlier failure in ordered batch"
                );
                failed.push(message.id.clone());
                continue;
            }

            match self.process_message(message, &cancel, deadline).await {
                Ok(()) => {
                    debug!(message_id = %message.id, "Message processed");
                }
                Err(err) if err.is_already_completed() => {
                    debug!(
                        message_id = %message.id,
                        "Message already completed by an earlier delivery, acknowledging"
                    );
                }
                Err(err) => {
                    warn!(message_id = %message.id, error = %err, "Message failed");
                    failed.push(message.id.clone());
                }
            }
        }

        BatchDisposition::Partial { failed }
    }

    /// Reconcile one message and invoke its handler.
    async fn process_message(
        &self,
        message: &DeliveredMessage,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let queue = message.logical_queue_name().to_string();

        match self.reconcile(&queue, message, cancel, deadline).await? {
            Reconciliation::Committed(record) => {
                if record.status.is_some() {
                    // Not skipped: downstream idempotency is the business
                    // function's responsibility.
                    warn!(
                        message_id = %message.id,
                        queue = %queue,
                        "Duplicate delivery of a completed message"
                    );
                }
            }
            Reconciliation::Abandoned => return Ok(()),
        }

        let ctx = DeliveryContext {
            message_id: message.id.clone(),
            queue: queue.clone(),
            delete_at: message.delete_at(),
            receive_count: message.receive_count,
            group_id: message.group_id.clone(),
        };

        let Some(entry) = self.registry.get(&queue) else {
            return Err(Error::UnknownQueue(queue));
        };

        entry.handle_raw(&message.body, &ctx).await
    }

    /// Look up the message record, waiting out producer replication lag.
    ///
    /// Retries only while the record is absent. When it never appears, the
    /// delivery count decides between "give the store more time" (fail the
    /// message so the queue redelivers it later) and "the producing unit of
    /// work never committed" (acknowledge; this message will never resolve).
    async fn reconcile(
        &self,
        queue: &str,
        message: &DeliveredMessage,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<Reconciliation> {
        let retryer = Retryer::fixed(self.config.reconcile_retries, self.config.reconcile_delay);

        let record = retryer
            .run_cancellable(
                || self.records.fetch_message_record(queue, &message.id),
                |outcome| matches!(outcome, Ok(None)),
                cancel,
                deadline,
            )
            .await?;

        match record {
            Some(record) => Ok(Reconciliation::Committed(record)),
            None if message.receive_count >= self.config.abandon_after_receives => {
                warn!(
                    message_id = %message.id,
                    queue = %queue,
                    receive_count = message.receive_count,
                    "Message record never appeared, acknowledging unprocessed"
                );
                Ok(Reconciliation::Abandoned)
            }
            None => Err(Error::MessageRecordNotFound {
                key: QueueMessageRecord::key(queue, &message.id),
            }),
        }
    }
}
