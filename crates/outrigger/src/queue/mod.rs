//! Queue abstraction: outbound messages, delivered messages, and the client
//! contract.
//!
//! The queue contract consumed by the framework is deliberately small:
//! at-least-once delivery, batched consumption with per-message redelivery
//! counts and custom attributes, optional FIFO grouping (group id plus a
//! monotonically increasing sequence number per group), and batch responses
//! naming exactly which messages should be redelivered.

mod memory;

use std::collections::BTreeMap;
use std::future::Future;

use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

pub use memory::MemQueue;

use crate::error::Result;

/// Attribute key carrying a message's unix-second delete-time marker.
///
/// Copied into the [`QueueMessageRecord`](crate::store::QueueMessageRecord)
/// created for the message, so record expiry tracks message retention.
pub const DELETE_AT_ATTRIBUTE: &str = "delete_at";

/// Classified queue failure.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A send was rejected or lost before the queue acknowledged it.
    #[error("send to queue {queue} failed: {reason}")]
    SendFailed {
        /// Destination queue name.
        queue: String,
        /// Provider-reported reason.
        reason: String,
    },

    /// Any other backend failure.
    #[error("queue backend error: {0}")]
    Backend(String),
}

/// Transient outbound message.
///
/// Never persisted directly: a `Message` is either turned into a real queue
/// send when its unit of work ends, or discarded when the unit aborts.
///
/// # Example
///
/// ```
/// use outrigger::queue::Message;
///
/// let message = Message::new("orders", r#"{"order_id":"o-1"}"#)
///     .with_group("customer-42")
///     .with_dedup("o-1");
/// assert_eq!(message.queue(), "orders");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    queue: String,
    body: String,
    group_id: Option<String>,
    dedup_id: Option<String>,
    attributes: BTreeMap<String, String>,
}

impl Message {
    /// Create a message with a pre-serialized body.
    pub fn new(queue: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            body: body.into(),
            group_id: None,
            dedup_id: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Create a message by serializing `payload` to JSON.
    pub fn json<P: Serialize>(queue: impl Into<String>, payload: &P) -> Result<Self> {
        Ok(Self::new(queue, serde_json::to_string(payload)?))
    }

    /// Assign the message to a FIFO group.
    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Attach a de-duplication id.
    pub fn with_dedup(mut self, dedup_id: impl Into<String>) -> Self {
        self.dedup_id = Some(dedup_id.into());
        self
    }

    /// Attach a delete-time marker as a message attribute.
    pub fn with_delete_at(mut self, delete_at: OffsetDateTime) -> Self {
        self.attributes.insert(
            DELETE_AT_ATTRIBUTE.to_string(),
            delete_at.unix_timestamp().to_string(),
        );
        self
    }

    /// Attach an arbitrary string attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Destination queue name.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Serialized message body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// FIFO group id, if any.
    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    /// De-duplication id, if any.
    pub fn dedup_id(&self) -> Option<&str> {
        self.dedup_id.as_deref()
    }

    /// All message attributes.
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// The unix-second delete-time marker, if one was attached.
    pub fn delete_at(&self) -> Option<i64> {
        self.attributes
            .get(DELETE_AT_ATTRIBUTE)
            .and_then(|v| v.parse().ok())
    }
}

/// Acknowledgement for a sent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Queue-assigned message id.
    pub message_id: String,
}

/// Queue client contract consumed by the transaction coordinator.
///
/// # Implementations
///
/// - [`MemQueue`] — in-memory, for local use and tests
pub trait QueueClient: Send + Sync + Clone + 'static {
    /// Send one message, returning the queue-assigned id.
    fn send(&self, message: &Message)
        -> impl Future<Output = std::result::Result<SentMessage, QueueError>> + Send;
}

/// One message of a consumed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredMessage {
    /// Queue-assigned message id.
    pub id: String,
    /// Provider identity of the source queue (e.g. an ARN-style string).
    pub source: String,
    /// Serialized message body.
    pub body: String,
    /// How many times this message has been delivered, including this one.
    pub receive_count: u32,
    /// FIFO group id, if the message was sent to a group.
    pub group_id: Option<String>,
    /// Position within the FIFO group; increases monotonically per group.
    pub sequence_number: Option<u64>,
    /// Custom attributes attached by the sender.
    pub attributes: BTreeMap<String, String>,
}

impl DeliveredMessage {
    /// Derive the logical queue name from the provider source identity.
    ///
    /// Takes the last `/`- or `:`-separated segment, so both
    /// `arn:aws:sqs:eu-west-1:123:orders` and `https://host/123/orders`
    /// yield `orders`.
    pub fn logical_queue_name(&self) -> &str {
        self.source
            .rsplit(|c| c == ':' || c == '/')
            .next()
            .unwrap_or(&self.source)
    }

    /// The unix-second delete-time marker, if one was attached.
    pub fn delete_at(&self) -> Option<i64> {
        self.attributes
            .get(DELETE_AT_ATTRIBUTE)
            .and_then(|v| v.parse().ok())
    }
}
