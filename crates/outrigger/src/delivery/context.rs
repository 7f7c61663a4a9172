//! Delivery context handed to message handlers.

use crate::store::QueueMessageRecord;

/// Context provided to message handlers during batch processing.
///
/// Carries the identity of the delivered message so business code can
/// correlate its own writes with the message record — for example, staging a
/// completion update keyed by [`record_key`](Self::record_key) inside its
/// unit of work.
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    /// Queue-assigned message id.
    pub message_id: String,

    /// Logical name of the queue the message arrived on.
    pub queue: String,

    /// Unix-second delete-time marker attached by the sender, if any.
    pub delete_at: Option<i64>,

    /// How many times this message has been delivered, including this one.
    pub receive_count: u32,

    /// FIFO group id, if the message was sent to a group.
    pub group_id: Option<String>,
}

impl DeliveryContext {
    /// The store key of this message's [`QueueMessageRecord`].
    pub fn record_key(&self) -> String {
        QueueMessageRecord::key(&self.queue, &self.message_id)
    }

    /// Returns `true` if this message was delivered before (receive count > 1).
    pub fn is_redelivery(&self) -> bool {
        self.receive_count > 1
    }
}
