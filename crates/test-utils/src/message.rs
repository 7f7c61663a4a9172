//! Fluent construction of delivered messages.

use std::collections::BTreeMap;

use outrigger::DeliveredMessage;
use outrigger::queue::DELETE_AT_ATTRIBUTE;

/// Start building a delivered message for `queue` with the given id.
///
/// The source identity is synthesized as `mem:{queue}` so
/// `logical_queue_name()` resolves back to `queue`. Receive count defaults
/// to 1 and the body to `{}`.
pub fn delivered(queue: &str, id: &str) -> DeliveredMessageBuilder {
    DeliveredMessageBuilder {
        message: DeliveredMessage {
            id: id.to_string(),
            source: format!("mem:{queue}"),
            body: "{}".to_string(),
            receive_count: 1,
            group_id: None,
            sequence_number: None,
            attributes: BTreeMap::new(),
        },
    }
}

/// Builder returned by [`delivered`].
#[derive(Debug, Clone)]
pub struct DeliveredMessageBuilder {
    message: DeliveredMessage,
}

impl DeliveredMessageBuilder {
    /// Set the serialized body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.message.body = body.into();
        self
    }

    /// Assign the message to a FIFO group at the given sequence number.
    pub fn group(mut self, group_id: impl Into<String>, sequence_number: u64) -> Self {
        self.message.group_id = Some(group_id.into());
        self.message.sequence_number = Some(sequence_number);
        self
    }

    /// Set the delivery count.
    pub fn receive_count(mut self, receive_count: u32) -> Self {
        self.message.receive_count = receive_count;
        self
    }

    /// Attach a unix-second delete-time attribute.
    pub fn delete_at(mut self, delete_at: i64) -> Self {
        self.message
            .attributes
            .insert(DELETE_AT_ATTRIBUTE.to_string(), delete_at.to_string());
        self
    }

    /// Finish building.
    pub fn build(self) -> DeliveredMessage {
        self.message
    }
}
