//! In-memory queue.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use super::{DeliveredMessage, Message, QueueClient, QueueError, SentMessage};

#[derive(Debug, Default)]
struct MemQueueInner {
    queues: HashMap<String, VecDeque<DeliveredMessage>>,
    // Per (queue, group) send counter for FIFO sequence numbers.
    group_sequences: HashMap<(String, String), u64>,
    fail_next_send: bool,
}

/// In-memory queue for local use and tests.
///
/// Assigns uuid-v7 message ids on send and a monotonically increasing
/// sequence number per FIFO group. Clones share state. Delivery is pull
/// based: [`deliver`](Self::deliver) pops a batch and increments each
/// message's receive count; callers re-enqueue messages they want
/// redelivered via [`requeue`](Self::requeue).
#[derive(Debug, Clone, Default)]
pub struct MemQueue {
    inner: Arc<Mutex<MemQueueInner>>,
}

impl MemQueue {
    /// Create an empty queue backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `send` fail with a provider error.
    ///
    /// Test hook for exercising the coordinator's abort-on-send path.
    pub fn fail_next_send(&self) {
        self.inner.lock().expect("queue lock poisoned").fail_next_send = true;
    }

    /// Pop up to `max` messages from `queue`, bumping receive counts.
    pub fn deliver(&self, queue: &str, max: usize) -> Vec<DeliveredMessage> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let Some(pending) = inner.queues.get_mut(queue) else {
            return Vec::new();
        };

        let mut batch = Vec::new();
        while batch.len() < max {
            let Some(mut message) = pending.pop_front() else {
                break;
            };
            message.receive_count += 1;
            batch.push(message);
        }
        batch
    }

    /// Put a previously delivered message back at the front of its queue.
    ///
    /// Keeps id, group, sequence number and receive count, modelling the
    /// provider's redelivery of messages reported as failed.
    pub fn requeue(&self, queue: &str, message: DeliveredMessage) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_front(message);
    }

    /// Number of messages waiting in `queue`.
    pub fn len(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .expect("queue lock poisoned")
            .queues
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    /// Returns `true` when `queue` holds no messages.
    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }
}

impl QueueClient for MemQueue {
    async fn send(&self, message: &Message) -> Result<SentMessage, QueueError> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");

        if inner.fail_next_send {
            inner.fail_next_send = false;
            return Err(QueueError::SendFailed {
                queue: message.queue().to_string(),
                reason: "injected send failure".to_string(),
            });
        }

        let message_id = Uuid::now_v7().to_string();
        let sequence_number = message.group_id().map(|group| {
            let counter = inner
                .group_sequences
                .entry((message.queue().to_string(), group.to_string()))
                .or_insert(0);
            *counter += 1;
            *counter
        });

        let delivered = DeliveredMessage {
            id: message_id.clone(),
            source: format!("mem:{}", message.queue()),
            body: message.body().to_string(),
            receive_count: 0,
            group_id: message.group_id().map(str::to_string),
            sequence_number,
            attributes: message.attributes().clone(),
        };

        inner
            .queues
            .entry(message.queue().to_string())
            .or_default()
            .push_back(delivered);

        Ok(SentMessage { message_id })
    }
}
