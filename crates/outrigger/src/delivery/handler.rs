//! Message handler trait and the type-erased handler registry.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::context::DeliveryContext;
use crate::error::Result;

/// Handler for messages delivered on one logical queue.
///
/// Implement this trait once per queue the consumer listens on. The batch
/// consumer deserializes each message body into [`Payload`](Self::Payload)
/// and invokes [`handle`](Self::handle) strictly sequentially within a batch.
///
/// # Error Handling
///
/// | Result | Meaning |
/// |--------|---------|
/// | `Ok(())` | Message processed; it is acknowledged |
/// | `Err(Error::AlreadyCompleted { .. })` | Duplicate of finished work; acknowledged |
/// | `Err(_)` | Message failed; it is reported for redelivery |
///
/// # Idempotency
///
/// Delivery is **at-least-once**; handlers may see the same message more
/// than once. Wrap non-idempotent work in
/// [`IdempotencyGuard::process`](crate::IdempotencyGuard::process) — its
/// "already completed" condition is recognized by the consumer and counted
/// as success.
///
/// # Example
///
/// ```ignore
/// struct ShippingHandler {
///     coordinator: TransactionCoordinator<MemStore, MemQueue>,
/// }
///
/// #[async_trait]
/// impl MessageHandler for ShippingHandler {
///     type Payload = ShipRequest;
///
///     const QUEUE: &'static str = "shipping";
///
///     async fn handle(&self, payload: ShipRequest, ctx: &DeliveryContext) -> Result<()> {
///         self.coordinator
///             .execute(|tx| async move {
///                 tx.stage_put("shipments", &payload.order_id, item, Precondition::MustNotExist)?;
///                 Ok(())
///             })
///             .await
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Deserialized message body type.
    type Payload: DeserializeOwned + Send;

    /// Logical queue name this handler consumes. Must be stable across
    /// deployments.
    const QUEUE: &'static str;

    /// Process one message.
    async fn handle(&self, payload: Self::Payload, ctx: &DeliveryContext) -> Result<()>;
}

/// Type-erased handler entry for dynamic dispatch.
///
/// Allows the registry to store handlers for different payload types in a
/// single map while preserving typed execution.
#[async_trait]
pub(crate) trait HandlerEntry: Send + Sync {
    /// Deserialize the message body and route it to the typed handler.
    async fn handle_raw(&self, body: &str, ctx: &DeliveryContext) -> Result<()>;
}

/// Typed handler entry capturing the concrete handler at registration.
struct TypedHandlerEntry<H> {
    handler: H,
}

#[async_trait]
impl<H> HandlerEntry for TypedHandlerEntry<H>
where
    H: MessageHandler,
{
    async fn handle_raw(&self, body: &str, ctx: &DeliveryContext) -> Result<()> {
        let payload: H::Payload = serde_json::from_str(body)?;
        self.handler.handle(payload, ctx).await
    }
}

/// Registry mapping logical queue names to their handlers.
pub(crate) struct HandlerRegistry {
    entries: HashMap<&'static str, Box<dyn HandlerEntry>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("queues", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a handler under its queue name.
    ///
    /// Returns `false` when the queue was already taken.
    pub(crate) fn register<H: MessageHandler>(&mut self, handler: H) -> bool {
        if self.entries.contains_key(H::QUEUE) {
            return false;
        }
        self.entries
            .insert(H::QUEUE, Box::new(TypedHandlerEntry { handler }));
        true
    }

    /// Look up a handler entry by logical queue name.
    pub(crate) fn get(&self, queue: &str) -> Option<&dyn HandlerEntry> {
        self.entries.get(queue).map(Box::as_ref)
    }

    /// Returns the number of registered handlers.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
