//! Document-store abstraction and outbox records.
//!
//! This module provides the [`DocumentStore`] trait that abstracts over a
//! document store with conditional single-item writes and one atomic
//! multi-item conditional write. Two layers build on it:
//!
//! - [`MemStore`] — in-memory reference implementation
//! - [`RecordStore`] — typed operations for the framework's own rows
//!   ([`QueueMessageRecord`] and [`IdempotencyRecord`])
//!
//! Store failures are reported as the tagged [`StoreError`] enum so callers
//! can match on the failure kind exhaustively instead of probing error types.

mod memory;
mod record;

use std::collections::BTreeMap;
use std::future::Future;

use serde_json::Value;
use thiserror::Error;

pub use memory::MemStore;
pub use record::{
    AcquireOutcome, IdempotencyRecord, IdempotencyStatus, MessageStatus, QueueMessageRecord,
    RecordStore, RecordStoreConfig,
};

/// Why an individual item canceled a multi-item write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationReason {
    /// This item did not contribute to the cancellation.
    None,
    /// This item's precondition did not hold.
    ConditionFailed,
    /// This item was touched by a conflicting transaction.
    Conflict,
}

/// Classified store failure.
///
/// Predicate failures and concurrent-modification races are distinct from
/// other I/O failures so callers can translate them into domain outcomes
/// ("someone already did this") rather than opaque errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A single-item write's precondition did not hold.
    #[error("condition failed for {collection}/{key}")]
    ConditionFailed {
        /// Collection the write targeted.
        collection: String,
        /// Item key the write targeted.
        key: String,
    },

    /// An update or delete raced with a concurrent modification.
    #[error("conflict on {collection}/{key}")]
    Conflict {
        /// Collection the write targeted.
        collection: String,
        /// Item key the write targeted.
        key: String,
    },

    /// A multi-item write was canceled; no item was applied.
    ///
    /// `reasons` has one entry per submitted [`WriteOp`], in order.
    #[error("transaction canceled ({} items)", .reasons.len())]
    TransactionCanceled {
        /// Per-item cancellation reasons, parallel to the submitted ops.
        reasons: Vec<CancellationReason>,
    },

    /// Any other backend failure (connectivity, throttling, corruption).
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Predicate attached to a conditional write.
///
/// Evaluated against the current state of the targeted item (`None` when the
/// item does not exist). The algebra is deliberately small; [`AnyOf`] and
/// [`AllOf`] exist so a compound reclaim condition can be expressed as a
/// single conditional write.
///
/// [`AnyOf`]: Precondition::AnyOf
/// [`AllOf`]: Precondition::AllOf
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// Always holds.
    Unconditional,
    /// Holds when the item does not exist.
    MustNotExist,
    /// Holds when the item exists.
    MustExist,
    /// Holds when the item exists and `attribute` equals `value`.
    Equals {
        /// Attribute name within the item.
        attribute: String,
        /// Expected value.
        value: Value,
    },
    /// Holds when the item exists and `attribute` is numerically below `value`.
    LessThan {
        /// Attribute name within the item.
        attribute: String,
        /// Exclusive upper bound.
        value: Value,
    },
    /// Holds when every inner predicate holds.
    AllOf(Vec<Precondition>),
    /// Holds when at least one inner predicate holds.
    AnyOf(Vec<Precondition>),
}

impl Precondition {
    /// Evaluate this predicate against the current item state.
    pub fn holds(&self, item: Option<&Value>) -> bool {
        match self {
            Precondition::Unconditional => true,
            Precondition::MustNotExist => item.is_none(),
            Precondition::MustExist => item.is_some(),
            Precondition::Equals { attribute, value } => {
                item.and_then(|i| i.get(attribute)) == Some(value)
            }
            Precondition::LessThan { attribute, value } => {
                match (item.and_then(|i| i.get(attribute)), value) {
                    (Some(actual), bound) => match (actual.as_i64(), bound.as_i64()) {
                        (Some(a), Some(b)) => a < b,
                        _ => match (actual.as_f64(), bound.as_f64()) {
                            (Some(a), Some(b)) => a < b,
                            _ => false,
                        },
                    },
                    (None, _) => false,
                }
            }
            Precondition::AllOf(inner) => inner.iter().all(|p| p.holds(item)),
            Precondition::AnyOf(inner) => inner.iter().any(|p| p.holds(item)),
        }
    }
}

/// One item of a multi-item conditional write.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Replace the item wholesale.
    Put {
        /// Target collection.
        collection: String,
        /// Target item key.
        key: String,
        /// The full item to store.
        item: Value,
        /// Predicate that must hold against the current item state.
        condition: Precondition,
    },
    /// Merge the given attributes into the item, creating it if absent.
    Update {
        /// Target collection.
        collection: String,
        /// Target item key.
        key: String,
        /// Attributes to set.
        set: BTreeMap<String, Value>,
        /// Predicate that must hold against the current item state.
        condition: Precondition,
    },
    /// Remove the item.
    Delete {
        /// Target collection.
        collection: String,
        /// Target item key.
        key: String,
        /// Predicate that must hold against the current item state.
        condition: Precondition,
    },
}

impl WriteOp {
    /// Create a conditional put.
    pub fn put(
        collection: impl Into<String>,
        key: impl Into<String>,
        item: Value,
        condition: Precondition,
    ) -> Self {
        WriteOp::Put {
            collection: collection.into(),
            key: key.into(),
            item,
            condition,
        }
    }

    /// Create a conditional attribute update.
    pub fn update(
        collection: impl Into<String>,
        key: impl Into<String>,
        set: BTreeMap<String, Value>,
        condition: Precondition,
    ) -> Self {
        WriteOp::Update {
            collection: collection.into(),
            key: key.into(),
            set,
            condition,
        }
    }

    /// Create a conditional delete.
    pub fn delete(
        collection: impl Into<String>,
        key: impl Into<String>,
        condition: Precondition,
    ) -> Self {
        WriteOp::Delete {
            collection: collection.into(),
            key: key.into(),
            condition,
        }
    }

    /// The collection this op targets.
    pub fn collection(&self) -> &str {
        match self {
            WriteOp::Put { collection, .. }
            | WriteOp::Update { collection, .. }
            | WriteOp::Delete { collection, .. } => collection,
        }
    }

    /// The item key this op targets.
    pub fn key(&self) -> &str {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Update { key, .. } | WriteOp::Delete { key, .. } => {
                key
            }
        }
    }

    /// The precondition attached to this op.
    pub fn condition(&self) -> &Precondition {
        match self {
            WriteOp::Put { condition, .. }
            | WriteOp::Update { condition, .. }
            | WriteOp::Delete { condition, .. } => condition,
        }
    }
}

/// Document store with conditional writes.
///
/// The contract consumed by the framework: conditional single-item
/// put/update/delete, plus one atomic multi-item conditional write
/// (all-or-nothing across items, each with its own predicate).
///
/// # Implementations
///
/// - [`MemStore`] — in-memory, for local use and tests
pub trait DocumentStore: Send + Sync + Clone + 'static {
    /// Fetch an item, or `None` when absent.
    fn get(
        &self,
        collection: &str,
        key: &str,
    ) -> impl Future<Output = Result<Option<Value>, StoreError>> + Send;

    /// Store an item if `condition` holds against its current state.
    fn put(
        &self,
        collection: &str,
        key: &str,
        item: Value,
        condition: &Precondition,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Merge attributes into an item if `condition` holds, creating the item
    /// when absent.
    fn update(
        &self,
        collection: &str,
        key: &str,
        set: BTreeMap<String, Value>,
        condition: &Precondition,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove an item if `condition` holds.
    fn delete(
        &self,
        collection: &str,
        key: &str,
        condition: &Precondition,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Apply every op atomically, or none of them.
    ///
    /// Each op carries its own predicate; a single failing predicate cancels
    /// the whole write with per-item [`CancellationReason`]s.
    fn transact_write(
        &self,
        ops: Vec<WriteOp>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
