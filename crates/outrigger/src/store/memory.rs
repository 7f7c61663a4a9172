//! In-memory document store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use super::{CancellationReason, DocumentStore, Precondition, StoreError, WriteOp};

/// In-memory store for local use and tests.
///
/// Clones share state, so a `MemStore` can be handed to a coordinator, a
/// record store and a test assertion helper at the same time. All operations
/// run under a single lock, which makes the multi-item write trivially
/// atomic: every precondition is checked against a stable snapshot before
/// any write is applied.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    collections: Arc<Mutex<HashMap<String, BTreeMap<String, Value>>>>,
}

impl MemStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items currently held in `collection`.
    ///
    /// Test helper for asserting that an aborted unit of work left the store
    /// untouched.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .expect("store lock poisoned")
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Returns `true` when `collection` holds no items.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    fn condition_failed(collection: &str, key: &str) -> StoreError {
        StoreError::ConditionFailed {
            collection: collection.to_string(),
            key: key.to_string(),
        }
    }
}

impl DocumentStore for MemStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let collections = self.collections.lock().expect("store lock poisoned");
        Ok(collections
            .get(collection)
            .and_then(|items| items.get(key))
            .cloned())
    }

    async fn put(
        &self,
        collection: &str,
        key: &str,
        item: Value,
        condition: &Precondition,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().expect("store lock poisoned");
        let items = collections.entry(collection.to_string()).or_default();

        if !condition.holds(items.get(key)) {
            return Err(Self::condition_failed(collection, key));
        }

        items.insert(key.to_string(), item);
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        key: &str,
        set: BTreeMap<String, Value>,
        condition: &Precondition,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().expect("store lock poisoned");
        let items = collections.entry(collection.to_string()).or_default();

        if !condition.holds(items.get(key)) {
            return Err(Self::condition_failed(collection, key));
        }

        apply_update(items, key, set);
        Ok(())
    }

    async fn delete(
        &self,
        collection: &str,
        key: &str,
        condition: &Precondition,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().expect("store lock poisoned");
        let items = collections.entry(collection.to_string()).or_default();

        if !condition.holds(items.get(key)) {
            return Err(Self::condition_failed(collection, key));
        }

        items.remove(key);
        Ok(())
    }

    async fn transact_write(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().expect("store lock poisoned");

        // Check every precondition before applying any write.
        let mut failed = false;
        let reasons: Vec<CancellationReason> = ops
            .iter()
            .map(|op| {
                let current = collections
                    .get(op.collection())
                    .and_then(|items| items.get(op.key()));
                if op.condition().holds(current) {
                    CancellationReason::None
                } else {
                    failed = true;
                    CancellationReason::ConditionFailed
                }
            })
            .collect();

        if failed {
            return Err(StoreError::TransactionCanceled { reasons });
        }

        for op in ops {
            let items = collections.entry(op.collection().to_string()).or_default();
            match op {
                WriteOp::Put { key, item, .. } => {
                    items.insert(key, item);
                }
                WriteOp::Update { key, set, .. } => {
                    apply_update(items, &key, set);
                }
                WriteOp::Delete { key, .. } => {
                    items.remove(&key);
                }
            }
        }

        Ok(())
    }
}

/// Merge `set` into the item at `key`, creating an empty object if absent.
fn apply_update(items: &mut BTreeMap<String, Value>, key: &str, set: BTreeMap<String, Value>) {
    let item = items
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Default::default()));

    if let Value::Object(fields) = item {
        for (attribute, value) in set {
            fields.insert(attribute, value);
        }
    }
}
