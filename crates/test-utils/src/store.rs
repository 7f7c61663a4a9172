//! Fault-injecting document store wrapper.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use outrigger::store::{DocumentStore, Precondition, StoreError, WriteOp};

/// Which store operation to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// Fail `get`.
    Get,
    /// Fail `put`.
    Put,
    /// Fail `update`.
    Update,
    /// Fail `delete`.
    Delete,
    /// Fail `transact_write`.
    TransactWrite,
}

/// Document store wrapper that fails scripted operations.
///
/// Each call to [`fail_next`](Self::fail_next) arms one failure for the
/// given operation kind; the next matching call returns
/// `StoreError::Backend` instead of reaching the inner store. Everything
/// else delegates untouched.
///
/// Used to exercise paths like "the completion update failed, release the
/// lock" without a real faulty backend.
#[derive(Debug, Clone)]
pub struct FlakyStore<S> {
    inner: S,
    armed: Arc<Mutex<HashMap<StoreOp, u32>>>,
}

impl<S> FlakyStore<S> {
    /// Wrap a store with no failures armed.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            armed: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Arm one failure for the next call of the given operation kind.
    ///
    /// Calling repeatedly arms additional failures.
    pub fn fail_next(&self, op: StoreOp) {
        *self
            .armed
            .lock()
            .expect("failure table lock poisoned")
            .entry(op)
            .or_insert(0) += 1;
    }

    fn trip(&self, op: StoreOp) -> Result<(), StoreError> {
        let mut armed = self.armed.lock().expect("failure table lock poisoned");
        match armed.get_mut(&op) {
            Some(count) if *count > 0 => {
                *count -= 1;
                Err(StoreError::Backend(format!("injected {op:?} failure")))
            }
            _ => Ok(()),
        }
    }
}

impl<S: DocumentStore> DocumentStore for FlakyStore<S> {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError> {
        self.trip(StoreOp::Get)?;
        self.inner.get(collection, key).await
    }

    async fn put(
        &self,
        collection: &str,
        key: &str,
        item: Value,
        condition: &Precondition,
    ) -> Result<(), StoreError> {
        self.trip(StoreOp::Put)?;
        self.inner.put(collection, key, item, condition).await
    }

    async fn update(
        &self,
        collection: &str,
        key: &str,
        set: BTreeMap<String, Value>,
        condition: &Precondition,
    ) -> Result<(), StoreError> {
        self.trip(StoreOp::Update)?;
        self.inner.update(collection, key, set, condition).await
    }

    async fn delete(
        &self,
        collection: &str,
        key: &str,
        condition: &Precondition,
    ) -> Result<(), StoreError> {
        self.trip(StoreOp::Delete)?;
        self.inner.delete(collection, key, condition).await
    }

    async fn transact_write(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        self.trip(StoreOp::TransactWrite)?;
        self.inner.transact_write(ops).await
    }
}
