//! Integration tests for the idempotency guard.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use test_utils::{FlakyStore, StoreOp};
use tokio::sync::Notify;

use outrigger::{Error, IdempotencyGuard, IdempotencyKey, MemStore, RecordStore};

use crate::support::init_test_tracing;

#[tokio::test]
async fn concurrent_calls_with_one_key_execute_once() -> Result<()> {
    init_test_tracing();
    let guard = IdempotencyGuard::new(RecordStore::new(MemStore::new()));
    let key = IdempotencyKey::new("order-1-place");

    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    // First caller takes the lock and parks inside the guarded work.
    let first = {
        let guard = guard.clone();
        let key = key.clone();
        let started = Arc::clone(&started);
        let release = Arc::clone(&release);
        tokio::spawn(async move {
            guard
                .process(&key, Some(Duration::from_secs(30)), async {
                    started.notify_one();
                    release.notified().await;
                    Ok(1)
                })
                .await
        })
    };

    // Second caller arrives while the first is mid-execution.
    started.notified().await;
    let second = guard.process(&key, Some(Duration::from_secs(30)), async { Ok(2) }).await;
    assert!(matches!(second, Err(Error::InProgress { .. })));

    release.notify_one();
    assert_eq!(first.await??, 1);

    // With the first call complete, the key now replays as already done.
    let third = guard.process(&key, None, async { Ok(3) }).await;
    assert!(matches!(third, Err(Error::AlreadyCompleted { .. })));
    Ok(())
}

#[tokio::test]
async fn completion_update_failure_releases_the_lock() -> Result<()> {
    init_test_tracing();
    let store = FlakyStore::new(MemStore::new());
    let guard = IdempotencyGuard::new(RecordStore::new(store.clone()));
    let key = IdempotencyKey::new("order-2-place");

    // The guarded work succeeds, but marking the record complete fails.
    store.fail_next(StoreOp::Update);
    let err = guard
        .process(&key, None, async { Ok(()) })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Store(_)));

    // The failed completion must not leave a stuck lock: the next call runs.
    let value = guard.process(&key, None, async { Ok(7) }).await?;
    assert_eq!(value, 7);
    Ok(())
}

#[tokio::test]
async fn release_failure_does_not_mask_the_work_error() -> Result<()> {
    init_test_tracing();
    let store = FlakyStore::new(MemStore::new());
    let guard = IdempotencyGuard::new(RecordStore::new(store.clone()));
    let key = IdempotencyKey::new("order-3-place");

    store.fail_next(StoreOp::Delete);
    let err = guard
        .process(&key, None, async {
            Err::<(), _>(Error::business("payment declined"))
        })
        .await
        .unwrap_err();

    // The original failure surfaces even though the release itself failed.
    assert!(matches!(err, Error::Business(_)));
    Ok(())
}
