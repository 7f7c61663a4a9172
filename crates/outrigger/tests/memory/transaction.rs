//! Integration tests for the transaction coordinator.

use anyhow::Result;
use serde_json::json;

use outrigger::store::DocumentStore;
use outrigger::{
    Error, MemQueue, MemStore, Message, Precondition, QueueMessageRecord, TransactionCoordinator,
};

use crate::support::init_test_tracing;

fn coordinator(
    store: &MemStore,
    queue: &MemQueue,
) -> TransactionCoordinator<MemStore, MemQueue> {
    TransactionCoordinator::with_queue(store.clone(), queue.clone())
}

#[tokio::test]
async fn commit_applies_writes_and_links_sent_messages() -> Result<()> {
    init_test_tracing();
    let store = MemStore::new();
    let queue = MemQueue::new();

    coordinator(&store, &queue)
        .execute(|tx| async move {
            tx.stage_put(
                "orders",
                "o-1",
                json!({"status": "PLACED"}),
                Precondition::MustNotExist,
            )?;
            tx.stage_message(
                Message::json("shipping", &json!({"order_id": "o-1"}))?.with_dedup("o-1"),
            )?;
            Ok(())
        })
        .await?;

    // Business write landed
    assert_eq!(
        store.get("orders", "o-1").await?,
        Some(json!({"status": "PLACED"}))
    );

    // Message went out and its record links it to the committed unit of work
    let batch = queue.deliver("shipping", 10);
    assert_eq!(batch.len(), 1);
    let key = QueueMessageRecord::key("shipping", &batch[0].id);
    let record = store.get("queue_messages", &key).await?.expect("record");
    assert_eq!(record["message_id"], json!(batch[0].id));
    assert_eq!(record["dedup_id"], json!("o-1"));
    Ok(())
}

#[tokio::test]
async fn business_error_skips_writes_but_not_sends() -> Result<()> {
    init_test_tracing();
    let store = MemStore::new();
    let queue = MemQueue::new();

    let err = coordinator(&store, &queue)
        .execute(|tx| async move {
            tx.stage_put(
                "orders",
                "o-1",
                json!({"status": "PLACED"}),
                Precondition::MustNotExist,
            )?;
            tx.stage_message(Message::json("shipping", &json!({"order_id": "o-1"}))?)?;
            Err::<(), _>(Error::business("credit check failed"))
        })
        .await
        .unwrap_err();

    // The business error surfaces unchanged
    assert!(matches!(err, Error::Business(_)));

    // No write is visible: neither the order nor the message record
    assert!(store.is_empty("orders"));
    assert!(store.is_empty("queue_messages"));

    // The message, however, was already sent before the error was acted on.
    // Consumers resolve this gap via reconciliation.
    assert_eq!(queue.len("shipping"), 1);
    Ok(())
}

#[tokio::test]
async fn send_failure_aborts_before_the_store_is_touched() -> Result<()> {
    init_test_tracing();
    let store = MemStore::new();
    let queue = MemQueue::new();
    queue.fail_next_send();

    let err = coordinator(&store, &queue)
        .execute(|tx| async move {
            tx.stage_put(
                "orders",
                "o-1",
                json!({"status": "PLACED"}),
                Precondition::MustNotExist,
            )?;
            tx.stage_message(Message::json("shipping", &json!({"order_id": "o-1"}))?)?;
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Queue(_)));
    assert!(store.is_empty("orders"));
    assert!(store.is_empty("queue_messages"));
    Ok(())
}

#[tokio::test]
async fn failed_conditional_check_leaves_no_partial_writes() -> Result<()> {
    init_test_tracing();
    let store = MemStore::new();
    let queue = MemQueue::new();

    // o-1 already exists, so the MustNotExist write below must fail.
    store
        .put(
            "orders",
            "o-1",
            json!({"status": "PLACED"}),
            &Precondition::MustNotExist,
        )
        .await?;

    let err = coordinator(&store, &queue)
        .execute(|tx| async move {
            tx.stage_put(
                "orders",
                "o-2",
                json!({"status": "PLACED"}),
                Precondition::MustNotExist,
            )?;
            tx.stage_put(
                "orders",
                "o-1",
                json!({"status": "REPLACED"}),
                Precondition::MustNotExist,
            )?;
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ConditionalCheckFailed));

    // Atomicity: the passing write did not land either
    assert!(store.get("orders", "o-2").await?.is_none());
    assert_eq!(
        store.get("orders", "o-1").await?,
        Some(json!({"status": "PLACED"}))
    );
    Ok(())
}

#[tokio::test]
async fn pure_message_send_creates_no_records() -> Result<()> {
    init_test_tracing();
    let store = MemStore::new();
    let queue = MemQueue::new();

    coordinator(&store, &queue)
        .execute(|tx| async move {
            tx.stage_message(Message::json("shipping", &json!({"order_id": "o-1"}))?)?;
            Ok(())
        })
        .await?;

    // A send without store writes is not a transaction: message out,
    // nothing persisted.
    assert_eq!(queue.len("shipping"), 1);
    assert!(store.is_empty("queue_messages"));
    Ok(())
}

#[tokio::test]
async fn delete_at_attribute_is_copied_into_the_record() -> Result<()> {
    init_test_tracing();
    let store = MemStore::new();
    let queue = MemQueue::new();
    let delete_at = time::OffsetDateTime::now_utc() + time::Duration::days(7);

    coordinator(&store, &queue)
        .execute(|tx| async move {
            tx.stage_put("orders", "o-1", json!({}), Precondition::MustNotExist)?;
            tx.stage_message(
                Message::json("shipping", &json!({"order_id": "o-1"}))?
                    .with_delete_at(delete_at),
            )?;
            Ok(())
        })
        .await?;

    let batch = queue.deliver("shipping", 1);
    let key = QueueMessageRecord::key("shipping", &batch[0].id);
    let record = store.get("queue_messages", &key).await?.expect("record");
    assert_eq!(record["delete_at"], json!(delete_at.unix_timestamp()));
    Ok(())
}
