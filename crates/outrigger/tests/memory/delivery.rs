//! Integration tests for ordered, reconciling batch consumption.

use std::time::Duration;

use anyhow::Result;
use test_utils::delivered;

use outrigger::{BatchConsumer, BatchDisposition, MemStore, RecordStore};

use crate::support::handlers::{Outcome, RecordingHandler, Step};
use crate::support::{
    init_test_tracing, insert_completed_message_record, insert_message_record,
    test_consumer_config,
};

fn consumer(store: &MemStore, handler: RecordingHandler) -> BatchConsumer<MemStore> {
    BatchConsumer::builder(RecordStore::new(store.clone()))
        .register(handler)
        .config(test_consumer_config())
        .build()
        .expect("consumer should build")
}

#[tokio::test]
async fn fifo_batch_is_processed_in_group_sequence_order() -> Result<()> {
    init_test_tracing();
    let store = MemStore::new();
    let handler = RecordingHandler::new();
    let consumer = consumer(&store, handler.clone());

    // Delivered out of order: A/2 before A/1.
    let batch = vec![
        delivered("steps", "m-a2").body(Step::ok("a2").body()).group("A", 2).build(),
        delivered("steps", "m-a1").body(Step::ok("a1").body()).group("A", 1).build(),
        delivered("steps", "m-b1").body(Step::ok("b1").body()).group("B", 1).build(),
    ];
    for message in &batch {
        insert_message_record(&store, "steps", &message.id).await?;
    }

    let disposition = consumer.handle_batch(batch).await;

    assert!(disposition.is_clean());
    assert_eq!(handler.processed(), vec!["a1", "a2", "b1"]);
    Ok(())
}

#[tokio::test]
async fn fifo_failure_fails_every_later_message_unprocessed() -> Result<()> {
    init_test_tracing();
    let store = MemStore::new();
    let handler = RecordingHandler::new();
    let consumer = consumer(&store, handler.clone());

    let batch = vec![
        delivered("steps", "m-a1")
            .body(Step::with("a1", Outcome::Fail).body())
            .group("A", 1)
            .build(),
        delivered("steps", "m-a2").body(Step::ok("a2").body()).group("A", 2).build(),
        delivered("steps", "m-b1").body(Step::ok("b1").body()).group("B", 1).build(),
    ];
    for message in &batch {
        insert_message_record(&store, "steps", &message.id).await?;
    }

    let disposition = consumer.handle_batch(batch).await;

    // Only a1 ever reached the handler; everything after it is failed so no
    // group item overtakes the unresolved one.
    assert_eq!(handler.processed(), vec!["a1"]);
    assert_eq!(
        disposition,
        BatchDisposition::Partial {
            failed: vec!["m-a1".into(), "m-a2".into(), "m-b1".into()]
        }
    );
    Ok(())
}

#[tokio::test]
async fn non_fifo_failures_are_independent() -> Result<()> {
    init_test_tracing();
    let store = MemStore::new();
    let handler = RecordingHandler::new();
    let consumer = consumer(&store, handler.clone());

    let batch = vec![
        delivered("steps", "m-1").body(Step::with("s1", Outcome::Fail).body()).build(),
        delivered("steps", "m-2").body(Step::ok("s2").body()).build(),
    ];
    for message in &batch {
        insert_message_record(&store, "steps", &message.id).await?;
    }

    let disposition = consumer.handle_batch(batch).await;

    // Without FIFO groups a failure does not poison later messages.
    assert_eq!(handler.processed(), vec!["s1", "s2"]);
    assert_eq!(
        disposition,
        BatchDisposition::Partial {
            failed: vec!["m-1".into()]
        }
    );
    Ok(())
}

#[tokio::test]
async fn record_appearing_mid_reconciliation_is_processed_normally() -> Result<()> {
    init_test_tracing();
    let store = MemStore::new();
    let handler = RecordingHandler::new();
    let consumer = consumer(&store, handler.clone());
    let config = test_consumer_config();

    let batch = vec![delivered("steps", "m-late").body(Step::ok("late").body()).build()];

    // The record lands while the consumer is already retrying the lookup,
    // as happens when the producer's commit trails its send.
    let writer = {
        let store = store.clone();
        let delay = config.reconcile_delay * 2 + config.reconcile_delay / 2;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            insert_message_record(&store, "steps", "m-late").await
        })
    };

    let disposition = consumer.handle_batch(batch).await;
    writer.await??;

    assert!(disposition.is_clean());
    assert_eq!(handler.processed(), vec!["late"]);
    Ok(())
}

#[tokio::test]
async fn missing_record_below_threshold_fails_the_message() -> Result<()> {
    init_test_tracing();
    let store = MemStore::new();
    let handler = RecordingHandler::new();
    let consumer = consumer(&store, handler.clone());

    // First delivery, no record anywhere: give the store more time by
    // failing the message so the queue redelivers it.
    let batch = vec![delivered("steps", "m-ghost")
        .body(Step::ok("ghost").body())
        .receive_count(1)
        .build()];

    let disposition = consumer.handle_batch(batch).await;

    assert_eq!(
        disposition,
        BatchDisposition::Partial {
            failed: vec!["m-ghost".into()]
        }
    );
    assert!(handler.processed().is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_record_at_threshold_is_acknowledged_unprocessed() -> Result<()> {
    init_test_tracing();
    let store = MemStore::new();
    let handler = RecordingHandler::new();
    let consumer = consumer(&store, handler.clone());

    // Second delivery and still no record: the producing unit of work never
    // committed, so this message will never resolve. Acknowledge it.
    let batch = vec![delivered("steps", "m-ghost")
        .body(Step::ok("ghost").body())
        .receive_count(2)
        .build()];

    let disposition = consumer.handle_batch(batch).await;

    assert!(disposition.is_clean());
    assert!(handler.processed().is_empty());
    Ok(())
}

#[tokio::test]
async fn duplicate_delivery_of_completed_message_is_still_processed() -> Result<()> {
    init_test_tracing();
    let store = MemStore::new();
    let handler = RecordingHandler::new();
    let consumer = consumer(&store, handler.clone());

    insert_completed_message_record(&store, "steps", "m-dup").await?;
    let batch = vec![delivered("steps", "m-dup")
        .body(Step::ok("dup").body())
        .receive_count(2)
        .build()];

    let disposition = consumer.handle_batch(batch).await;

    // Downstream idempotency is the handler's job; the consumer only warns.
    assert!(disposition.is_clean());
    assert_eq!(handler.processed(), vec!["dup"]);
    Ok(())
}

#[tokio::test]
async fn already_completed_condition_counts_as_success() -> Result<()> {
    init_test_tracing();
    let store = MemStore::new();
    let handler = RecordingHandler::new();
    let consumer = consumer(&store, handler.clone());

    let batch = vec![delivered("steps", "m-1")
        .body(Step::with("done-before", Outcome::AlreadyCompleted).body())
        .build()];
    insert_message_record(&store, "steps", "m-1").await?;

    let disposition = consumer.handle_batch(batch).await;

    assert!(disposition.is_clean());
    Ok(())
}

#[tokio::test]
async fn panic_mid_batch_fails_the_entire_batch() -> Result<()> {
    init_test_tracing();
    let store = MemStore::new();
    let handler = RecordingHandler::new();
    let consumer = consumer(&store, handler.clone());

    let batch = vec![
        delivered("steps", "m-1").body(Step::ok("s1").body()).build(),
        delivered("steps", "m-2").body(Step::with("s2", Outcome::Panic).body()).build(),
        delivered("steps", "m-3").body(Step::ok("s3").body()).build(),
    ];
    for message in &batch {
        insert_message_record(&store, "steps", &message.id).await?;
    }

    let disposition = consumer.handle_batch(batch.clone()).await;

    // Partial state is unknowable after a fault: everything is redelivered,
    // including the message that succeeded before the panic.
    assert_eq!(disposition, BatchDisposition::AllFailed);
    assert_eq!(
        disposition.failed_ids(&batch),
        vec!["m-1".to_string(), "m-2".to_string(), "m-3".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn message_for_unregistered_queue_is_failed() -> Result<()> {
    init_test_tracing();
    let store = MemStore::new();
    let handler = RecordingHandler::new();
    let consumer = consumer(&store, handler.clone());

    insert_message_record(&store, "unknown", "m-1").await?;
    let batch = vec![delivered("unknown", "m-1").build()];

    let disposition = consumer.handle_batch(batch).await;

    assert_eq!(
        disposition,
        BatchDisposition::Partial {
            failed: vec!["m-1".into()]
        }
    );
    Ok(())
}

#[tokio::test]
async fn cancellation_interrupts_reconciliation_waits() -> Result<()> {
    init_test_tracing();
    let store = MemStore::new();
    let handler = RecordingHandler::new();
    let config = outrigger::ConsumerConfig {
        reconcile_retries: 5,
        reconcile_delay: Duration::from_secs(60),
        abandon_after_receives: 2,
    };
    let consumer = BatchConsumer::builder(RecordStore::new(store.clone()))
        .register(handler.clone())
        .config(config)
        .build()?;

    let cancel = tokio_util::sync::CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        })
    };

    let started = std::time::Instant::now();
    let batch = vec![delivered("steps", "m-slow").body(Step::ok("slow").body()).build()];
    let disposition = consumer
        .handle_batch_cancellable(batch, cancel, None)
        .await;
    canceller.await?;

    // The 60s reconciliation sleep was abandoned, and the message is left
    // to a future invocation.
    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(
        disposition,
        BatchDisposition::Partial {
            failed: vec!["m-slow".into()]
        }
    );
    assert!(handler.processed().is_empty());
    Ok(())
}

#[tokio::test]
async fn reconciliation_waits_are_bounded() -> Result<()> {
    init_test_tracing();
    let store = MemStore::new();
    let handler = RecordingHandler::new();
    let config = outrigger::ConsumerConfig {
        reconcile_retries: 2,
        reconcile_delay: Duration::from_millis(10),
        abandon_after_receives: 2,
    };
    let consumer = BatchConsumer::builder(RecordStore::new(store.clone()))
        .register(handler.clone())
        .config(config)
        .build()?;

    let started = std::time::Instant::now();
    let batch = vec![delivered("steps", "m-ghost").body(Step::ok("g").body()).build()];
    consumer.handle_batch(batch).await;

    // 1 lookup + 2 retries at 10ms each, with headroom for scheduling.
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}
