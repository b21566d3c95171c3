use std::sync::Arc;

use anyhow::{Result, anyhow};
use futures_util::stream;
use lapin::message::Delivery;
use notification_dispatcher::{
    config::{DEAD_LETTER_QUEUE, MAIN_QUEUE, MAX_RETRIES},
    models::{
        delivery::{DeliveryOutcome, InboundMessage},
        notification::{NotificationKind, NotificationRecord},
    },
    testing::{MemoryBroker, MemoryNotificationStore},
    utils::{FAILED_AT_HEADER, FAILURE_REASON_HEADER, header_str},
};

use crate::common::{delivery_loop, deposit_payload, test_policy, transfer_payload};

/// Test: A deposit is recorded, acknowledged and never republished
#[tokio::test]
async fn test_deposit_is_recorded_and_acknowledged() -> Result<()> {
    let (delivery_loop, store, broker) =
        delivery_loop(MemoryNotificationStore::new(), MemoryBroker::new());

    let payload = br#"{"type":"transaction.deposit","payload":{"txn":{"account_id":"A1","amount":100}}}"#;
    let outcome = delivery_loop
        .handle(InboundMessage::new(1, payload.to_vec(), 0))
        .await;

    assert_eq!(outcome, DeliveryOutcome::Processed { records: 1 });
    assert_eq!(
        store.records(),
        vec![NotificationRecord {
            event_type: NotificationKind::Deposit,
            account_id: "A1".to_string(),
            amount: "100".to_string(),
            message: "Deposit of 100 successful".to_string(),
        }]
    );
    assert_eq!(broker.acked(), vec![1]);
    assert!(broker.published().is_empty(), "Nothing should be requeued");

    Ok(())
}

/// Test: A transfer writes both sides of the movement
#[tokio::test]
async fn test_transfer_writes_both_records() -> Result<()> {
    let (delivery_loop, store, broker) =
        delivery_loop(MemoryNotificationStore::new(), MemoryBroker::new());

    let outcome = delivery_loop
        .handle(InboundMessage::new(7, transfer_payload("A1", "A2", 50), 0))
        .await;

    assert_eq!(outcome, DeliveryOutcome::Processed { records: 2 });

    let records = store.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].event_type, NotificationKind::TransferOut);
    assert_eq!(records[0].account_id, "A1");
    assert_eq!(records[1].event_type, NotificationKind::TransferIn);
    assert_eq!(records[1].account_id, "A2");
    assert_eq!(broker.acked(), vec![7]);

    Ok(())
}

/// Test: An event already at the retry ceiling goes to the DLQ verbatim
#[tokio::test]
async fn test_exhausted_event_is_dead_lettered() -> Result<()> {
    let (delivery_loop, store, broker) =
        delivery_loop(MemoryNotificationStore::failing(), MemoryBroker::new());

    let payload = deposit_payload("A1", 100);
    let outcome = delivery_loop
        .handle(InboundMessage::new(3, payload.clone(), MAX_RETRIES))
        .await;

    assert!(
        matches!(outcome, DeliveryOutcome::DeadLetter { retry_count, .. } if retry_count == MAX_RETRIES),
        "Expected dead letter, got {:?}",
        outcome
    );
    assert!(store.records().is_empty());
    assert_eq!(broker.acked(), vec![3]);
    assert!(broker.published_to(MAIN_QUEUE).is_empty(), "No further requeue");

    let dead_letters = broker.published_to(DEAD_LETTER_QUEUE);
    assert_eq!(dead_letters.len(), 1);
    assert_eq!(dead_letters[0].payload, payload, "DLQ body must be verbatim");

    let reason = header_str(&dead_letters[0].headers, FAILURE_REASON_HEADER)
        .ok_or_else(|| anyhow!("missing failure reason header"))?;
    assert!(reason.contains("Database write failed"));
    assert!(header_str(&dead_letters[0].headers, FAILED_AT_HEADER).is_some());

    Ok(())
}

/// Test: Unknown event types are acknowledged without any side effect
#[tokio::test]
async fn test_unknown_event_type_is_acknowledged() -> Result<()> {
    let (delivery_loop, store, broker) =
        delivery_loop(MemoryNotificationStore::new(), MemoryBroker::new());

    let outcome = delivery_loop
        .handle(InboundMessage::new(
            11,
            br#"{"type":"unknown.thing","payload":{}}"#.to_vec(),
            0,
        ))
        .await;

    assert_eq!(outcome, DeliveryOutcome::Processed { records: 0 });
    assert_eq!(store.attempts(), 0, "No persistence call expected");
    assert_eq!(broker.acked(), vec![11]);
    assert!(broker.published().is_empty());

    Ok(())
}

/// Test: Bytes that are not an event are dropped, not retried
#[tokio::test]
async fn test_malformed_body_is_discarded() -> Result<()> {
    let (delivery_loop, store, broker) =
        delivery_loop(MemoryNotificationStore::new(), MemoryBroker::new());

    for (tag, body) in [
        (1, b"{ invalid json }".to_vec()),
        (2, Vec::new()),
        (3, br#"{"payload":{}}"#.to_vec()),
        (4, br#"{"type":"transaction.deposit","payload":{"txn":"A1"}}"#.to_vec()),
    ] {
        let outcome = delivery_loop.handle(InboundMessage::new(tag, body, 0)).await;
        assert!(
            matches!(outcome, DeliveryOutcome::Discarded { .. }),
            "Message {} should be discarded, got {:?}",
            tag,
            outcome
        );
    }

    assert_eq!(store.attempts(), 0);
    assert_eq!(broker.acked(), vec![1, 2, 3, 4]);
    assert!(broker.published().is_empty());

    Ok(())
}

/// Test: A non-numeric amount is a message defect, not a database outage
#[tokio::test]
async fn test_non_decimal_amount_is_discarded() -> Result<()> {
    let (delivery_loop, store, broker) =
        delivery_loop(MemoryNotificationStore::new(), MemoryBroker::new());

    let bodies = [
        br#"{"type":"transaction.deposit","payload":{"txn":{"account_id":"A1","amount":"abc"}}}"#.to_vec(),
        br#"{"type":"transaction.withdraw","payload":{"txn":{"account_id":"A1","amount":""}}}"#.to_vec(),
        br#"{"type":"transaction.failed","payload":{"account_id":"A1","amount":"1e3","txn_type":"deposit"}}"#.to_vec(),
    ];

    for (tag, body) in (1u64..).zip(bodies) {
        let outcome = delivery_loop.handle(InboundMessage::new(tag, body, 0)).await;
        assert!(
            matches!(outcome, DeliveryOutcome::Discarded { .. }),
            "Message {} should be discarded, got {:?}",
            tag,
            outcome
        );
    }

    assert_eq!(store.attempts(), 0);
    assert_eq!(broker.acked(), vec![1, 2, 3]);
    assert!(broker.published().is_empty());

    Ok(())
}

/// Test: Events missing required fields are acknowledged as successful
#[tokio::test]
async fn test_missing_fields_are_acknowledged_without_retry() -> Result<()> {
    let (delivery_loop, store, broker) =
        delivery_loop(MemoryNotificationStore::failing(), MemoryBroker::new());

    let outcome = delivery_loop
        .handle(InboundMessage::new(
            5,
            br#"{"type":"transaction.transfer","payload":{"debitTxn":{"account_id":"A1","amount":5}}}"#
                .to_vec(),
            0,
        ))
        .await;

    assert_eq!(outcome, DeliveryOutcome::Processed { records: 0 });
    assert_eq!(store.attempts(), 0);
    assert_eq!(broker.acked(), vec![5]);
    assert!(broker.published().is_empty());

    Ok(())
}

/// Test: Each failure republishes with the counter raised by one
#[tokio::test]
async fn test_failed_dispatch_requeues_with_incremented_retry() -> Result<()> {
    let (delivery_loop, _store, broker) =
        delivery_loop(MemoryNotificationStore::failing(), MemoryBroker::new());

    let payload = deposit_payload("A9", 20);

    for retry in 0..MAX_RETRIES {
        let outcome = delivery_loop
            .handle(InboundMessage::new(u64::from(retry), payload.clone(), retry))
            .await;

        assert!(
            matches!(outcome, DeliveryOutcome::Requeue { retry_count, .. } if retry_count == retry + 1),
            "Attempt with x-retry={} should requeue, got {:?}",
            retry,
            outcome
        );
    }

    let requeued = broker.published_to(MAIN_QUEUE);
    let counters: Vec<u32> = requeued.iter().map(|m| m.retry_count()).collect();
    assert_eq!(counters, vec![1, 2, 3, 4, 5]);
    assert!(requeued.iter().all(|m| m.payload == payload));
    assert_eq!(broker.acked(), vec![0, 1, 2, 3, 4]);
    assert!(broker.published_to(DEAD_LETTER_QUEUE).is_empty());

    Ok(())
}

/// Test: Feeding each requeued copy back in ends in exactly one DLQ entry
#[tokio::test]
async fn test_retry_chain_ends_in_dead_letter_queue() -> Result<()> {
    let (delivery_loop, store, broker) =
        delivery_loop(MemoryNotificationStore::failing(), MemoryBroker::new());

    let mut message = InboundMessage::new(0, deposit_payload("A1", 100), 0);
    let mut attempts = 0;

    loop {
        attempts += 1;
        match delivery_loop.handle(message.clone()).await {
            DeliveryOutcome::Requeue { .. } => {
                let copy = broker
                    .published_to(MAIN_QUEUE)
                    .pop()
                    .ok_or_else(|| anyhow!("requeue did not publish"))?;
                let retry = copy.retry_count();
                message = InboundMessage::new(attempts, copy.payload, retry);
            }
            DeliveryOutcome::DeadLetter { .. } => break,
            other => return Err(anyhow!("unexpected outcome {:?}", other)),
        }
    }

    assert_eq!(attempts, u64::from(MAX_RETRIES) + 1);
    assert_eq!(store.attempts(), MAX_RETRIES as usize + 1);
    assert_eq!(broker.published_to(DEAD_LETTER_QUEUE).len(), 1);
    assert_eq!(broker.acked().len(), MAX_RETRIES as usize + 1);

    Ok(())
}

/// Test: A transfer failing on its second write is retried as a whole
#[tokio::test]
async fn test_partial_transfer_is_retried_whole() -> Result<()> {
    let (delivery_loop, store, broker) =
        delivery_loop(MemoryNotificationStore::failing_after(1), MemoryBroker::new());

    let payload = transfer_payload("A1", "A2", 50);
    let outcome = delivery_loop
        .handle(InboundMessage::new(9, payload.clone(), 0))
        .await;

    assert!(matches!(outcome, DeliveryOutcome::Requeue { retry_count: 1, .. }));

    // The debit side stays written; a retry may write it again.
    let records = store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event_type, NotificationKind::TransferOut);

    let requeued = broker.published_to(MAIN_QUEUE);
    assert_eq!(requeued.len(), 1);
    assert_eq!(requeued[0].payload, payload);
    assert_eq!(broker.acked(), vec![9]);

    Ok(())
}

/// Test: When the republish fails the original goes back to the broker
#[tokio::test]
async fn test_failed_republish_returns_message_to_broker() -> Result<()> {
    let (delivery_loop, _store, broker) = delivery_loop(
        MemoryNotificationStore::failing(),
        MemoryBroker::rejecting_publish(),
    );

    let requeue = delivery_loop
        .handle(InboundMessage::new(21, deposit_payload("A1", 1), 0))
        .await;
    let dead_letter = delivery_loop
        .handle(InboundMessage::new(22, deposit_payload("A1", 1), MAX_RETRIES))
        .await;

    assert!(matches!(requeue, DeliveryOutcome::Requeue { .. }));
    assert!(matches!(dead_letter, DeliveryOutcome::DeadLetter { .. }));
    assert!(broker.acked().is_empty(), "Original must not be acked");
    assert_eq!(broker.requeued(), vec![21, 22]);

    Ok(())
}

/// Test: The decision step alone maps dispatch results onto outcomes
#[tokio::test]
async fn test_policy_decisions() -> Result<()> {
    let policy = test_policy();

    assert_eq!(
        policy.decide(0, &Ok(2)),
        DeliveryOutcome::Processed { records: 2 }
    );
    assert_eq!(
        policy.decide(4, &Err(anyhow!("down"))),
        DeliveryOutcome::Requeue {
            retry_count: 5,
            reason: "down".to_string()
        }
    );
    assert_eq!(
        policy.decide(5, &Err(anyhow!("down"))),
        DeliveryOutcome::DeadLetter {
            retry_count: 5,
            reason: "down".to_string()
        }
    );
    assert_eq!(
        policy.decide(9, &Err(anyhow!("down"))),
        DeliveryOutcome::DeadLetter {
            retry_count: 9,
            reason: "down".to_string()
        }
    );

    Ok(())
}

/// Test: Concurrent handlers share the store and broker without interference
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_handlers_all_settle() -> Result<()> {
    let (delivery_loop, store, broker) =
        delivery_loop(MemoryNotificationStore::new(), MemoryBroker::new());

    let handles: Vec<_> = (0..50u64)
        .map(|tag| {
            let worker = Arc::clone(&delivery_loop);
            tokio::spawn(async move {
                worker
                    .handle(InboundMessage::new(
                        tag,
                        deposit_payload(&format!("acct_{}", tag), tag as i64 + 1),
                        0,
                    ))
                    .await
            })
        })
        .collect();

    let outcomes = futures_util::future::join_all(handles).await;
    for outcome in outcomes {
        assert_eq!(outcome?, DeliveryOutcome::Processed { records: 1 });
    }

    let mut acked = broker.acked();
    acked.sort_unstable();
    assert_eq!(acked, (0..50u64).collect::<Vec<_>>());
    assert_eq!(store.records().len(), 50);

    Ok(())
}

/// Test: Consumer errors are skipped and the end of the stream is reported
#[tokio::test]
async fn test_run_skips_stream_errors_and_fails_on_stream_end() -> Result<()> {
    let (delivery_loop, store, broker) =
        delivery_loop(MemoryNotificationStore::new(), MemoryBroker::new());

    let deliveries = stream::iter(vec![
        Err::<Delivery, &str>("connection reset"),
        Err("channel closed"),
    ]);

    let result = Arc::clone(&delivery_loop).run(deliveries).await;

    let error = tokio_test::assert_err!(result);
    assert!(error.to_string().contains(MAIN_QUEUE));
    assert_eq!(store.attempts(), 0);
    assert!(broker.acked().is_empty());
    assert!(broker.requeued().is_empty());

    Ok(())
}

/// Test: An empty consumer stream ends the loop with an error
#[tokio::test]
async fn test_run_returns_error_when_consumer_is_cancelled() {
    let (delivery_loop, _, _) = delivery_loop(MemoryNotificationStore::new(), MemoryBroker::new());

    let result = delivery_loop
        .run(stream::empty::<Result<Delivery, String>>())
        .await;

    assert!(result.is_err());
}
