use std::sync::Arc;

use notification_dispatcher::{
    config::{Config, DEAD_LETTER_QUEUE, MAIN_QUEUE, MAX_RETRIES},
    consumer::DeliveryLoop,
    models::delivery::RetryPolicy,
    testing::{MemoryBroker, MemoryNotificationStore},
};
use serde_json::json;

pub type TestLoop = DeliveryLoop<Arc<MemoryNotificationStore>, Arc<MemoryBroker>>;

pub fn test_policy() -> RetryPolicy {
    RetryPolicy {
        main_queue: MAIN_QUEUE.to_string(),
        dlq_name: DEAD_LETTER_QUEUE.to_string(),
        max_retries: MAX_RETRIES,
    }
}

pub fn test_config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
    Config::from_vars(
        vars.iter()
            .map(|(key, value)| (key.to_string(), value.to_string())),
    )
}

pub fn delivery_loop(
    store: MemoryNotificationStore,
    broker: MemoryBroker,
) -> (Arc<TestLoop>, Arc<MemoryNotificationStore>, Arc<MemoryBroker>) {
    let store = Arc::new(store);
    let broker = Arc::new(broker);
    let delivery_loop = Arc::new(DeliveryLoop::new(
        Arc::clone(&store),
        Arc::clone(&broker),
        test_policy(),
    ));

    (delivery_loop, store, broker)
}

pub fn deposit_payload(account_id: &str, amount: i64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": "transaction.deposit",
        "payload": { "txn": { "account_id": account_id, "amount": amount } }
    }))
    .unwrap()
}

pub fn transfer_payload(from: &str, to: &str, amount: i64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": "transaction.transfer",
        "payload": {
            "debitTxn": { "account_id": from, "amount": amount },
            "creditTxn": { "account_id": to, "amount": amount }
        }
    }))
    .unwrap()
}
