//! In-memory stand-ins for the database and the broker, so the delivery loop
//! can be driven without external services.

use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use lapin::types::FieldTable;

use crate::{
    models::notification::NotificationRecord,
    traits::{MessageBroker, NotificationStore},
    utils::retry_count,
};

/// Stores records in a `Vec`. Can be told to start failing after a number of
/// successful inserts to simulate the database going away mid-event.
pub struct MemoryNotificationStore {
    records: Mutex<Vec<NotificationRecord>>,
    attempts: AtomicUsize,
    fail_after: Option<usize>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            fail_after: None,
        }
    }

    pub fn failing() -> Self {
        Self::failing_after(0)
    }

    /// Accepts `successes` inserts, then rejects every one after.
    pub fn failing_after(successes: usize) -> Self {
        Self {
            fail_after: Some(successes),
            ..Self::new()
        }
    }

    pub fn records(&self) -> Vec<NotificationRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Insert calls seen, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Default for MemoryNotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, record: &NotificationRecord) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.fail_after.is_some_and(|limit| attempt >= limit) {
            return Err(anyhow!("Database write failed: connection refused"));
        }

        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub queue: String,
    pub payload: Vec<u8>,
    pub headers: FieldTable,
}

impl PublishedMessage {
    pub fn retry_count(&self) -> u32 {
        retry_count(Some(&self.headers))
    }
}

/// Records every broker operation. Publishing can be switched off to
/// exercise the nack path.
#[derive(Default)]
pub struct MemoryBroker {
    acked: Mutex<Vec<u64>>,
    requeued: Mutex<Vec<u64>>,
    published: Mutex<Vec<PublishedMessage>>,
    reject_publish: bool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting_publish() -> Self {
        Self {
            reject_publish: true,
            ..Self::default()
        }
    }

    pub fn acked(&self) -> Vec<u64> {
        self.acked.lock().unwrap().clone()
    }

    pub fn requeued(&self) -> Vec<u64> {
        self.requeued.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_to(&self, queue: &str) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|message| message.queue == queue)
            .collect()
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn acknowledge(&self, delivery_tag: u64) -> Result<()> {
        self.acked.lock().unwrap().push(delivery_tag);
        Ok(())
    }

    async fn requeue(&self, delivery_tag: u64) -> Result<()> {
        self.requeued.lock().unwrap().push(delivery_tag);
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8], headers: FieldTable) -> Result<()> {
        if self.reject_publish {
            return Err(anyhow!("Failed to publish message to {}: channel closed", queue));
        }

        self.published.lock().unwrap().push(PublishedMessage {
            queue: queue.to_string(),
            payload: payload.to_vec(),
            headers,
        });
        Ok(())
    }
}
