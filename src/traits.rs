//! Seams between the delivery loop and its collaborators.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use lapin::types::FieldTable;

use crate::models::notification::NotificationRecord;

/// Append-only sink for notification records.
///
/// Implemented by `DatabaseClient` (postgres) and `MemoryNotificationStore`
/// (tests).
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, record: &NotificationRecord) -> Result<()>;
}

/// The broker operations the delivery loop needs once a message is in hand.
///
/// Implemented by `RabbitMqClient` and `MemoryBroker` (tests).
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn acknowledge(&self, delivery_tag: u64) -> Result<()>;

    /// Negative acknowledgement that hands the delivery back to the broker.
    async fn requeue(&self, delivery_tag: u64) -> Result<()>;

    /// Persistent publish to `queue` through the default exchange.
    async fn publish(&self, queue: &str, payload: &[u8], headers: FieldTable) -> Result<()>;
}

#[async_trait]
impl<S: NotificationStore + ?Sized> NotificationStore for Arc<S> {
    async fn insert(&self, record: &NotificationRecord) -> Result<()> {
        (**self).insert(record).await
    }
}

#[async_trait]
impl<B: MessageBroker + ?Sized> MessageBroker for Arc<B> {
    async fn acknowledge(&self, delivery_tag: u64) -> Result<()> {
        (**self).acknowledge(delivery_tag).await
    }

    async fn requeue(&self, delivery_tag: u64) -> Result<()> {
        (**self).requeue(delivery_tag).await
    }

    async fn publish(&self, queue: &str, payload: &[u8], headers: FieldTable) -> Result<()> {
        (**self).publish(queue, payload, headers).await
    }
}
