use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

use crate::{models::notification::NotificationRecord, traits::NotificationStore};

const CREATE_NOTIFICATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS notifications (
        id BIGSERIAL PRIMARY KEY,
        event_type TEXT NOT NULL,
        account_id TEXT NOT NULL,
        amount NUMERIC NOT NULL,
        message TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
"#;

const INSERT_NOTIFICATION: &str = r#"
    INSERT INTO notifications (event_type, account_id, amount, message)
    VALUES ($1, $2, $3::TEXT::NUMERIC, $4)
"#;

/// A single `tokio_postgres` client shared by every in-flight handler;
/// queries issued concurrently are pipelined over the one connection.
pub struct DatabaseClient {
    client: Client,
}

impl DatabaseClient {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }

    pub async fn ensure_schema(&self) -> Result<(), Error> {
        self.client
            .batch_execute(CREATE_NOTIFICATIONS_TABLE)
            .await
            .map_err(|e| anyhow!("Failed to create notifications table: {}", e))?;

        debug!("Notifications table ready");

        Ok(())
    }

    pub async fn log_notification(&self, record: &NotificationRecord) -> Result<(), Error> {
        let event_type = record.event_type.to_string();

        self.client
            .execute(
                INSERT_NOTIFICATION,
                &[
                    &event_type,
                    &record.account_id,
                    &record.amount,
                    &record.message,
                ],
            )
            .await
            .map_err(|e| {
                error!(
                    error = %e,
                    account_id = %record.account_id,
                    event_type = %event_type,
                    "Failed to write notification to database"
                );
                anyhow!("Database write failed: {}", e)
            })?;

        Ok(())
    }
}

#[async_trait]
impl NotificationStore for DatabaseClient {
    async fn insert(&self, record: &NotificationRecord) -> Result<()> {
        self.log_notification(record).await
    }
}
