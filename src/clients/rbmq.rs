use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, QueueDeclareOptions,
    },
    types::FieldTable,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{config::Config, traits::MessageBroker};

const PERSISTENT: u8 = 2;

/// Owns the one channel every handler publishes and acknowledges through.
/// The connection is kept alongside so it is not dropped while the channel
/// is in use.
pub struct RabbitMqClient {
    _connection: Connection,
    channel: Channel,
    main_queue: String,
    dlq_name: String,
}

impl RabbitMqClient {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ");

        let connection = Connection::connect(&config.rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        debug!("RabbitMQ connection established");

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set up QoS: {}", e))?;

        debug!(prefetch_count = config.prefetch_count, "Prefetch count set");

        // Republished copies must be confirmed before the original is acked.
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to enable publisher confirms: {}", e))?;

        let client = Self {
            _connection: connection,
            channel,
            main_queue: config.main_queue.clone(),
            dlq_name: config.dlq_name.clone(),
        };

        client.declare_queues().await?;

        Ok(client)
    }

    /// Declares the main queue and the dead-letter queue as durable. Safe to
    /// repeat: redeclaring with the same arguments is a no-op on the broker.
    pub async fn declare_queues(&self) -> Result<(), Error> {
        for queue in [&self.main_queue, &self.dlq_name] {
            self.channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| anyhow!("Failed to declare queue {}: {}", queue, e))?;

            debug!(queue = %queue, "Queue declared");
        }

        Ok(())
    }

    /// Starts a manual-ack consumer on the main queue.
    pub async fn create_consumer(&self) -> Result<Consumer, Error> {
        let consumer_tag = format!("notification_dispatcher_{}", Uuid::new_v4());

        let consumer = self
            .channel
            .basic_consume(
                &self.main_queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create consumer: {}", e))?;

        info!(queue = %self.main_queue, consumer_tag = %consumer_tag, "Listening for events");

        Ok(consumer)
    }

    pub async fn message_count(&self, queue: &str) -> Result<u32, Error> {
        let declared = self
            .channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to inspect queue {}: {}", queue, e))?;

        Ok(declared.message_count())
    }

    pub fn main_queue(&self) -> &str {
        &self.main_queue
    }

    pub fn dlq_name(&self) -> &str {
        &self.dlq_name
    }
}

#[async_trait]
impl MessageBroker for RabbitMqClient {
    async fn acknowledge(&self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to acknowledge message: {}", e))?;

        Ok(())
    }

    async fn requeue(&self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue: true,
                },
            )
            .await
            .map_err(|e| anyhow!("Failed to requeue message: {}", e))?;

        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8], headers: FieldTable) -> Result<()> {
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(PERSISTENT)
            .with_headers(headers);

        let confirmation = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| anyhow!("Failed to publish message to {}: {}", queue, e))?
            .await
            .map_err(|e| anyhow!("Publish to {} was not confirmed: {}", queue, e))?;

        if confirmation.is_nack() {
            return Err(anyhow!("Broker rejected message for {}", queue));
        }

        Ok(())
    }
}
