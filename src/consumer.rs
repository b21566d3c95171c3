//! The delivery loop: decode, dispatch, then settle each message with the
//! broker as processed, discarded, requeued or dead-lettered.

use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::{
    dispatcher::dispatch,
    models::{
        delivery::{DeliveryOutcome, InboundMessage, RetryPolicy},
        event::TransactionEvent,
    },
    traits::{MessageBroker, NotificationStore},
    utils::{dead_letter_headers, retry_headers},
};

pub struct DeliveryLoop<S, B> {
    store: S,
    broker: B,
    policy: RetryPolicy,
}

impl<S, B> DeliveryLoop<S, B>
where
    S: NotificationStore + 'static,
    B: MessageBroker + 'static,
{
    pub fn new(store: S, broker: B, policy: RetryPolicy) -> Self {
        Self {
            store,
            broker,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decides what should happen to a message without touching the broker.
    pub async fn process(&self, message: &InboundMessage) -> DeliveryOutcome {
        let event = match TransactionEvent::decode(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                error!(
                    delivery_tag = message.delivery_tag,
                    error = %e,
                    "Dropping undecodable message"
                );
                return DeliveryOutcome::Discarded {
                    reason: e.to_string(),
                };
            }
        };

        let dispatched = dispatch(&event, &self.store).await;

        if let Err(e) = &dispatched {
            error!(
                event_type = event.event_type(),
                attempt = message.retry_count + 1,
                error = %e,
                "Failed to process event"
            );
        }

        self.policy.decide(message.retry_count, &dispatched)
    }

    /// Carries out `outcome` against the broker. The original delivery is
    /// acknowledged exactly once, after any republish has gone out.
    pub async fn settle(
        &self,
        message: &InboundMessage,
        outcome: &DeliveryOutcome,
    ) -> Result<(), Error> {
        let published = match outcome {
            DeliveryOutcome::Processed { .. } | DeliveryOutcome::Discarded { .. } => Ok(()),
            DeliveryOutcome::Requeue { retry_count, .. } => {
                self.publish_retry(message, *retry_count).await
            }
            DeliveryOutcome::DeadLetter {
                retry_count,
                reason,
            } => self.publish_dead_letter(message, *retry_count, reason).await,
        };

        if let Err(e) = published {
            // Without the copy the original is the only record of the
            // event, so hand it back to the broker untouched.
            error!(
                delivery_tag = message.delivery_tag,
                error = %e,
                "Republish failed, returning message to the broker"
            );
            return self.broker.requeue(message.delivery_tag).await;
        }

        self.broker.acknowledge(message.delivery_tag).await
    }

    async fn publish_retry(&self, message: &InboundMessage, retry_count: u32) -> Result<(), Error> {
        self.broker
            .publish(
                &self.policy.main_queue,
                &message.payload,
                retry_headers(retry_count),
            )
            .await?;

        info!(retry_count, "Requeued event for retry");

        Ok(())
    }

    async fn publish_dead_letter(
        &self,
        message: &InboundMessage,
        retry_count: u32,
        reason: &str,
    ) -> Result<(), Error> {
        self.broker
            .publish(
                &self.policy.dlq_name,
                &message.payload,
                dead_letter_headers(retry_count, reason, Utc::now()),
            )
            .await?;

        warn!(
            retry_count,
            dlq = %self.policy.dlq_name,
            reason = %reason,
            "Max retries reached, event sent to dead-letter queue"
        );

        Ok(())
    }

    pub async fn handle(&self, message: InboundMessage) -> DeliveryOutcome {
        let outcome = self.process(&message).await;

        debug!(
            delivery_tag = message.delivery_tag,
            outcome = %outcome,
            "Settling delivery"
        );

        if let Err(e) = self.settle(&message, &outcome).await {
            error!(
                delivery_tag = message.delivery_tag,
                outcome = %outcome,
                error = %e,
                "Failed to settle delivery"
            );
        }

        outcome
    }

    /// Drains `deliveries`, handling each one on its own task. Returns only
    /// when the stream ends, which means the consumer was cancelled or the
    /// connection went away.
    pub async fn run<D, E>(self: Arc<Self>, mut deliveries: D) -> Result<(), Error>
    where
        D: Stream<Item = Result<lapin::message::Delivery, E>> + Unpin,
        E: std::fmt::Display,
    {
        info!(queue = %self.policy.main_queue, "Delivery loop started");

        while let Some(delivery) = deliveries.next().await {
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(e) => {
                    warn!(error = %e, "Consumer returned an error instead of a delivery");
                    continue;
                }
            };

            let worker = Arc::clone(&self);
            tokio::spawn(async move {
                worker.handle(InboundMessage::from(delivery)).await;
            });
        }

        Err(anyhow!("Consumer stream for {} closed", self.policy.main_queue))
    }
}
