use std::fmt::{Display, Formatter, Result};

use lapin::message::Delivery;

use crate::{config::Config, utils::retry_count};

/// A message as handed to the delivery loop, with the retry counter lifted
/// out of the transport headers.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub delivery_tag: u64,
    pub payload: Vec<u8>,
    pub retry_count: u32,
}

impl InboundMessage {
    pub fn new(delivery_tag: u64, payload: impl Into<Vec<u8>>, retry_count: u32) -> Self {
        Self {
            delivery_tag,
            payload: payload.into(),
            retry_count,
        }
    }
}

impl From<Delivery> for InboundMessage {
    fn from(delivery: Delivery) -> Self {
        let retry_count = retry_count(delivery.properties.headers().as_ref());

        Self {
            delivery_tag: delivery.delivery_tag,
            payload: delivery.data,
            retry_count,
        }
    }
}

/// Terminal decision for one delivery. Every variant ends with the original
/// delivery acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Dispatched; `records` notifications were written.
    Processed { records: usize },
    /// Permanent defect in the message itself.
    Discarded { reason: String },
    /// Republish to the main queue carrying `retry_count`.
    Requeue { retry_count: u32, reason: String },
    /// Retries exhausted; move the payload to the dead-letter queue.
    DeadLetter { retry_count: u32, reason: String },
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Processed { .. } => "acked_success",
            DeliveryOutcome::Discarded { .. } => "discarded",
            DeliveryOutcome::Requeue { .. } => "requeued",
            DeliveryOutcome::DeadLetter { .. } => "dead_lettered",
        }
    }
}

impl Display for DeliveryOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub main_queue: String,
    pub dlq_name: String,
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            main_queue: config.main_queue.clone(),
            dlq_name: config.dlq_name.clone(),
            max_retries: config.max_retries,
        }
    }

    /// Chooses between requeue and dead-letter after a failed dispatch.
    pub fn on_failure(&self, retry_count: u32, reason: String) -> DeliveryOutcome {
        if retry_count < self.max_retries {
            DeliveryOutcome::Requeue {
                retry_count: retry_count + 1,
                reason,
            }
        } else {
            DeliveryOutcome::DeadLetter {
                retry_count,
                reason,
            }
        }
    }

    pub fn decide(
        &self,
        retry_count: u32,
        dispatched: &anyhow::Result<usize>,
    ) -> DeliveryOutcome {
        match dispatched {
            Ok(records) => DeliveryOutcome::Processed { records: *records },
            Err(e) => self.on_failure(retry_count, e.to_string()),
        }
    }
}
