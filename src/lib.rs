//! Consumes transaction-lifecycle events from RabbitMQ and records a
//! human-readable notification for each one.
//!
//! Failed deliveries are republished with an incremented `x-retry` header
//! and moved to the dead-letter queue once the retry ceiling is reached.

pub mod api;
pub mod clients;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod models;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod traits;
pub mod utils;
