//! Workforce audit pipeline.
//!
//! Domain services publish one event per committed state change; the audit
//! consumer drains those events from RabbitMQ and upserts a content-addressed
//! audit record per message into MongoDB, with bounded retry and a
//! dead-letter queue for poison messages.

pub mod audit;
pub mod bus;
pub mod config;
pub mod consumer;
pub mod events;
pub mod storage;
pub mod utils;
