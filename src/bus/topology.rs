//! Broker routing fabric.
//!
//! One durable direct exchange per event type, all bound to a single durable
//! work queue under the event type as routing key. A retry queue with no
//! bindings dead-letters expired messages back into the work queue, and a
//! terminal dead-letter queue collects messages that ran out of retries.

use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable},
    Channel, ExchangeKind,
};
use tracing::{debug, info};

use super::{BusError, Result};
use crate::config::AmqpConfig;
use crate::events::EventType;

/// Exchange for `event_type`: `<prefix>.<event_type>`, or just the event type
/// when the prefix is blank.
pub fn exchange_name(prefix: &str, event_type: &str) -> String {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        event_type.to_string()
    } else {
        format!("{}.{}", prefix, event_type)
    }
}

/// Names of everything the audit pipeline declares on the broker.
#[derive(Debug, Clone)]
pub struct Topology {
    exchange_prefix: String,
    audit_queue: String,
    retry_queue: String,
    dead_letter_queue: String,
    event_types: Vec<EventType>,
}

impl Topology {
    /// Topology covering every recognised event type.
    pub fn from_config(config: &AmqpConfig) -> Self {
        Self {
            exchange_prefix: config.exchange_prefix.clone(),
            audit_queue: config.audit_queue.clone(),
            retry_queue: config.retry_queue.clone(),
            dead_letter_queue: config.dead_letter_queue.clone(),
            event_types: EventType::ALL.to_vec(),
        }
    }

    /// Restrict the work queue bindings to a subset of event types.
    pub fn with_event_types(mut self, event_types: impl IntoIterator<Item = EventType>) -> Self {
        self.event_types = event_types.into_iter().collect();
        self
    }

    pub fn audit_queue(&self) -> &str {
        &self.audit_queue
    }

    pub fn retry_queue(&self) -> &str {
        &self.retry_queue
    }

    pub fn dead_letter_queue(&self) -> &str {
        &self.dead_letter_queue
    }

    pub fn exchange_for(&self, event_type: EventType) -> String {
        exchange_name(&self.exchange_prefix, event_type.as_str())
    }

    /// `(exchange, routing_key)` pairs bound to the work queue.
    pub fn bindings(&self) -> Vec<(String, String)> {
        self.event_types
            .iter()
            .map(|event_type| (self.exchange_for(*event_type), event_type.as_str().to_string()))
            .collect()
    }

    /// Arguments that turn the retry queue into a delay line: expired
    /// messages go through the default exchange back to the work queue.
    pub fn retry_queue_arguments(&self) -> FieldTable {
        let mut arguments = FieldTable::default();
        arguments.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString("".into()),
        );
        arguments.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(self.audit_queue.as_str().into()),
        );
        arguments
    }

    /// Declare queues, exchanges and bindings. Safe to repeat.
    pub async fn declare(&self, channel: &Channel) -> Result<()> {
        let durable = QueueDeclareOptions {
            durable: true,
            ..Default::default()
        };

        channel
            .queue_declare(&self.audit_queue, durable, FieldTable::default())
            .await
            .map_err(|e| BusError::Topology(format!("Failed to declare work queue: {}", e)))?;

        channel
            .queue_declare(&self.retry_queue, durable, self.retry_queue_arguments())
            .await
            .map_err(|e| BusError::Topology(format!("Failed to declare retry queue: {}", e)))?;

        channel
            .queue_declare(&self.dead_letter_queue, durable, FieldTable::default())
            .await
            .map_err(|e| {
                BusError::Topology(format!("Failed to declare dead-letter queue: {}", e))
            })?;

        for (exchange, routing_key) in self.bindings() {
            channel
                .exchange_declare(
                    &exchange,
                    ExchangeKind::Direct,
                    ExchangeDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    BusError::Topology(format!("Failed to declare exchange {}: {}", exchange, e))
                })?;

            channel
                .queue_bind(
                    &self.audit_queue,
                    &exchange,
                    &routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    BusError::Topology(format!("Failed to bind {} to work queue: {}", exchange, e))
                })?;

            debug!(exchange = %exchange, queue = %self.audit_queue, "Bound exchange");
        }

        info!(
            queue = %self.audit_queue,
            retry_queue = %self.retry_queue,
            dead_letter_queue = %self.dead_letter_queue,
            exchanges = self.event_types.len(),
            "Declared audit topology"
        );

        Ok(())
    }
}
