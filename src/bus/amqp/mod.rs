//! AMQP (RabbitMQ) adapters.
//!
//! `AmqpEventPublisher` routes envelopes through one direct exchange per
//! event type. `AmqpChannel` is the consumer's single-writer handle for
//! acks and republishes.

use async_trait::async_trait;
use deadpool_lapin::{Manager, Pool, PoolError};
use lapin::{
    options::{BasicAckOptions, BasicPublishOptions, ExchangeDeclareOptions},
    types::{FieldTable, LongString},
    Channel, ConnectionProperties, ExchangeKind,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::topology::exchange_name;
use super::{BusError, EventPublisher, MessageChannel, OutgoingProperties, Result};
use crate::config::AmqpConfig;
use crate::events::{DomainEvent, EventEnvelope};

/// Reply code for a normal channel close.
const REPLY_SUCCESS: u16 = 200;

/// Connection properties carrying the configured client connection name.
pub fn connection_properties(config: &AmqpConfig) -> ConnectionProperties {
    let properties = ConnectionProperties::default();
    match &config.connection_name {
        Some(name) => properties.with_connection_name(LongString::from(name.as_str())),
        None => properties,
    }
}

/// Build a connection pool for the configured broker.
pub fn create_pool(config: &AmqpConfig) -> Result<Pool> {
    let manager = Manager::new(config.url(), connection_properties(config));
    Pool::builder(manager)
        .max_size(10)
        .build()
        .map_err(|e| BusError::Connection(format!("Failed to create pool: {}", e)))
}

/// Consumer-side channel handle.
///
/// lapin channels must not be driven from two call sites at once; every
/// publish and ack goes through the mutex.
pub struct AmqpChannel {
    channel: Mutex<Channel>,
}

impl AmqpChannel {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel: Mutex::new(channel),
        }
    }

    /// Close the channel. Unacked deliveries are returned to the queue.
    pub async fn close(&self) -> Result<()> {
        let channel = self.channel.lock().await;
        channel
            .close(REPLY_SUCCESS, "Bye")
            .await
            .map_err(|e| BusError::Connection(format!("Failed to close channel: {}", e)))
    }
}

#[async_trait]
impl MessageChannel for AmqpChannel {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: OutgoingProperties,
    ) -> Result<()> {
        let channel = self.channel.lock().await;
        let confirm = channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties.to_basic_properties(),
            )
            .await
            .map_err(|e| BusError::Publish(format!("Failed to publish: {}", e)))?;

        confirm
            .await
            .map_err(|e| BusError::Publish(format!("Publish confirmation failed: {}", e)))?;

        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        let channel = self.channel.lock().await;
        channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| BusError::Ack(format!("Failed to ack {}: {}", delivery_tag, e)))
    }
}

/// Publishes domain events to RabbitMQ.
///
/// Events go to the exchange `<prefix>.<EventType>` with the event type as
/// routing key, persistent, as JSON envelopes. There are no retries; a
/// failure is returned to the caller.
pub struct AmqpEventPublisher {
    pool: Pool,
    exchange_prefix: String,
}

impl AmqpEventPublisher {
    /// Create a publisher with its own connection pool.
    pub fn new(config: &AmqpConfig) -> Result<Self> {
        let pool = create_pool(config)?;
        info!(
            url = %config.redacted_url(),
            exchange_prefix = %config.exchange_prefix,
            "AMQP publisher configured"
        );
        Ok(Self::from_pool(pool, config.exchange_prefix.clone()))
    }

    pub fn from_pool(pool: Pool, exchange_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            exchange_prefix: exchange_prefix.into(),
        }
    }

    /// Get a channel from the pool.
    async fn get_channel(&self) -> Result<Channel> {
        let conn = self.pool.get().await.map_err(|e: PoolError| {
            BusError::Connection(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to create channel: {}", e)))
    }

    async fn publish_on(
        channel: &Channel,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<()> {
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Topology(format!("Failed to declare exchange: {}", e)))?;

        let properties = OutgoingProperties::default().to_basic_properties();
        channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
            .map_err(|e| BusError::Publish(format!("Failed to publish: {}", e)))?
            .await
            .map_err(|e| BusError::Publish(format!("Publish confirmation failed: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(event_type = %event.event_type()))]
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        let envelope = EventEnvelope::from_event(event)?;
        let body = envelope.to_bytes()?;
        let exchange = exchange_name(&self.exchange_prefix, &envelope.event_type);

        let channel = self.get_channel().await?;
        let result = Self::publish_on(&channel, &exchange, &envelope.event_type, &body).await;

        if let Err(e) = channel.close(REPLY_SUCCESS, "Bye").await {
            debug!(error = %e, "Failed to close publish channel");
        }

        match &result {
            Ok(()) => debug!(exchange = %exchange, "Published event"),
            Err(e) => error!(exchange = %exchange, error = %e, "Failed to publish event"),
        }
        result
    }
}
