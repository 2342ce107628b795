//! Broker plumbing for the audit pipeline.
//!
//! This module contains:
//! - `MessageChannel` trait: the publish/ack surface the consumer needs
//! - `EventPublisher` trait: what domain services call after a commit
//! - `Topology`: exchanges and queues the pipeline routes through
//! - Implementations: AMQP (RabbitMQ), Mock

use async_trait::async_trait;
use lapin::types::{FieldTable, ShortString};
use lapin::BasicProperties;

pub mod amqp;
pub mod mock;
pub mod publisher;
pub mod topology;

pub use amqp::{create_pool, AmqpChannel, AmqpEventPublisher};
pub use mock::{MockChannel, MockEventPublisher, PublishedMessage};
pub use publisher::{EventPublisher, PublishFailurePolicy, TolerantPublisher};
pub use topology::{exchange_name, Topology};

/// Content type of every envelope and republished message.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// AMQP delivery mode for messages that survive a broker restart.
const PERSISTENT: u8 = 2;

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Topology declaration failed: {0}")]
    Topology(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Acknowledge failed: {0}")]
    Ack(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One message handed to the consumer by the broker.
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    pub delivery_tag: u64,
    /// Raw message bytes, exactly as received.
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub headers: FieldTable,
}

impl Delivery {
    pub fn new(delivery_tag: u64, body: impl Into<Vec<u8>>) -> Self {
        Self {
            delivery_tag,
            body: body.into(),
            content_type: Some(CONTENT_TYPE_JSON.to_string()),
            headers: FieldTable::default(),
        }
    }

    pub fn with_headers(mut self, headers: FieldTable) -> Self {
        self.headers = headers;
        self
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(delivery: lapin::message::Delivery) -> Self {
        Self {
            delivery_tag: delivery.delivery_tag,
            content_type: delivery
                .properties
                .content_type()
                .as_ref()
                .map(|content_type| content_type.as_str().to_string()),
            headers: delivery.properties.headers().clone().unwrap_or_default(),
            body: delivery.data,
        }
    }
}

/// Properties attached to a message the consumer republishes.
#[derive(Debug, Clone)]
pub struct OutgoingProperties {
    pub content_type: String,
    pub headers: FieldTable,
    /// Per-message TTL; the broker dead-letters the message once it expires.
    pub expiration_ms: Option<u64>,
}

impl Default for OutgoingProperties {
    fn default() -> Self {
        Self {
            content_type: CONTENT_TYPE_JSON.to_string(),
            headers: FieldTable::default(),
            expiration_ms: None,
        }
    }
}

impl OutgoingProperties {
    /// Always persistent. Expiration is sent as decimal milliseconds.
    pub fn to_basic_properties(&self) -> BasicProperties {
        let properties = BasicProperties::default()
            .with_content_type(ShortString::from(self.content_type.clone()))
            .with_delivery_mode(PERSISTENT)
            .with_headers(self.headers.clone());

        match self.expiration_ms {
            Some(ms) => properties.with_expiration(ShortString::from(ms.to_string())),
            None => properties,
        }
    }
}

/// Broker channel operations used while handling a delivery.
///
/// Implementations:
/// - `AmqpChannel`: a lapin channel behind a mutex (single writer)
/// - `MockChannel`: records publishes and acks for testing
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Publish `body` to `exchange` ("" is the default exchange, routing by queue name).
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: OutgoingProperties,
    ) -> Result<()>;

    /// Acknowledge one delivery.
    async fn ack(&self, delivery_tag: u64) -> Result<()>;
}
