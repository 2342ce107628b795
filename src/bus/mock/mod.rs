//! Mock broker implementations for testing.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BusError, EventPublisher, MessageChannel, OutgoingProperties, Result};
use crate::events::{DomainEvent, EventEnvelope};

/// A message captured by [`MockChannel::publish`].
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub properties: OutgoingProperties,
}

/// Mock channel for testing.
#[derive(Default)]
pub struct MockChannel {
    published: RwLock<Vec<PublishedMessage>>,
    acked: RwLock<Vec<u64>>,
    fail_on_publish: RwLock<bool>,
    fail_on_ack: RwLock<bool>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    pub async fn set_fail_on_ack(&self, fail: bool) {
        *self.fail_on_ack.write().await = fail;
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.read().await.clone()
    }

    /// Messages published with `queue` as routing key on the default exchange.
    pub async fn published_to(&self, queue: &str) -> Vec<PublishedMessage> {
        self.published
            .read()
            .await
            .iter()
            .filter(|message| message.exchange.is_empty() && message.routing_key == queue)
            .cloned()
            .collect()
    }

    pub async fn acked(&self) -> Vec<u64> {
        self.acked.read().await.clone()
    }

    pub async fn take_published(&self) -> Vec<PublishedMessage> {
        std::mem::take(&mut *self.published.write().await)
    }
}

#[async_trait]
impl MessageChannel for MockChannel {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: OutgoingProperties,
    ) -> Result<()> {
        if *self.fail_on_publish.read().await {
            return Err(BusError::Publish("Mock publish failure".to_string()));
        }
        self.published.write().await.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.to_vec(),
            properties,
        });
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        if *self.fail_on_ack.read().await {
            return Err(BusError::Ack("Mock ack failure".to_string()));
        }
        self.acked.write().await.push(delivery_tag);
        Ok(())
    }
}

/// Mock event publisher for testing.
#[derive(Default)]
pub struct MockEventPublisher {
    published: RwLock<Vec<EventEnvelope>>,
    fail_on_publish: RwLock<bool>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn take_published(&self) -> Vec<EventEnvelope> {
        std::mem::take(&mut *self.published.write().await)
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        if *self.fail_on_publish.read().await {
            return Err(BusError::Connection("Mock publish failure".to_string()));
        }
        let envelope = EventEnvelope::from_event(event)?;
        self.published.write().await.push(envelope);
        Ok(())
    }
}
