//! Audit consumer.
//!
//! Drains the work queue and turns each envelope into one audit record,
//! keyed by the digest of the raw message bytes so redeliveries upsert in
//! place. Failures never escape a delivery: they become a retry or a
//! dead-letter decision made by the [`RetryController`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use crate::audit::AuditLog;
use crate::bus::{Delivery, MessageChannel, Topology};
use crate::config::AmqpConfig;
use crate::events::EventEnvelope;
use crate::storage::{AuditStore, StorageError};
use crate::utils::retry::RetryPolicy;

mod retry;
mod worker;

pub use retry::{read_retry_count, RetryController, RETRY_COUNT_HEADER};
pub use worker::{drain_deliveries, AuditWorker, ConsumerSession, CONSUMER_TAG};

/// Errors raised while processing one delivery.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Processing exceeded {0:?}")]
    Timeout(Duration),
}

impl ProcessError {
    /// Malformed envelopes are discarded; everything else goes through retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProcessError::Malformed(_))
    }
}

/// How a delivery was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Audit record upserted and delivery acknowledged.
    Stored { audit_id: String },
    /// Malformed envelope acknowledged without a write.
    Discarded,
    /// Republished to the retry queue carrying `retry_count`.
    Retried { retry_count: u32, delay: Duration },
    /// Republished to the dead-letter queue after `retry_count` retries.
    DeadLettered { retry_count: u32 },
    /// Settling failed; the broker redelivers once the channel closes.
    Unacknowledged,
}

/// Per-delivery audit pipeline.
pub struct AuditConsumer {
    channel: Arc<dyn MessageChannel>,
    store: Arc<dyn AuditStore>,
    retry: RetryController,
    processing_timeout: Option<Duration>,
}

impl AuditConsumer {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        store: Arc<dyn AuditStore>,
        topology: &Topology,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            channel,
            store,
            retry: RetryController::new(
                policy,
                topology.retry_queue(),
                topology.dead_letter_queue(),
            ),
            processing_timeout: None,
        }
    }

    pub fn from_config(
        channel: Arc<dyn MessageChannel>,
        store: Arc<dyn AuditStore>,
        config: &AmqpConfig,
    ) -> Self {
        Self::new(
            channel,
            store,
            &Topology::from_config(config),
            config.retry_policy(),
        )
        .with_processing_timeout(config.processing_timeout())
    }

    /// Bound parse-and-store time per delivery; expiry takes the retry path.
    pub fn with_processing_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.processing_timeout = timeout;
        self
    }

    /// Process one delivery and settle it. Never returns an error.
    #[tracing::instrument(
        name = "audit.consume",
        skip_all,
        fields(delivery_tag = delivery.delivery_tag, event_type = tracing::field::Empty)
    )]
    pub async fn handle(&self, delivery: &Delivery) -> Outcome {
        let result = match self.processing_timeout {
            Some(limit) => tokio::time::timeout(limit, self.process(delivery))
                .await
                .unwrap_or(Err(ProcessError::Timeout(limit))),
            None => self.process(delivery).await,
        };

        match result {
            Ok(audit_id) => match self.channel.ack(delivery.delivery_tag).await {
                Ok(()) => Outcome::Stored { audit_id },
                Err(e) => {
                    error!(audit_id = %audit_id, error = %e, "Failed to ack stored message");
                    Outcome::Unacknowledged
                }
            },
            Err(e) if !e.is_retryable() => {
                warn!(error = %e, "Discarding malformed message");
                match self.channel.ack(delivery.delivery_tag).await {
                    Ok(()) => Outcome::Discarded,
                    Err(e) => {
                        error!(error = %e, "Failed to ack malformed message");
                        Outcome::Unacknowledged
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to process message");
                match self
                    .retry
                    .handle_failure(self.channel.as_ref(), delivery)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(error = %e, "Failed to reroute message, leaving unacknowledged");
                        Outcome::Unacknowledged
                    }
                }
            }
        }
    }

    /// Parse, derive and upsert. Returns the audit id.
    async fn process(&self, delivery: &Delivery) -> Result<String, ProcessError> {
        let envelope = EventEnvelope::parse(&delivery.body)?;
        let record = AuditLog::from_envelope(&envelope, &delivery.body);

        tracing::Span::current().record("event_type", envelope.event_type.as_str());

        self.store.upsert(&record).await?;
        Ok(record.id)
    }
}
