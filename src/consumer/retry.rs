//! Retry and dead-letter routing for failed deliveries.
//!
//! The original delivery is always acknowledged; a failed message travels
//! on as a new message, either to the retry queue with a TTL (which
//! dead-letters it back into the work queue) or to the dead-letter queue.

use lapin::types::{AMQPValue, FieldTable};
use tracing::{error, warn};

use super::Outcome;
use crate::bus::{Delivery, MessageChannel, OutgoingProperties, Result, CONTENT_TYPE_JSON};
use crate::utils::retry::{RetryDecision, RetryPolicy};

/// Header carrying how many times a message has been retried.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Default exchange: routes straight to the queue named by the routing key.
const DEFAULT_EXCHANGE: &str = "";

/// Retry count from message headers.
///
/// Integers and decimal text are accepted; a missing or unreadable header is 0.
pub fn read_retry_count(headers: &FieldTable) -> u32 {
    let Some(value) = headers.inner().get(RETRY_COUNT_HEADER) else {
        return 0;
    };

    match value {
        AMQPValue::ShortShortInt(v) => clamp(i64::from(*v)),
        AMQPValue::ShortShortUInt(v) => u32::from(*v),
        AMQPValue::ShortInt(v) => clamp(i64::from(*v)),
        AMQPValue::ShortUInt(v) => u32::from(*v),
        AMQPValue::LongInt(v) => clamp(i64::from(*v)),
        AMQPValue::LongUInt(v) => *v,
        AMQPValue::LongLongInt(v) => clamp(*v),
        AMQPValue::ShortString(s) => parse_count(s.as_str()),
        AMQPValue::LongString(s) => std::str::from_utf8(s.as_bytes())
            .map(parse_count)
            .unwrap_or(0),
        _ => 0,
    }
}

fn clamp(value: i64) -> u32 {
    if value <= 0 {
        0
    } else {
        u32::try_from(value).unwrap_or(u32::MAX)
    }
}

fn parse_count(text: &str) -> u32 {
    text.trim().parse::<i64>().map(clamp).unwrap_or(0)
}

/// Copy of `headers` with the retry count overwritten.
fn with_retry_count(headers: &FieldTable, retry_count: u32) -> FieldTable {
    let mut headers = headers.clone();
    headers.insert(
        RETRY_COUNT_HEADER.into(),
        AMQPValue::LongLongInt(i64::from(retry_count)),
    );
    headers
}

/// Routes failed deliveries according to a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    retry_queue: String,
    dead_letter_queue: String,
}

impl RetryController {
    pub fn new(
        policy: RetryPolicy,
        retry_queue: impl Into<String>,
        dead_letter_queue: impl Into<String>,
    ) -> Self {
        Self {
            policy,
            retry_queue: retry_queue.into(),
            dead_letter_queue: dead_letter_queue.into(),
        }
    }

    /// Republish to the retry or dead-letter queue, then ack the original.
    ///
    /// An error means the message was not settled: the republish or the ack
    /// failed and the delivery remains unacknowledged.
    pub async fn handle_failure(
        &self,
        channel: &dyn MessageChannel,
        delivery: &Delivery,
    ) -> Result<Outcome> {
        let retry_count = read_retry_count(&delivery.headers);
        let content_type = delivery
            .content_type
            .clone()
            .filter(|content_type| !content_type.is_empty())
            .unwrap_or_else(|| CONTENT_TYPE_JSON.to_string());

        match self.policy.decide(retry_count) {
            RetryDecision::DeadLetter => {
                let properties = OutgoingProperties {
                    content_type,
                    headers: delivery.headers.clone(),
                    expiration_ms: None,
                };
                channel
                    .publish(
                        DEFAULT_EXCHANGE,
                        &self.dead_letter_queue,
                        &delivery.body,
                        properties,
                    )
                    .await?;
                channel.ack(delivery.delivery_tag).await?;

                error!(
                    queue = %self.dead_letter_queue,
                    retry_count,
                    "Retries exhausted, message dead-lettered"
                );
                Ok(Outcome::DeadLettered { retry_count })
            }
            RetryDecision::Retry {
                next_retry_count,
                delay,
            } => {
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                let properties = OutgoingProperties {
                    content_type,
                    headers: with_retry_count(&delivery.headers, next_retry_count),
                    expiration_ms: Some(delay_ms),
                };
                channel
                    .publish(DEFAULT_EXCHANGE, &self.retry_queue, &delivery.body, properties)
                    .await?;
                channel.ack(delivery.delivery_tag).await?;

                warn!(
                    queue = %self.retry_queue,
                    retry_count = next_retry_count,
                    delay_ms,
                    "Message scheduled for retry"
                );
                Ok(Outcome::Retried {
                    retry_count: next_retry_count,
                    delay,
                })
            }
        }
    }
}
