//! Wire envelope for one domain event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::DomainEvent;

/// `{ "EventType", "OccurredAt", "Payload" }` as emitted by producers.
///
/// Deserialization also accepts camelCase field names. `OccurredAt` and
/// `Payload` may be absent; only `EventType` is required for the envelope to
/// be well formed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "EventType", alias = "eventType")]
    pub event_type: String,
    #[serde(rename = "OccurredAt", alias = "occurredAt", default)]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(rename = "Payload", alias = "payload", default)]
    pub payload: Value,
}

impl EventEnvelope {
    /// Wrap a domain event. The event type is the variant name verbatim.
    pub fn from_event(event: &DomainEvent) -> serde_json::Result<Self> {
        Ok(Self {
            event_type: event.event_type().as_str().to_string(),
            occurred_at: Some(event.occurred_at),
            payload: serde_json::to_value(event)?,
        })
    }

    pub fn parse(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
