//! Audit log records derived from event envelopes.
//!
//! An [`AuditLog`] is keyed by a digest of the raw message bytes, so a
//! redelivered message always maps to the same record. Entity, actor and
//! snapshot fields are resolved by looking for well-known payload field names
//! (PascalCase or camelCase) rather than by decoding a typed event.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::events::{EventEnvelope, SYSTEM_ACTOR};

/// Kind of entity an audit record refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Employee,
    Project,
    Task,
    LeaveRequest,
    Unknown,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Employee => "Employee",
            EntityType::Project => "Project",
            EntityType::Task => "Task",
            EntityType::LeaveRequest => "LeaveRequest",
            EntityType::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier fields checked in priority order: (PascalCase, camelCase, entity).
const ENTITY_ID_FIELDS: [(&str, &str, EntityType); 4] = [
    ("EmployeeId", "employeeId", EntityType::Employee),
    ("ProjectId", "projectId", EntityType::Project),
    ("TaskId", "taskId", EntityType::Task),
    ("LeaveId", "leaveId", EntityType::LeaveRequest),
];

/// Persisted audit record, one per distinct envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    /// Content-derived id (hex SHA-256 of the raw message bytes).
    #[serde(rename = "_id")]
    pub id: String,
    pub event_type: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

impl AuditLog {
    /// Build the audit record for an envelope parsed from `raw`.
    ///
    /// `raw` must be the untouched message body: the id is computed over it,
    /// not over a re-serialization of `envelope`.
    pub fn from_envelope(envelope: &EventEnvelope, raw: &[u8]) -> Self {
        let payload = &envelope.payload;
        let (entity_type, entity_id) = classify_entity(payload);

        Self {
            id: content_id(raw),
            event_type: envelope.event_type.clone(),
            entity_type,
            entity_id,
            timestamp: envelope.occurred_at.unwrap_or_else(Utc::now),
            actor: resolve_actor(payload),
            before: resolve_snapshot(payload, "Before", "before").cloned(),
            after: Some(
                resolve_snapshot(payload, "After", "after")
                    .unwrap_or(payload)
                    .clone(),
            ),
        }
    }
}

/// Hex-encoded SHA-256 of the message body.
pub fn content_id(raw: &[u8]) -> String {
    hex::encode(Sha256::digest(raw))
}

/// Resolve the entity an event refers to.
///
/// The first identifier field present wins. Returns `(Unknown, "")` when the
/// payload is not an object or carries none of them.
pub fn classify_entity(payload: &Value) -> (EntityType, String) {
    ENTITY_ID_FIELDS
        .iter()
        .find_map(|(pascal, camel, entity_type)| {
            field(payload, pascal, camel).map(|value| (*entity_type, id_text(value)))
        })
        .unwrap_or((EntityType::Unknown, String::new()))
}

/// The payload's actor when it is a non-empty string, otherwise the system actor.
pub fn resolve_actor(payload: &Value) -> String {
    field(payload, "Actor", "actor")
        .and_then(Value::as_str)
        .filter(|actor| !actor.is_empty())
        .unwrap_or(SYSTEM_ACTOR)
        .to_string()
}

/// A snapshot sub-field, present even when its value is `null`.
pub fn resolve_snapshot<'a>(payload: &'a Value, pascal: &str, camel: &str) -> Option<&'a Value> {
    field(payload, pascal, camel)
}

fn field<'a>(payload: &'a Value, pascal: &str, camel: &str) -> Option<&'a Value> {
    payload.get(pascal).or_else(|| payload.get(camel))
}

fn id_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
