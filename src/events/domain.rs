//! Typed domain events emitted by the workforce services.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Actor recorded when a change is not attributed to a user.
pub const SYSTEM_ACTOR: &str = "system";

/// The closed set of event kinds routed through the broker.
///
/// The string form is the exact variant name; routing and exchange naming
/// depend on it matching verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    EmployeeCreated,
    EmployeeUpdated,
    EmployeeDeactivated,
    ProjectCreated,
    ProjectUpdated,
    ProjectStatusChanged,
    TaskCreated,
    TaskAssigned,
    TaskStatusChanged,
    LeaveRequested,
    LeaveApproved,
    LeaveRejected,
    LeaveCancelled,
}

impl EventType {
    /// Every recognised event type, in declaration order.
    pub const ALL: [EventType; 13] = [
        EventType::EmployeeCreated,
        EventType::EmployeeUpdated,
        EventType::EmployeeDeactivated,
        EventType::ProjectCreated,
        EventType::ProjectUpdated,
        EventType::ProjectStatusChanged,
        EventType::TaskCreated,
        EventType::TaskAssigned,
        EventType::TaskStatusChanged,
        EventType::LeaveRequested,
        EventType::LeaveApproved,
        EventType::LeaveRejected,
        EventType::LeaveCancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::EmployeeCreated => "EmployeeCreated",
            EventType::EmployeeUpdated => "EmployeeUpdated",
            EventType::EmployeeDeactivated => "EmployeeDeactivated",
            EventType::ProjectCreated => "ProjectCreated",
            EventType::ProjectUpdated => "ProjectUpdated",
            EventType::ProjectStatusChanged => "ProjectStatusChanged",
            EventType::TaskCreated => "TaskCreated",
            EventType::TaskAssigned => "TaskAssigned",
            EventType::TaskStatusChanged => "TaskStatusChanged",
            EventType::LeaveRequested => "LeaveRequested",
            EventType::LeaveApproved => "LeaveApproved",
            EventType::LeaveRejected => "LeaveRejected",
            EventType::LeaveCancelled => "LeaveCancelled",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a recognised event type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    /// Exact, case-sensitive match against the variant name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|event_type| event_type.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

/// Event-kind specific identifiers.
///
/// Serialized flat into the payload with PascalCase field names, the shape
/// downstream consumers sniff for `EmployeeId`, `ProjectId`, `TaskId` and
/// `LeaveId`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged, rename_all_fields = "PascalCase")]
pub enum EventKind {
    EmployeeCreated {
        employee_id: i64,
    },
    EmployeeUpdated {
        employee_id: i64,
    },
    EmployeeDeactivated {
        employee_id: i64,
    },
    ProjectCreated {
        project_id: i64,
    },
    ProjectUpdated {
        project_id: i64,
    },
    ProjectStatusChanged {
        project_id: i64,
        from_status: String,
        to_status: String,
    },
    TaskCreated {
        task_id: i64,
        project_id: i64,
    },
    TaskAssigned {
        task_id: i64,
        assigned_employee_id: Option<i64>,
    },
    TaskStatusChanged {
        task_id: i64,
        from_status: String,
        to_status: String,
    },
    LeaveRequested {
        leave_id: String,
    },
    LeaveApproved {
        leave_id: String,
    },
    LeaveRejected {
        leave_id: String,
    },
    LeaveCancelled {
        leave_id: String,
    },
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::EmployeeCreated { .. } => EventType::EmployeeCreated,
            EventKind::EmployeeUpdated { .. } => EventType::EmployeeUpdated,
            EventKind::EmployeeDeactivated { .. } => EventType::EmployeeDeactivated,
            EventKind::ProjectCreated { .. } => EventType::ProjectCreated,
            EventKind::ProjectUpdated { .. } => EventType::ProjectUpdated,
            EventKind::ProjectStatusChanged { .. } => EventType::ProjectStatusChanged,
            EventKind::TaskCreated { .. } => EventType::TaskCreated,
            EventKind::TaskAssigned { .. } => EventType::TaskAssigned,
            EventKind::TaskStatusChanged { .. } => EventType::TaskStatusChanged,
            EventKind::LeaveRequested { .. } => EventType::LeaveRequested,
            EventKind::LeaveApproved { .. } => EventType::LeaveApproved,
            EventKind::LeaveRejected { .. } => EventType::LeaveRejected,
            EventKind::LeaveCancelled { .. } => EventType::LeaveCancelled,
        }
    }
}

/// One committed state change. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DomainEvent {
    #[serde(flatten)]
    pub kind: EventKind,
    pub actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    /// Create an unattributed event occurring now.
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            actor: SYSTEM_ACTOR.to_string(),
            before: None,
            after: None,
            occurred_at: Utc::now(),
        }
    }

    /// Attribute the event. An empty actor keeps the system default.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        let actor = actor.into();
        if !actor.is_empty() {
            self.actor = actor;
        }
        self
    }

    pub fn with_before(mut self, before: Value) -> Self {
        self.before = Some(before);
        self
    }

    pub fn with_after(mut self, after: Value) -> Self {
        self.after = Some(after);
        self
    }

    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }
}
