//! Audit event model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use idvault_core::{AuditEventId, EntityId, TenantId, UserId};

/// Who performed an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    /// A user acting through the API.
    User(UserId),
    /// A background component (sweeps, migrations).
    System(String),
}

impl Actor {
    pub fn system(name: impl Into<String>) -> Self {
        Self::System(name.into())
    }
}

impl core::fmt::Display for Actor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Actor::User(id) => write!(f, "user:{id}"),
            Actor::System(name) => write!(f, "system:{name}"),
        }
    }
}

/// Event severity, ordered so filters can express "at least this severe".
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// An event ready to be recorded (not yet assigned an id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAuditEvent {
    pub tenant_id: TenantId,
    pub actor: Actor,
    pub entity_id: Option<EntityId>,
    pub event_type: String,
    pub severity: Severity,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl NewAuditEvent {
    pub fn new(
        tenant_id: TenantId,
        actor: Actor,
        event_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id,
            actor,
            entity_id: None,
            event_type: event_type.into(),
            severity: Severity::Info,
            occurred_at,
            payload: JsonValue::Null,
        }
    }

    pub fn with_entity(mut self, entity_id: EntityId) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = payload;
        self
    }
}

/// A recorded audit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: AuditEventId,
    pub tenant_id: TenantId,
    pub actor: Actor,
    pub entity_id: Option<EntityId>,
    pub event_type: String,
    pub severity: Severity,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl AuditEvent {
    pub fn from_new(event_id: AuditEventId, event: NewAuditEvent) -> Self {
        Self {
            event_id,
            tenant_id: event.tenant_id,
            actor: event.actor,
            entity_id: event.entity_id,
            event_type: event.event_type,
            severity: event.severity,
            occurred_at: event.occurred_at,
            payload: event.payload,
        }
    }
}
