//! Audit sink trait.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use idvault_core::{AuditEventId, CoreResult, EntityId, TenantId};

use crate::event::{AuditEvent, NewAuditEvent, Severity};

/// Query filter for recorded events.
///
/// All criteria are conjunctive; unset fields match everything. Results come
/// back in record order (event ids are UUIDv7, so also time order); pass the
/// last seen id as `after` to restart a query where it left off.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub tenant_id: Option<TenantId>,
    pub entity_id: Option<EntityId>,
    pub event_type: Option<String>,
    pub min_severity: Option<Severity>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub after: Option<AuditEventId>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            ..Self::default()
        }
    }

    pub fn with_entity(mut self, entity_id: EntityId) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn after(mut self, cursor: AuditEventId) -> Self {
        self.after = Some(cursor);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(t) = self.tenant_id {
            if event.tenant_id != t {
                return false;
            }
        }
        if let Some(e) = self.entity_id {
            if event.entity_id != Some(e) {
                return false;
            }
        }
        if let Some(ref ty) = self.event_type {
            if &event.event_type != ty {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if event.severity < min {
                return false;
            }
        }
        if let Some(from) = self.from {
            if event.occurred_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if event.occurred_at >= to {
                return false;
            }
        }
        true
    }
}

/// Append-only audit event log.
///
/// Implementations must never mutate or drop recorded events; `record` is the
/// only write path.
pub trait AuditSink: Send + Sync {
    /// Record one event, returning its assigned id.
    fn record(&self, event: NewAuditEvent) -> CoreResult<AuditEventId>;

    /// Query recorded events. Finite and restartable via [`AuditFilter::after`].
    fn query(&self, filter: &AuditFilter) -> CoreResult<Vec<AuditEvent>>;
}

impl<S> AuditSink for Arc<S>
where
    S: AuditSink + ?Sized,
{
    fn record(&self, event: NewAuditEvent) -> CoreResult<AuditEventId> {
        (**self).record(event)
    }

    fn query(&self, filter: &AuditFilter) -> CoreResult<Vec<AuditEvent>> {
        (**self).query(filter)
    }
}
