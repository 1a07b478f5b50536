//! In-memory audit sink.

use std::sync::RwLock;

use idvault_core::{AuditEventId, CoreError, CoreResult};

use crate::event::{AuditEvent, NewAuditEvent};
use crate::sink::{AuditFilter, AuditSink};

/// In-memory append-only audit log.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: NewAuditEvent) -> CoreResult<AuditEventId> {
        let event_id = AuditEventId::new();
        let mut events = self
            .events
            .write()
            .map_err(|_| CoreError::internal_msg("audit.record", "lock poisoned"))?;
        tracing::debug!(
            event_type = %event.event_type,
            tenant_id = %event.tenant_id,
            actor = %event.actor,
            "audit event recorded"
        );
        events.push(AuditEvent::from_new(event_id, event));
        Ok(event_id)
    }

    fn query(&self, filter: &AuditFilter) -> CoreResult<Vec<AuditEvent>> {
        let events = self
            .events
            .read()
            .map_err(|_| CoreError::internal_msg("audit.query", "lock poisoned"))?;

        let start = match filter.after {
            Some(cursor) => match events.iter().position(|e| e.event_id == cursor) {
                Some(idx) => idx + 1,
                None => 0,
            },
            None => 0,
        };

        let mut out = Vec::new();
        for event in events[start..].iter() {
            if filter.matches(event) {
                out.push(event.clone());
                if filter.limit.is_some_and(|l| out.len() >= l) {
                    break;
                }
            }
        }
        Ok(out)
    }
}
