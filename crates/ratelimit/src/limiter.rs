//! Window counters.
//!
//! Counters are the only shared mutable state outside the entity store, and
//! they are atomics: the hot path is a read lock plus `fetch_add`, the write
//! lock is only taken to materialize a new window bucket.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use idvault_audit::{Actor, AuditSink, NewAuditEvent, Severity};
use idvault_core::{CoreError, CoreResult, TenantId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    tenant_id: TenantId,
    subject: String,
    operation: String,
    window_start: i64,
}

/// Outcome of a rate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u64 },
    RateLimited { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Fixed-window rate limiter.
///
/// Requests are counted per `(tenant, subject, operation)` within aligned
/// windows; the count resets when the next window starts. Denials are audited
/// (counter bumps are not entity-store writes, so they are not).
pub struct RateLimiter {
    windows: RwLock<HashMap<WindowKey, AtomicU64>>,
    audit: Option<std::sync::Arc<dyn AuditSink>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: std::sync::Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Count one request and decide.
    ///
    /// The increment is atomic: two racing calls can never both observe the
    /// last allowed slot.
    pub fn check_and_increment(
        &self,
        tenant_id: TenantId,
        subject: &str,
        operation: &str,
        window: Duration,
        limit: u64,
        now: DateTime<Utc>,
    ) -> CoreResult<Decision> {
        let window_secs = window.num_seconds();
        if window_secs <= 0 {
            return Err(CoreError::validation("rate window must be positive"));
        }
        if limit == 0 {
            return Err(CoreError::validation("rate limit must be positive"));
        }

        let window_start = now.timestamp().div_euclid(window_secs) * window_secs;
        let key = WindowKey {
            tenant_id,
            subject: subject.to_string(),
            operation: operation.to_string(),
            window_start,
        };

        let count = {
            let windows = self
                .windows
                .read()
                .map_err(|_| CoreError::internal_msg("rate.check", "lock poisoned"))?;
            windows.get(&key).map(|c| c.fetch_add(1, Ordering::SeqCst) + 1)
        };

        let count = match count {
            Some(count) => count,
            None => {
                let mut windows = self
                    .windows
                    .write()
                    .map_err(|_| CoreError::internal_msg("rate.check", "lock poisoned"))?;
                // A racing writer may have created the bucket meanwhile.
                windows
                    .entry(key.clone())
                    .or_insert_with(|| AtomicU64::new(0))
                    .fetch_add(1, Ordering::SeqCst)
                    + 1
            }
        };

        if count <= limit {
            return Ok(Decision::Allowed {
                remaining: limit - count,
            });
        }

        let window_end = DateTime::from_timestamp(window_start + window_secs, 0)
            .ok_or_else(|| CoreError::internal_msg("rate.check", "window end out of range"))?;
        let retry_after = window_end - now;
        tracing::warn!(
            tenant_id = %tenant_id,
            subject,
            operation,
            count,
            limit,
            "rate limit exceeded"
        );
        if let Some(ref audit) = self.audit {
            audit.record(
                NewAuditEvent::new(
                    tenant_id,
                    Actor::system("rate-limiter"),
                    "rate.limited",
                    now,
                )
                .with_severity(Severity::Warning)
                .with_payload(json!({
                    "subject": subject,
                    "operation": operation,
                    "count": count,
                    "limit": limit,
                    "retry_after_secs": retry_after.num_seconds(),
                })),
            )?;
        }
        Ok(Decision::RateLimited { retry_after })
    }

    /// Drop buckets whose window ended before `now`.
    pub fn prune(&self, now: DateTime<Utc>, window: Duration) -> CoreResult<usize> {
        let mut windows = self
            .windows
            .write()
            .map_err(|_| CoreError::internal_msg("rate.prune", "lock poisoned"))?;
        let cutoff = now.timestamp() - window.num_seconds();
        let before = windows.len();
        windows.retain(|key, _| key.window_start + window.num_seconds() > cutoff);
        Ok(before - windows.len())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
