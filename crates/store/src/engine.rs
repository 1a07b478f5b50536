//! Entity store engine: content-hash no-op detection + CAS-retry writes.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde_json::json;

use idvault_audit::{Actor, AuditSink, NewAuditEvent, Severity};
use idvault_core::{
    Attributes, CoreError, CoreResult, EntityId, TenantId, VersionId, content_hash,
    derive_entity_id,
};

use crate::schema::{self, EntityKind};
use crate::store::VersionStore;
use crate::version::{EntityHeader, EntityVersion, PutOutcome};

/// Retry budget for the CAS loop.
///
/// Contention on a single entity is resolved by retrying the whole `put` from
/// the top; exceeding `max_attempts` surfaces `Conflict` instead of spinning.
#[derive(Debug, Clone)]
pub struct PutConfig {
    pub max_attempts: u32,
    pub base_backoff: StdDuration,
    pub max_backoff: StdDuration,
}

impl Default for PutConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff: StdDuration::from_millis(5),
            max_backoff: StdDuration::from_millis(80),
        }
    }
}

impl PutConfig {
    fn backoff(&self, attempt: u32) -> StdDuration {
        let exp = self.base_backoff.saturating_mul(1u32 << attempt.min(16));
        exp.min(self.max_backoff)
    }
}

/// Audit description of a domain write.
///
/// State-changing operations record exactly one audit event; domain managers
/// pass their own event type and payload here so generic `entity.updated`
/// noise never doubles up with e.g. `auth.token.extended`.
#[derive(Debug, Clone)]
pub struct AuditSpec {
    pub event_type: String,
    pub severity: Severity,
    pub payload: serde_json::Value,
}

impl AuditSpec {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            severity: Severity::Info,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Versioned entity store engine.
///
/// Wraps a [`VersionStore`] backend with the semantics callers rely on:
/// derived ids, schema validation, idempotent puts, the bounded CAS-retry
/// loop, and one audit event per state change.
pub struct EntityStore<S> {
    store: S,
    audit: std::sync::Arc<dyn AuditSink>,
    config: PutConfig,
}

impl<S: VersionStore> EntityStore<S> {
    pub fn new(store: S, audit: std::sync::Arc<dyn AuditSink>) -> Self {
        Self {
            store,
            audit,
            config: PutConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PutConfig) -> Self {
        self.config = config;
        self
    }

    pub fn backend(&self) -> &S {
        &self.store
    }

    pub fn audit(&self) -> &std::sync::Arc<dyn AuditSink> {
        &self.audit
    }

    /// Write a new version, auditing it as a generic entity change.
    pub fn put(
        &self,
        tenant_id: TenantId,
        kind: EntityKind,
        business_key: &str,
        attributes: Attributes,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> CoreResult<PutOutcome> {
        self.put_with_event(tenant_id, kind, business_key, attributes, actor, now, None)
    }

    /// Write a new version, auditing it with a caller-supplied event.
    ///
    /// Idempotent: an unchanged content hash returns the current version and
    /// records nothing. On CAS contention the whole operation retries from the
    /// top with exponential backoff, then fails with `Conflict`.
    #[allow(clippy::too_many_arguments)]
    pub fn put_with_event(
        &self,
        tenant_id: TenantId,
        kind: EntityKind,
        business_key: &str,
        attributes: Attributes,
        actor: Actor,
        now: DateTime<Utc>,
        event: Option<AuditSpec>,
    ) -> CoreResult<PutOutcome> {
        if business_key.is_empty() {
            return Err(CoreError::validation("business_key must not be empty"));
        }
        schema::validate_attributes(&kind, &attributes)?;

        let entity_id = derive_entity_id(tenant_id, business_key);
        let hash = content_hash(&attributes)?;

        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                std::thread::sleep(self.config.backoff(attempt - 1));
            }

            let current = self.store.current(entity_id)?;
            if let Some(ref cur) = current {
                if cur.content_hash == hash {
                    return Ok(PutOutcome::Unchanged(cur.clone()));
                }
            }

            if current.is_none() {
                // First writer also materializes the hub. Idempotent, so a
                // racing writer inserting the same header is harmless.
                self.store.insert_header(EntityHeader {
                    entity_id,
                    tenant_id,
                    business_key: business_key.to_string(),
                    kind: kind.clone(),
                    created_at: now,
                })?;
            }

            let expected = current.as_ref().map(|v| v.version_id);
            let version = EntityVersion {
                entity_id,
                version_id: VersionId::new(),
                valid_from: now,
                valid_to: None,
                content_hash: hash,
                attributes: attributes.clone(),
            };

            if self.store.commit_version(expected, version.clone())? {
                let outcome = if current.is_some() {
                    PutOutcome::Updated(version)
                } else {
                    PutOutcome::Created(version)
                };
                self.record_put(
                    tenant_id,
                    entity_id,
                    &kind,
                    business_key,
                    actor,
                    now,
                    current.as_ref(),
                    &outcome,
                    event,
                )?;
                return Ok(outcome);
            }

            tracing::debug!(
                entity_id = %entity_id,
                attempt,
                "lost version CAS, retrying put"
            );
        }

        Err(CoreError::conflict(format!(
            "put retry budget exhausted for entity {entity_id}"
        )))
    }

    #[allow(clippy::too_many_arguments)]
    fn record_put(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        kind: &EntityKind,
        business_key: &str,
        actor: Actor,
        now: DateTime<Utc>,
        previous: Option<&EntityVersion>,
        outcome: &PutOutcome,
        event: Option<AuditSpec>,
    ) -> CoreResult<()> {
        let spec = event.unwrap_or_else(|| {
            AuditSpec::new(if previous.is_some() {
                "entity.updated"
            } else {
                "entity.created"
            })
            .with_payload(json!({
                "kind": kind.as_str(),
                "business_key": business_key,
                "old_content_hash": previous.map(|v| v.content_hash.to_hex()),
                "new_content_hash": outcome.version().content_hash.to_hex(),
            }))
        });

        self.audit.record(
            NewAuditEvent::new(tenant_id, actor, spec.event_type, now)
                .with_entity(entity_id)
                .with_severity(spec.severity)
                .with_payload(spec.payload),
        )?;
        Ok(())
    }

    /// Current version, or `NotFound`.
    pub fn get_current(&self, entity_id: EntityId) -> CoreResult<EntityVersion> {
        self.store.current(entity_id)?.ok_or(CoreError::NotFound)
    }

    /// Like [`EntityStore::get_current`] but absence is not an error.
    pub fn find_current(&self, entity_id: EntityId) -> CoreResult<Option<EntityVersion>> {
        self.store.current(entity_id)
    }

    /// The version current at `at`, or `NotFound`.
    pub fn get_as_of(&self, entity_id: EntityId, at: DateTime<Utc>) -> CoreResult<EntityVersion> {
        self.store.as_of(entity_id, at)?.ok_or(CoreError::NotFound)
    }

    /// Full version history, oldest first. `NotFound` for unknown entities.
    pub fn history(&self, entity_id: EntityId) -> CoreResult<Vec<EntityVersion>> {
        if self.store.load_header(entity_id)?.is_none() {
            return Err(CoreError::NotFound);
        }
        self.store.history(entity_id)
    }

    pub fn scan_current(&self, kind: &EntityKind) -> CoreResult<Vec<(EntityHeader, EntityVersion)>> {
        self.store.scan_current(kind)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::Duration;
    use proptest::prelude::*;

    use idvault_audit::{AuditFilter, InMemoryAuditSink};
    use idvault_core::Attributes;

    use super::*;
    use crate::in_memory::InMemoryVersionStore;

    fn test_store() -> (EntityStore<Arc<InMemoryVersionStore>>, Arc<InMemoryAuditSink>) {
        let audit = Arc::new(InMemoryAuditSink::new());
        let store = EntityStore::new(Arc::new(InMemoryVersionStore::new()), audit.clone());
        (store, audit)
    }

    fn attrs(pairs: &[(&str, i64)]) -> Attributes {
        let mut a = Attributes::new();
        for (k, v) in pairs {
            a.set(*k, *v).unwrap();
        }
        a
    }

    fn actor() -> Actor {
        Actor::system("test")
    }

    const KIND: &str = "widget";

    fn kind() -> EntityKind {
        EntityKind::Custom(KIND.into())
    }

    #[test]
    fn put_then_get_current_round_trips() {
        let (store, _) = test_store();
        let tenant = TenantId::new();
        let now = Utc::now();

        let outcome = store
            .put(tenant, kind(), "w/1", attrs(&[("a", 1)]), actor(), now)
            .unwrap();
        assert!(matches!(outcome, PutOutcome::Created(_)));

        let id = derive_entity_id(tenant, "w/1");
        let current = store.get_current(id).unwrap();
        assert_eq!(current.attributes, attrs(&[("a", 1)]));
    }

    #[test]
    fn identical_put_is_a_noop() {
        let (store, audit) = test_store();
        let tenant = TenantId::new();
        let now = Utc::now();

        store
            .put(tenant, kind(), "w/1", attrs(&[("a", 1)]), actor(), now)
            .unwrap();
        let second = store
            .put(tenant, kind(), "w/1", attrs(&[("a", 1)]), actor(), now + Duration::seconds(1))
            .unwrap();
        assert!(matches!(second, PutOutcome::Unchanged(_)));

        let id = derive_entity_id(tenant, "w/1");
        assert_eq!(store.history(id).unwrap().len(), 1);
        // No audit event for the no-op.
        assert_eq!(audit.query(&AuditFilter::for_tenant(tenant)).unwrap().len(), 1);
    }

    #[test]
    fn as_of_reads_the_covering_version() {
        let (store, _) = test_store();
        let tenant = TenantId::new();
        let t0 = Utc::now();
        let t1 = t0 + Duration::minutes(10);

        store.put(tenant, kind(), "w/1", attrs(&[("a", 1)]), actor(), t0).unwrap();
        store.put(tenant, kind(), "w/1", attrs(&[("a", 2)]), actor(), t1).unwrap();

        let id = derive_entity_id(tenant, "w/1");
        let mid = store.get_as_of(id, t0 + Duration::minutes(5)).unwrap();
        assert_eq!(mid.attributes.get_i64("a"), Some(1));
        let late = store.get_as_of(id, t1 + Duration::minutes(5)).unwrap();
        assert_eq!(late.attributes.get_i64("a"), Some(2));
        assert!(matches!(
            store.get_as_of(id, t0 - Duration::minutes(5)),
            Err(CoreError::NotFound)
        ));
    }

    #[test]
    fn history_is_oldest_first_and_not_found_for_unknown() {
        let (store, _) = test_store();
        let tenant = TenantId::new();
        let t0 = Utc::now();

        for i in 0..3 {
            store
                .put(
                    tenant,
                    kind(),
                    "w/1",
                    attrs(&[("a", i)]),
                    actor(),
                    t0 + Duration::seconds(i),
                )
                .unwrap();
        }

        let id = derive_entity_id(tenant, "w/1");
        let history = store.history(id).unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.windows(2).all(|w| w[0].valid_from <= w[1].valid_from));
        assert_eq!(history.iter().filter(|v| v.is_current()).count(), 1);

        let unknown = derive_entity_id(tenant, "w/unknown");
        assert!(matches!(store.history(unknown), Err(CoreError::NotFound)));
    }

    #[test]
    fn concurrent_puts_leave_one_current_version() {
        let audit = Arc::new(InMemoryAuditSink::new());
        let store = Arc::new(EntityStore::new(
            Arc::new(InMemoryVersionStore::new()),
            audit as Arc<dyn AuditSink>,
        ));
        let tenant = TenantId::new();
        let now = Utc::now();

        let mut handles = Vec::new();
        for i in 0..8i64 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                store.put(
                    tenant,
                    EntityKind::Custom(KIND.into()),
                    "w/contended",
                    attrs(&[("writer", i)]),
                    Actor::system("test"),
                    now + Duration::milliseconds(i),
                )
            }));
        }

        let mut committed = 0;
        for handle in handles {
            match handle.join().unwrap() {
                Ok(outcome) if outcome.changed() => committed += 1,
                Ok(_) => {}
                Err(CoreError::Conflict(_)) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert!(committed >= 1);

        let id = derive_entity_id(tenant, "w/contended");
        let history = store.history(id).unwrap();
        assert_eq!(history.iter().filter(|v| v.is_current()).count(), 1);
        // Every committed version is present; nothing was lost.
        assert_eq!(history.len(), committed);
    }

    /// Backend wrapper that makes the first `fail_n` CAS attempts lose.
    struct ContentionStore {
        inner: InMemoryVersionStore,
        remaining_failures: AtomicU32,
    }

    impl ContentionStore {
        fn failing(fail_n: u32) -> Self {
            Self {
                inner: InMemoryVersionStore::new(),
                remaining_failures: AtomicU32::new(fail_n),
            }
        }
    }

    impl VersionStore for ContentionStore {
        fn insert_header(&self, header: EntityHeader) -> CoreResult<()> {
            self.inner.insert_header(header)
        }
        fn load_header(&self, entity_id: EntityId) -> CoreResult<Option<EntityHeader>> {
            self.inner.load_header(entity_id)
        }
        fn current(&self, entity_id: EntityId) -> CoreResult<Option<EntityVersion>> {
            self.inner.current(entity_id)
        }
        fn as_of(
            &self,
            entity_id: EntityId,
            at: DateTime<Utc>,
        ) -> CoreResult<Option<EntityVersion>> {
            self.inner.as_of(entity_id, at)
        }
        fn history(&self, entity_id: EntityId) -> CoreResult<Vec<EntityVersion>> {
            self.inner.history(entity_id)
        }
        fn commit_version(
            &self,
            expected: Option<VersionId>,
            version: EntityVersion,
        ) -> CoreResult<bool> {
            let remaining = self.remaining_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
                return Ok(false);
            }
            self.inner.commit_version(expected, version)
        }
        fn scan_current(
            &self,
            kind: &EntityKind,
        ) -> CoreResult<Vec<(EntityHeader, EntityVersion)>> {
            self.inner.scan_current(kind)
        }
    }

    #[test]
    fn put_retries_through_transient_contention() {
        let audit: Arc<dyn AuditSink> = Arc::new(InMemoryAuditSink::new());
        let store = EntityStore::new(ContentionStore::failing(2), audit).with_config(PutConfig {
            max_attempts: 4,
            base_backoff: StdDuration::from_millis(1),
            max_backoff: StdDuration::from_millis(2),
        });
        let outcome = store
            .put(
                TenantId::new(),
                kind(),
                "w/1",
                attrs(&[("a", 1)]),
                actor(),
                Utc::now(),
            )
            .unwrap();
        assert!(outcome.changed());
    }

    #[test]
    fn put_surfaces_conflict_when_budget_exhausted() {
        let audit: Arc<dyn AuditSink> = Arc::new(InMemoryAuditSink::new());
        let store = EntityStore::new(ContentionStore::failing(10), audit).with_config(PutConfig {
            max_attempts: 3,
            base_backoff: StdDuration::from_millis(1),
            max_backoff: StdDuration::from_millis(2),
        });
        let result = store.put(
            TenantId::new(),
            kind(),
            "w/1",
            attrs(&[("a", 1)]),
            actor(),
            Utc::now(),
        );
        assert!(matches!(result, Err(CoreError::Conflict(_))));
    }

    #[test]
    fn schema_violations_rejected_before_any_write() {
        let (store, audit) = test_store();
        let tenant = TenantId::new();
        let result = store.put(
            tenant,
            EntityKind::Credential,
            "credential/u",
            attrs(&[("a", 1)]),
            actor(),
            Utc::now(),
        );
        assert!(matches!(result, Err(CoreError::Validation(_))));
        assert!(audit.is_empty());
    }

    proptest! {
        /// Any interleaving of puts leaves exactly one current version, and the
        /// last changed put wins.
        #[test]
        fn single_current_invariant(values in proptest::collection::vec(0i64..4, 1..12)) {
            let (store, _) = test_store();
            let tenant = TenantId::new();
            let t0 = Utc::now();

            for (i, v) in values.iter().enumerate() {
                store
                    .put(
                        tenant,
                        kind(),
                        "w/prop",
                        attrs(&[("v", *v)]),
                        actor(),
                        t0 + Duration::seconds(i as i64),
                    )
                    .unwrap();
            }

            let id = derive_entity_id(tenant, "w/prop");
            let history = store.history(id).unwrap();
            prop_assert_eq!(history.iter().filter(|v| v.is_current()).count(), 1);

            let current = store.get_current(id).unwrap();
            prop_assert_eq!(current.attributes.get_i64("v"), Some(*values.last().unwrap()));

            // Consecutive duplicates collapse: history only grows on change.
            let mut expected_len = 1;
            for w in values.windows(2) {
                if w[0] != w[1] {
                    expected_len += 1;
                }
            }
            prop_assert_eq!(history.len(), expected_len);
        }
    }
}
