//! Credential lifecycle.
//!
//! A credential is a `Credential`-kind entity whose attributes hold the
//! password hash and lockout counters. Every login attempt, success or
//! failure, writes a new credential version through the entity store, so the
//! whole lockout state machine is reconstructible from history.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Value as JsonValue, json};

use idvault_audit::{Actor, AuditSink, NewAuditEvent, Severity};
use idvault_core::{
    Attributes, CoreError, CoreResult, EntityId, TenantId, UserId, derive_entity_id,
};
use idvault_policy::{PolicyEngine, validate_password};
use idvault_store::{AuditSpec, EntityKind, EntityStore, VersionStore};

use crate::lockout::LockoutState;
use crate::password::{hash_password, verify_password};

/// Credential attribute keys.
pub mod attr {
    pub const PASSWORD_HASH: &str = "password_hash";
    pub const FAILED_ATTEMPTS: &str = "failed_attempts";
    pub const LOCKED_UNTIL: &str = "locked_until";
    pub const LAST_LOGIN_AT: &str = "last_login_at";
    pub const PASSWORD_HISTORY: &str = "password_history";
    pub const PASSWORD_CHANGED_AT: &str = "password_changed_at";
}

/// Business key of a user's credential entity.
pub fn credential_key(user_id: UserId) -> String {
    format!("credential/{user_id}")
}

/// Entity id of a user's credential.
pub fn credential_entity_id(tenant_id: TenantId, user_id: UserId) -> EntityId {
    derive_entity_id(tenant_id, &credential_key(user_id))
}

/// Outcome of a credential check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialOutcome {
    Valid { user_id: UserId },
    Unauthorized,
    Locked { retry_after: Duration },
    NotFound,
}

/// Credential registration, verification and rotation.
pub struct CredentialManager<S> {
    store: Arc<EntityStore<S>>,
    policy: Arc<PolicyEngine<S>>,
}

impl<S: VersionStore> CredentialManager<S> {
    pub fn new(store: Arc<EntityStore<S>>, policy: Arc<PolicyEngine<S>>) -> Self {
        Self { store, policy }
    }

    /// Create a credential for a user that has none.
    pub fn register(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        password: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        let policy = self.policy.get_policy(tenant_id)?;
        let check = validate_password(&policy, password);
        if !check.is_valid {
            return Err(CoreError::validation(format!(
                "password rejected: {}",
                join_violations(&check.violations)
            )));
        }

        let entity_id = credential_entity_id(tenant_id, user_id);
        if self.store.find_current(entity_id)?.is_some() {
            return Err(CoreError::conflict("credential already registered"));
        }

        let mut attrs = Attributes::new();
        attrs.set(attr::PASSWORD_HASH, hash_password(password)?)?;
        attrs.set(attr::FAILED_ATTEMPTS, 0)?;
        attrs.set(attr::LOCKED_UNTIL, JsonValue::Null)?;
        attrs.set(attr::LAST_LOGIN_AT, JsonValue::Null)?;
        attrs.set(attr::PASSWORD_HISTORY, Vec::<String>::new())?;
        attrs.set(attr::PASSWORD_CHANGED_AT, now.to_rfc3339())?;

        self.store.put_with_event(
            tenant_id,
            EntityKind::Credential,
            &credential_key(user_id),
            attrs,
            Actor::User(user_id),
            now,
            Some(
                AuditSpec::new("auth.credential.registered")
                    .with_payload(json!({ "user_id": user_id })),
            ),
        )?;
        Ok(())
    }

    /// Verify a presented secret, driving the lockout state machine.
    ///
    /// Locked credentials short-circuit before verification. Failures
    /// increment the counter and, at the policy threshold, start a lockout.
    /// Success resets counters and stamps `last_login_at`. Each of the three
    /// write paths is one new credential version with one audit event.
    pub fn check_credential(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        secret: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<CredentialOutcome> {
        let entity_id = credential_entity_id(tenant_id, user_id);
        let Some(current) = self.store.find_current(entity_id)? else {
            return Ok(CredentialOutcome::NotFound);
        };

        let prior_failures = match LockoutState::of(&current.attributes, now)? {
            LockoutState::Locked { until } => {
                // No verification while locked; correct secrets are rejected too.
                self.store.audit().record(
                    NewAuditEvent::new(tenant_id, Actor::User(user_id), "auth.login.locked", now)
                        .with_entity(entity_id)
                        .with_severity(Severity::Warning)
                        .with_payload(json!({ "locked_until": until.to_rfc3339() })),
                )?;
                return Ok(CredentialOutcome::Locked {
                    retry_after: until - now,
                });
            }
            LockoutState::Open { failures } => failures,
        };

        let stored_hash = current
            .attributes
            .get_str(attr::PASSWORD_HASH)
            .ok_or_else(|| CoreError::internal_msg("check_credential", "credential missing hash"))?;

        if verify_password(secret, stored_hash)? {
            let mut attrs = current.attributes.clone();
            attrs.set(attr::FAILED_ATTEMPTS, 0)?;
            attrs.set(attr::LOCKED_UNTIL, JsonValue::Null)?;
            attrs.set(attr::LAST_LOGIN_AT, now.to_rfc3339())?;
            self.store.put_with_event(
                tenant_id,
                EntityKind::Credential,
                &credential_key(user_id),
                attrs,
                Actor::User(user_id),
                now,
                Some(
                    AuditSpec::new("auth.login.succeeded")
                        .with_payload(json!({ "user_id": user_id })),
                ),
            )?;
            return Ok(CredentialOutcome::Valid { user_id });
        }

        let policy = self.policy.get_policy(tenant_id)?;
        let failures = prior_failures + 1;
        let newly_locked = failures >= policy.lockout_threshold;

        let mut attrs = current.attributes.clone();
        attrs.set(attr::FAILED_ATTEMPTS, failures as i64)?;
        if newly_locked {
            let until = now + policy.lockout_duration();
            attrs.set(attr::LOCKED_UNTIL, until.to_rfc3339())?;
        } else {
            attrs.set(attr::LOCKED_UNTIL, JsonValue::Null)?;
        }

        let event = if newly_locked {
            AuditSpec::new("auth.account.locked")
                .with_severity(Severity::Critical)
                .with_payload(json!({
                    "user_id": user_id,
                    "failures": failures,
                    "locked_until": attrs.get_str(attr::LOCKED_UNTIL),
                }))
        } else {
            AuditSpec::new("auth.login.failed")
                .with_severity(Severity::Warning)
                .with_payload(json!({ "user_id": user_id, "failures": failures }))
        };

        self.store.put_with_event(
            tenant_id,
            EntityKind::Credential,
            &credential_key(user_id),
            attrs,
            Actor::User(user_id),
            now,
            Some(event),
        )?;
        Ok(CredentialOutcome::Unauthorized)
    }

    /// Rotate a password after verifying the old one.
    ///
    /// The new password must pass the tenant's rules and must not match the
    /// current hash or any hash in the bounded reuse history.
    pub fn change_password(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        old_password: &str,
        new_password: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        let entity_id = credential_entity_id(tenant_id, user_id);
        let current = self.store.find_current(entity_id)?.ok_or(CoreError::NotFound)?;

        let stored_hash = current
            .attributes
            .get_str(attr::PASSWORD_HASH)
            .ok_or_else(|| CoreError::internal_msg("change_password", "credential missing hash"))?;
        if !verify_password(old_password, stored_hash)? {
            return Err(CoreError::Unauthorized);
        }

        let policy = self.policy.get_policy(tenant_id)?;
        let check = validate_password(&policy, new_password);
        if !check.is_valid {
            return Err(CoreError::validation(format!(
                "password rejected: {}",
                join_violations(&check.violations)
            )));
        }

        let history = password_history(&current.attributes);
        for reused in std::iter::once(stored_hash).chain(history.iter().map(String::as_str)) {
            if verify_password(new_password, reused)? {
                return Err(CoreError::validation("password was used recently"));
            }
        }

        let mut next_history = Vec::with_capacity(history.len() + 1);
        next_history.push(stored_hash.to_string());
        next_history.extend(history);
        next_history.truncate(policy.password_history_depth as usize);

        let mut attrs = current.attributes.clone();
        attrs.set(attr::PASSWORD_HASH, hash_password(new_password)?)?;
        attrs.set(attr::PASSWORD_HISTORY, next_history)?;
        attrs.set(attr::PASSWORD_CHANGED_AT, now.to_rfc3339())?;
        attrs.set(attr::FAILED_ATTEMPTS, 0)?;
        attrs.set(attr::LOCKED_UNTIL, JsonValue::Null)?;

        self.store.put_with_event(
            tenant_id,
            EntityKind::Credential,
            &credential_key(user_id),
            attrs,
            Actor::User(user_id),
            now,
            Some(
                AuditSpec::new("auth.password.changed")
                    .with_payload(json!({ "user_id": user_id })),
            ),
        )?;
        Ok(())
    }
}

fn password_history(attributes: &Attributes) -> Vec<String> {
    attributes
        .get(attr::PASSWORD_HISTORY)
        .and_then(JsonValue::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(JsonValue::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn join_violations<T: core::fmt::Display>(violations: &[T]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use idvault_audit::{AuditFilter, InMemoryAuditSink};
    use idvault_policy::SecurityPolicy;
    use idvault_store::InMemoryVersionStore;

    use super::*;

    struct Fixture {
        manager: CredentialManager<Arc<InMemoryVersionStore>>,
        policy: Arc<PolicyEngine<Arc<InMemoryVersionStore>>>,
        audit: Arc<InMemoryAuditSink>,
        store: Arc<EntityStore<Arc<InMemoryVersionStore>>>,
        tenant: TenantId,
        user: UserId,
    }

    fn fixture() -> Fixture {
        let audit = Arc::new(InMemoryAuditSink::new());
        let store = Arc::new(EntityStore::new(
            Arc::new(InMemoryVersionStore::new()),
            audit.clone(),
        ));
        let policy = Arc::new(PolicyEngine::new(store.clone()));
        Fixture {
            manager: CredentialManager::new(store.clone(), policy.clone()),
            policy,
            audit,
            store,
            tenant: TenantId::new(),
            user: UserId::new(),
        }
    }

    const GOOD: &str = "Correct-Horse-9";
    const WRONG: &str = "Wrong-Horse-9";

    #[test]
    fn register_then_valid_login() {
        let f = fixture();
        let now = Utc::now();
        f.manager.register(f.tenant, f.user, GOOD, now).unwrap();

        let outcome = f.manager.check_credential(f.tenant, f.user, GOOD, now).unwrap();
        assert_eq!(outcome, CredentialOutcome::Valid { user_id: f.user });

        let current = f
            .store
            .get_current(credential_entity_id(f.tenant, f.user))
            .unwrap();
        assert_eq!(
            current.attributes.get_time(attr::LAST_LOGIN_AT).unwrap(),
            Some(now)
        );
    }

    #[test]
    fn register_rejects_weak_password_and_duplicates() {
        let f = fixture();
        let now = Utc::now();
        assert!(matches!(
            f.manager.register(f.tenant, f.user, "weak", now),
            Err(CoreError::Validation(_))
        ));

        f.manager.register(f.tenant, f.user, GOOD, now).unwrap();
        assert!(matches!(
            f.manager.register(f.tenant, f.user, GOOD, now),
            Err(CoreError::Conflict(_))
        ));
    }

    #[test]
    fn unknown_user_is_not_found() {
        let f = fixture();
        let outcome = f
            .manager
            .check_credential(f.tenant, f.user, GOOD, Utc::now())
            .unwrap();
        assert_eq!(outcome, CredentialOutcome::NotFound);
    }

    #[test]
    fn five_failures_lock_out_even_the_correct_secret() {
        let f = fixture();
        let t0 = Utc::now();
        f.manager.register(f.tenant, f.user, GOOD, t0).unwrap();

        for i in 1..=5 {
            let now = t0 + Duration::seconds(i);
            let outcome = f.manager.check_credential(f.tenant, f.user, WRONG, now).unwrap();
            assert_eq!(outcome, CredentialOutcome::Unauthorized, "attempt {i}");
        }

        // Sixth attempt with the *correct* secret is still rejected.
        let now = t0 + Duration::seconds(10);
        match f.manager.check_credential(f.tenant, f.user, GOOD, now).unwrap() {
            CredentialOutcome::Locked { retry_after } => {
                assert!(retry_after > Duration::minutes(29));
                assert!(retry_after <= Duration::minutes(30));
            }
            other => panic!("expected Locked, got {other:?}"),
        }

        let locked_events = f
            .audit
            .query(&AuditFilter::for_tenant(f.tenant).with_event_type("auth.account.locked"))
            .unwrap();
        assert_eq!(locked_events.len(), 1);
    }

    #[test]
    fn lockout_expires_and_counters_restart() {
        let f = fixture();
        let t0 = Utc::now();
        f.manager.register(f.tenant, f.user, GOOD, t0).unwrap();

        for i in 1..=5 {
            f.manager
                .check_credential(f.tenant, f.user, WRONG, t0 + Duration::seconds(i))
                .unwrap();
        }

        // After the lockout window the account reopens.
        let later = t0 + Duration::minutes(31);
        let outcome = f.manager.check_credential(f.tenant, f.user, GOOD, later).unwrap();
        assert_eq!(outcome, CredentialOutcome::Valid { user_id: f.user });

        // And a single stale failure does not re-lock.
        let afterwards = later + Duration::seconds(1);
        let outcome = f
            .manager
            .check_credential(f.tenant, f.user, WRONG, afterwards)
            .unwrap();
        assert_eq!(outcome, CredentialOutcome::Unauthorized);
        let current = f
            .store
            .get_current(credential_entity_id(f.tenant, f.user))
            .unwrap();
        assert_eq!(current.attributes.get_i64(attr::FAILED_ATTEMPTS), Some(1));
    }

    #[test]
    fn lockout_threshold_follows_tenant_policy() {
        let f = fixture();
        let t0 = Utc::now();
        let mut policy = SecurityPolicy::default();
        policy.lockout_threshold = 2;
        f.policy
            .set_policy(f.tenant, &policy, Actor::system("test"), t0)
            .unwrap();

        f.manager.register(f.tenant, f.user, GOOD, t0).unwrap();
        f.manager
            .check_credential(f.tenant, f.user, WRONG, t0 + Duration::seconds(1))
            .unwrap();
        f.manager
            .check_credential(f.tenant, f.user, WRONG, t0 + Duration::seconds(2))
            .unwrap();

        let outcome = f
            .manager
            .check_credential(f.tenant, f.user, GOOD, t0 + Duration::seconds(3))
            .unwrap();
        assert!(matches!(outcome, CredentialOutcome::Locked { .. }));
    }

    #[test]
    fn every_attempt_writes_a_credential_version() {
        let f = fixture();
        let t0 = Utc::now();
        f.manager.register(f.tenant, f.user, GOOD, t0).unwrap();
        f.manager
            .check_credential(f.tenant, f.user, WRONG, t0 + Duration::seconds(1))
            .unwrap();
        f.manager
            .check_credential(f.tenant, f.user, GOOD, t0 + Duration::seconds(2))
            .unwrap();

        let history = f
            .store
            .history(credential_entity_id(f.tenant, f.user))
            .unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history.iter().filter(|v| v.is_current()).count(), 1);
    }

    #[test]
    fn change_password_enforces_history() {
        let f = fixture();
        let t0 = Utc::now();
        f.manager.register(f.tenant, f.user, GOOD, t0).unwrap();

        // Wrong old password.
        assert!(matches!(
            f.manager
                .change_password(f.tenant, f.user, WRONG, "Next-Horse-1", t0),
            Err(CoreError::Unauthorized)
        ));

        f.manager
            .change_password(f.tenant, f.user, GOOD, "Next-Horse-1", t0 + Duration::seconds(1))
            .unwrap();

        // Old password no longer verifies; reuse is rejected.
        let outcome = f
            .manager
            .check_credential(f.tenant, f.user, GOOD, t0 + Duration::seconds(2))
            .unwrap();
        assert_eq!(outcome, CredentialOutcome::Unauthorized);
        assert!(matches!(
            f.manager
                .change_password(f.tenant, f.user, "Next-Horse-1", GOOD, t0 + Duration::seconds(3)),
            Err(CoreError::Validation(_))
        ));
    }
}
