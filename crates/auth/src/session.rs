//! Session lifecycle.
//!
//! Sessions are `Session`-kind entities keyed by `session/{session_id}`.
//! Validation is lazy: a session past its idle or absolute deadline is
//! written to `expired` the moment somebody looks at it, and the background
//! sweep catches the ones nobody does.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use idvault_audit::{Actor, Severity};
use idvault_core::{Attributes, CoreError, CoreResult, EntityId, SessionId, TenantId, UserId, derive_entity_id};
use idvault_policy::{PolicyEngine, SecurityPolicy};
use idvault_store::{AuditSpec, EntityKind, EntityStore, EntityVersion, LinkStore, VersionStore};

/// Session attribute keys.
pub mod attr {
    pub const SESSION_ID: &str = "session_id";
    pub const USER_ID: &str = "user_id";
    pub const STATUS: &str = "status";
    pub const STARTED_AT: &str = "started_at";
    pub const LAST_ACTIVITY_AT: &str = "last_activity_at";
}

/// Link relationship from a user entity to its session entities.
pub const USER_SESSION_LINK: &str = "user-session";

/// Business key of a session entity.
pub fn session_key(session_id: SessionId) -> String {
    format!("session/{session_id}")
}

pub fn session_entity_id(tenant_id: TenantId, session_id: SessionId) -> EntityId {
    derive_entity_id(tenant_id, &session_key(session_id))
}

/// Entity id anchoring a user's outgoing links.
pub fn user_entity_id(tenant_id: TenantId, user_id: UserId) -> EntityId {
    derive_entity_id(tenant_id, &format!("user/{user_id}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Expired,
    Revoked,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Expired => "expired",
            SessionStatus::Revoked => "revoked",
        }
    }

    fn from_name(name: &str) -> CoreResult<Self> {
        match name {
            "active" => Ok(SessionStatus::Active),
            "expired" => Ok(SessionStatus::Expired),
            "revoked" => Ok(SessionStatus::Revoked),
            other => Err(CoreError::validation(format!("unknown session status '{other}'"))),
        }
    }
}

/// A session as of one entity version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl SessionRecord {
    pub(crate) fn from_version(tenant_id: TenantId, version: &EntityVersion) -> CoreResult<Self> {
        let attrs = &version.attributes;
        let session_id = attrs
            .get_str(attr::SESSION_ID)
            .ok_or_else(|| CoreError::internal_msg("session", "missing session_id"))?
            .parse()
            .map_err(|_| CoreError::internal_msg("session", "malformed session_id"))?;
        let user_id = attrs
            .get_str(attr::USER_ID)
            .ok_or_else(|| CoreError::internal_msg("session", "missing user_id"))?
            .parse()
            .map_err(|_| CoreError::internal_msg("session", "malformed user_id"))?;
        let status = attrs
            .get_str(attr::STATUS)
            .map(SessionStatus::from_name)
            .transpose()?
            .ok_or_else(|| CoreError::internal_msg("session", "missing status"))?;
        let started_at = attrs
            .get_time(attr::STARTED_AT)?
            .ok_or_else(|| CoreError::internal_msg("session", "missing started_at"))?;
        let last_activity_at = attrs
            .get_time(attr::LAST_ACTIVITY_AT)?
            .ok_or_else(|| CoreError::internal_msg("session", "missing last_activity_at"))?;
        Ok(SessionRecord {
            session_id,
            user_id,
            tenant_id,
            status,
            started_at,
            last_activity_at,
        })
    }

    pub(crate) fn to_attributes(&self) -> CoreResult<Attributes> {
        let mut attrs = Attributes::new();
        attrs.set(attr::SESSION_ID, self.session_id.to_string())?;
        attrs.set(attr::USER_ID, self.user_id.to_string())?;
        attrs.set(attr::STATUS, self.status.as_str())?;
        attrs.set(attr::STARTED_AT, self.started_at.to_rfc3339())?;
        attrs.set(attr::LAST_ACTIVITY_AT, self.last_activity_at.to_rfc3339())?;
        Ok(attrs)
    }

    /// Which deadline, if any, has passed at `now`.
    pub(crate) fn expiry_reason(
        &self,
        policy: &SecurityPolicy,
        now: DateTime<Utc>,
    ) -> Option<&'static str> {
        // Strictly past the deadline: a session at exactly the timeout is
        // still valid.
        if now - self.started_at > policy.session_absolute_timeout() {
            Some("absolute_timeout")
        } else if now - self.last_activity_at > policy.session_idle_timeout() {
            Some("idle_timeout")
        } else {
            None
        }
    }
}

/// Outcome of validating a session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionValidation {
    Valid(SessionRecord),
    Expired,
    Revoked,
    NotFound,
}

/// Session creation, validation and revocation.
pub struct SessionManager<S> {
    store: Arc<EntityStore<S>>,
    policy: Arc<PolicyEngine<S>>,
    links: Arc<LinkStore>,
}

impl<S: VersionStore> SessionManager<S> {
    pub fn new(
        store: Arc<EntityStore<S>>,
        policy: Arc<PolicyEngine<S>>,
        links: Arc<LinkStore>,
    ) -> Self {
        Self { store, policy, links }
    }

    /// Start an active session for a user.
    pub fn create_session(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> CoreResult<SessionRecord> {
        let record = SessionRecord {
            session_id: SessionId::new(),
            user_id,
            tenant_id,
            status: SessionStatus::Active,
            started_at: now,
            last_activity_at: now,
        };
        self.store.put_with_event(
            tenant_id,
            EntityKind::Session,
            &session_key(record.session_id),
            record.to_attributes()?,
            Actor::User(user_id),
            now,
            Some(
                AuditSpec::new("auth.session.created")
                    .with_payload(json!({ "session_id": record.session_id, "user_id": user_id })),
            ),
        )?;
        self.links.link(
            user_entity_id(tenant_id, user_id),
            session_entity_id(tenant_id, record.session_id),
            USER_SESSION_LINK,
            now,
        )?;
        Ok(record)
    }

    /// Check a session against its tenant's timeouts.
    ///
    /// A live session gets its `last_activity_at` advanced to `now`. A
    /// session past a deadline is written to `expired` before reporting
    /// `Expired`, so the store never says `active` about a dead session
    /// anyone has observed.
    pub fn validate_session(
        &self,
        tenant_id: TenantId,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> CoreResult<SessionValidation> {
        let entity_id = session_entity_id(tenant_id, session_id);
        let Some(current) = self.store.find_current(entity_id)? else {
            return Ok(SessionValidation::NotFound);
        };
        let record = SessionRecord::from_version(tenant_id, &current)?;

        match record.status {
            SessionStatus::Revoked => return Ok(SessionValidation::Revoked),
            SessionStatus::Expired => return Ok(SessionValidation::Expired),
            SessionStatus::Active => {}
        }

        let policy = self.policy.get_policy(tenant_id)?;
        if let Some(reason) = record.expiry_reason(&policy, now) {
            self.write_status(
                &record,
                SessionStatus::Expired,
                Actor::User(record.user_id),
                now,
                AuditSpec::new("auth.session.expired")
                    .with_payload(json!({ "session_id": session_id, "reason": reason })),
            )?;
            return Ok(SessionValidation::Expired);
        }

        let mut touched = record.clone();
        touched.last_activity_at = now;
        self.store.put_with_event(
            tenant_id,
            EntityKind::Session,
            &session_key(session_id),
            touched.to_attributes()?,
            Actor::User(record.user_id),
            now,
            Some(
                AuditSpec::new("auth.session.touched")
                    .with_payload(json!({ "session_id": session_id })),
            ),
        )?;
        Ok(SessionValidation::Valid(touched))
    }

    /// Revoke a session. Returns `false` if it was already inactive.
    pub fn invalidate_session(
        &self,
        tenant_id: TenantId,
        session_id: SessionId,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> CoreResult<bool> {
        let entity_id = session_entity_id(tenant_id, session_id);
        let current = self.store.find_current(entity_id)?.ok_or(CoreError::NotFound)?;
        let record = SessionRecord::from_version(tenant_id, &current)?;
        if record.status != SessionStatus::Active {
            return Ok(false);
        }
        self.write_status(
            &record,
            SessionStatus::Revoked,
            actor,
            now,
            AuditSpec::new("auth.session.revoked")
                .with_severity(Severity::Warning)
                .with_payload(json!({ "session_id": session_id, "user_id": record.user_id })),
        )?;
        Ok(true)
    }

    /// All sessions linked from a user, newest activity first.
    pub fn sessions_for_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> CoreResult<Vec<SessionRecord>> {
        let links = self
            .links
            .links_from(user_entity_id(tenant_id, user_id), USER_SESSION_LINK)?;
        let mut records = Vec::with_capacity(links.len());
        for link in links {
            if let Some(version) = self.store.find_current(link.to)? {
                records.push(SessionRecord::from_version(tenant_id, &version)?);
            }
        }
        records.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(records)
    }

    fn write_status(
        &self,
        record: &SessionRecord,
        status: SessionStatus,
        actor: Actor,
        now: DateTime<Utc>,
        event: AuditSpec,
    ) -> CoreResult<()> {
        let mut next = record.clone();
        next.status = status;
        self.store.put_with_event(
            record.tenant_id,
            EntityKind::Session,
            &session_key(record.session_id),
            next.to_attributes()?,
            actor,
            now,
            Some(event),
        )?;
        Ok(())
    }
}
