//! Opaque bearer tokens.
//!
//! Only a SHA-256 digest of the raw token is stored; the business key is
//! `token/{token_hash}`, so validation is a single keyed lookup and a store
//! dump never yields a usable secret. Raw tokens exist once, in the
//! `IssuedToken` handed back at issue time.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde_json::json;
use sha2::{Digest as _, Sha256};
use tracing::warn;

use idvault_audit::{Actor, Severity};
use idvault_core::{
    Attributes, CoreError, CoreResult, EntityId, SessionId, TenantId, TokenId, UserId,
    derive_entity_id,
};
use idvault_store::{AuditSpec, EntityKind, EntityStore, EntityVersion, LinkStore, VersionStore};

use crate::session::session_entity_id;

/// Token attribute keys.
pub mod attr {
    pub const TOKEN_ID: &str = "token_id";
    pub const TOKEN_HASH: &str = "token_hash";
    pub const SUBJECT_ID: &str = "subject_id";
    pub const SESSION_ID: &str = "session_id";
    pub const SCOPE: &str = "scope";
    pub const EXPIRES_AT: &str = "expires_at";
    pub const REVOKED: &str = "revoked";
    pub const CREATED_AT: &str = "created_at";
}

/// Link relationship from a session entity to the tokens it carries.
pub const SESSION_TOKEN_LINK: &str = "session-token";

/// Lowercase hex SHA-256 of a raw token string.
pub fn token_hash(raw_token: &str) -> String {
    hex::encode(Sha256::digest(raw_token.as_bytes()))
}

pub fn token_key(hash: &str) -> String {
    format!("token/{hash}")
}

pub fn token_entity_id(tenant_id: TenantId, raw_token: &str) -> EntityId {
    derive_entity_id(tenant_id, &token_key(&token_hash(raw_token)))
}

/// A token as of one entity version. Never contains the raw secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub token_id: TokenId,
    pub token_hash: String,
    pub subject_id: UserId,
    pub session_id: Option<SessionId>,
    pub tenant_id: TenantId,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

impl TokenRecord {
    fn from_version(tenant_id: TenantId, version: &EntityVersion) -> CoreResult<Self> {
        let attrs = &version.attributes;
        let token_id = attrs
            .get_str(attr::TOKEN_ID)
            .ok_or_else(|| CoreError::internal_msg("token", "missing token_id"))?
            .parse()
            .map_err(|_| CoreError::internal_msg("token", "malformed token_id"))?;
        let token_hash = attrs
            .get_str(attr::TOKEN_HASH)
            .ok_or_else(|| CoreError::internal_msg("token", "missing token_hash"))?
            .to_string();
        let subject_id = attrs
            .get_str(attr::SUBJECT_ID)
            .ok_or_else(|| CoreError::internal_msg("token", "missing subject_id"))?
            .parse()
            .map_err(|_| CoreError::internal_msg("token", "malformed subject_id"))?;
        let session_id = match attrs.get_str(attr::SESSION_ID) {
            Some(raw) => Some(
                raw.parse()
                    .map_err(|_| CoreError::internal_msg("token", "malformed session_id"))?,
            ),
            None => None,
        };
        let expires_at = attrs
            .get_time(attr::EXPIRES_AT)?
            .ok_or_else(|| CoreError::internal_msg("token", "missing expires_at"))?;
        let created_at = attrs
            .get_time(attr::CREATED_AT)?
            .ok_or_else(|| CoreError::internal_msg("token", "missing created_at"))?;
        Ok(TokenRecord {
            token_id,
            token_hash,
            subject_id,
            session_id,
            tenant_id,
            scope: attrs.get_str(attr::SCOPE).unwrap_or_default().to_string(),
            expires_at,
            revoked: attrs.get_bool(attr::REVOKED).unwrap_or(false),
            created_at,
        })
    }

    fn to_attributes(&self) -> CoreResult<Attributes> {
        let mut attrs = Attributes::new();
        attrs.set(attr::TOKEN_ID, self.token_id.to_string())?;
        attrs.set(attr::TOKEN_HASH, self.token_hash.clone())?;
        attrs.set(attr::SUBJECT_ID, self.subject_id.to_string())?;
        if let Some(session_id) = self.session_id {
            attrs.set(attr::SESSION_ID, session_id.to_string())?;
        }
        attrs.set(attr::SCOPE, self.scope.clone())?;
        attrs.set(attr::EXPIRES_AT, self.expires_at.to_rfc3339())?;
        attrs.set(attr::REVOKED, self.revoked)?;
        attrs.set(attr::CREATED_AT, self.created_at.to_rfc3339())?;
        Ok(attrs)
    }
}

/// Handed back exactly once at issue time.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub raw_token: String,
    pub token_id: TokenId,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of validating a raw token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenValidation {
    Valid { record: TokenRecord, extended: bool },
    Expired,
    Revoked,
    NotFound,
}

/// Sliding-expiry behavior applied at validation time.
#[derive(Debug, Clone, Copy)]
pub struct ExtendPolicy {
    pub auto_extend: bool,
    /// Extend only when at most this much lifetime remains.
    pub extend_threshold: Duration,
    pub extend_by: Duration,
}

impl ExtendPolicy {
    pub fn fixed() -> Self {
        Self {
            auto_extend: false,
            extend_threshold: Duration::zero(),
            extend_by: Duration::zero(),
        }
    }

    pub fn sliding(extend_threshold: Duration, extend_by: Duration) -> Self {
        Self {
            auto_extend: true,
            extend_threshold,
            extend_by,
        }
    }
}

/// Token issuance, validation and revocation.
pub struct TokenManager<S> {
    store: Arc<EntityStore<S>>,
    links: Arc<LinkStore>,
}

impl<S: VersionStore> TokenManager<S> {
    pub fn new(store: Arc<EntityStore<S>>, links: Arc<LinkStore>) -> Self {
        Self { store, links }
    }

    /// Mint a token for a subject. 256 bits from the OS RNG, hex-encoded.
    pub fn issue(
        &self,
        tenant_id: TenantId,
        subject_id: UserId,
        session_id: Option<SessionId>,
        scope: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> CoreResult<IssuedToken> {
        let mut raw = [0u8; 32];
        OsRng.fill_bytes(&mut raw);
        let raw_token = hex::encode(raw);
        let hash = token_hash(&raw_token);

        let record = TokenRecord {
            token_id: TokenId::new(),
            token_hash: hash.clone(),
            subject_id,
            session_id,
            tenant_id,
            scope: scope.to_string(),
            expires_at: now + ttl,
            revoked: false,
            created_at: now,
        };
        self.store.put_with_event(
            tenant_id,
            EntityKind::Token,
            &token_key(&hash),
            record.to_attributes()?,
            Actor::User(subject_id),
            now,
            Some(
                AuditSpec::new("auth.token.issued").with_payload(json!({
                    "token_id": record.token_id,
                    "subject_id": subject_id,
                    "scope": scope,
                    "expires_at": record.expires_at.to_rfc3339(),
                })),
            ),
        )?;
        if let Some(session_id) = session_id {
            self.links.link(
                session_entity_id(tenant_id, session_id),
                derive_entity_id(tenant_id, &token_key(&hash)),
                SESSION_TOKEN_LINK,
                now,
            )?;
        }
        Ok(IssuedToken {
            raw_token,
            token_id: record.token_id,
            expires_at: record.expires_at,
        })
    }

    /// Validate a raw token without touching it.
    pub fn validate(
        &self,
        tenant_id: TenantId,
        raw_token: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<TokenValidation> {
        self.validate_with(tenant_id, raw_token, now, &ExtendPolicy::fixed())
    }

    /// Validate a raw token, sliding its expiry forward when the policy
    /// says to and the remaining lifetime is under the threshold.
    ///
    /// The extension write races other validators and may fail outright;
    /// neither invalidates the token. It simply reports `extended: false`
    /// and keeps whatever expiry is stored.
    pub fn validate_with(
        &self,
        tenant_id: TenantId,
        raw_token: &str,
        now: DateTime<Utc>,
        extend: &ExtendPolicy,
    ) -> CoreResult<TokenValidation> {
        let entity_id = token_entity_id(tenant_id, raw_token);
        let Some(current) = self.store.find_current(entity_id)? else {
            return Ok(TokenValidation::NotFound);
        };
        let record = TokenRecord::from_version(tenant_id, &current)?;

        if record.revoked {
            return Ok(TokenValidation::Revoked);
        }
        if now >= record.expires_at {
            return Ok(TokenValidation::Expired);
        }

        if extend.auto_extend && record.expires_at - now <= extend.extend_threshold {
            let mut next = record.clone();
            next.expires_at = now + extend.extend_by;
            let outcome = self.store.put_with_event(
                tenant_id,
                EntityKind::Token,
                &token_key(&record.token_hash),
                next.to_attributes()?,
                Actor::User(record.subject_id),
                now,
                Some(AuditSpec::new("auth.token.extended").with_payload(json!({
                    "token_id": record.token_id,
                    "old_expires_at": record.expires_at.to_rfc3339(),
                    "new_expires_at": next.expires_at.to_rfc3339(),
                }))),
            );
            return Ok(match outcome {
                Ok(_) => TokenValidation::Valid {
                    record: next,
                    extended: true,
                },
                Err(err) => {
                    // Validation already succeeded; the extension write is
                    // best-effort and failure only means no new expiry.
                    warn!(token_id = %record.token_id, error = %err, "token extension write failed");
                    TokenValidation::Valid {
                        record,
                        extended: false,
                    }
                }
            });
        }

        Ok(TokenValidation::Valid {
            record,
            extended: false,
        })
    }

    /// Revoke by token id. A full-key scan, for the admin path where only
    /// the id from an audit trail is at hand.
    pub fn revoke(
        &self,
        tenant_id: TenantId,
        token_id: TokenId,
        actor: Actor,
        reason: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<bool> {
        for (header, version) in self.store.scan_current(&EntityKind::Token)? {
            if header.tenant_id != tenant_id {
                continue;
            }
            let record = TokenRecord::from_version(tenant_id, &version)?;
            if record.token_id == token_id {
                return self.revoke_record(&record, actor, reason, now);
            }
        }
        Err(CoreError::NotFound)
    }

    /// Revoke every live token linked to a session.
    pub fn revoke_for_session(
        &self,
        tenant_id: TenantId,
        session_id: SessionId,
        actor: Actor,
        reason: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<usize> {
        let links = self
            .links
            .links_from(session_entity_id(tenant_id, session_id), SESSION_TOKEN_LINK)?;
        let mut revoked = 0;
        for link in links {
            let Some(version) = self.store.find_current(link.to)? else {
                continue;
            };
            let record = TokenRecord::from_version(tenant_id, &version)?;
            if self.revoke_record(&record, actor.clone(), reason, now)? {
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    fn revoke_record(
        &self,
        record: &TokenRecord,
        actor: Actor,
        reason: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<bool> {
        if record.revoked {
            return Ok(false);
        }
        let mut next = record.clone();
        next.revoked = true;
        self.store.put_with_event(
            record.tenant_id,
            EntityKind::Token,
            &token_key(&record.token_hash),
            next.to_attributes()?,
            actor,
            now,
            Some(
                AuditSpec::new("auth.token.revoked")
                    .with_severity(Severity::Warning)
                    .with_payload(json!({ "token_id": record.token_id, "reason": reason })),
            ),
        )?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use idvault_audit::{AuditFilter, AuditSink, InMemoryAuditSink};
    use idvault_store::InMemoryVersionStore;

    use super::*;

    struct Fixture {
        manager: TokenManager<Arc<InMemoryVersionStore>>,
        audit: Arc<InMemoryAuditSink>,
        tenant: TenantId,
        user: UserId,
    }

    fn fixture() -> Fixture {
        let audit = Arc::new(InMemoryAuditSink::new());
        let store = Arc::new(EntityStore::new(
            Arc::new(InMemoryVersionStore::new()),
            audit.clone(),
        ));
        Fixture {
            manager: TokenManager::new(store, Arc::new(LinkStore::new())),
            audit,
            tenant: TenantId::new(),
            user: UserId::new(),
        }
    }

    fn hour() -> Duration {
        Duration::hours(1)
    }

    #[test]
    fn issue_and_validate() {
        let f = fixture();
        let t0 = Utc::now();
        let issued = f
            .manager
            .issue(f.tenant, f.user, None, "api", hour(), t0)
            .unwrap();
        assert_eq!(issued.raw_token.len(), 64);
        assert_eq!(issued.expires_at, t0 + hour());

        match f.manager.validate(f.tenant, &issued.raw_token, t0).unwrap() {
            TokenValidation::Valid { record, extended } => {
                assert_eq!(record.subject_id, f.user);
                assert_eq!(record.scope, "api");
                assert!(!extended);
            }
            other => panic!("expected Valid, got {other:?}"),
        }

        // Wrong tenant or garbage token both miss.
        assert_eq!(
            f.manager
                .validate(TenantId::new(), &issued.raw_token, t0)
                .unwrap(),
            TokenValidation::NotFound
        );
        assert_eq!(
            f.manager.validate(f.tenant, "nope", t0).unwrap(),
            TokenValidation::NotFound
        );
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let f = fixture();
        let t0 = Utc::now();
        let issued = f
            .manager
            .issue(f.tenant, f.user, None, "api", hour(), t0)
            .unwrap();

        let just_before = issued.expires_at - Duration::seconds(1);
        assert!(matches!(
            f.manager.validate(f.tenant, &issued.raw_token, just_before).unwrap(),
            TokenValidation::Valid { .. }
        ));
        assert_eq!(
            f.manager
                .validate(f.tenant, &issued.raw_token, issued.expires_at)
                .unwrap(),
            TokenValidation::Expired
        );
    }

    #[test]
    fn sliding_expiry_extends_under_threshold() {
        let f = fixture();
        let t0 = Utc::now();
        let issued = f
            .manager
            .issue(f.tenant, f.user, None, "api", hour(), t0)
            .unwrap();
        let policy = ExtendPolicy::sliding(Duration::minutes(10), hour());

        // Plenty of lifetime left: no extension.
        let early = t0 + Duration::minutes(5);
        match f
            .manager
            .validate_with(f.tenant, &issued.raw_token, early, &policy)
            .unwrap()
        {
            TokenValidation::Valid { extended, record } => {
                assert!(!extended);
                assert_eq!(record.expires_at, issued.expires_at);
            }
            other => panic!("expected Valid, got {other:?}"),
        }

        // Inside the threshold: extended to now + extend_by.
        let late = t0 + Duration::minutes(55);
        match f
            .manager
            .validate_with(f.tenant, &issued.raw_token, late, &policy)
            .unwrap()
        {
            TokenValidation::Valid { extended, record } => {
                assert!(extended);
                assert_eq!(record.expires_at, late + hour());
            }
            other => panic!("expected Valid, got {other:?}"),
        }

        let events = f
            .audit
            .query(&AuditFilter::for_tenant(f.tenant).with_event_type("auth.token.extended"))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].payload.get("new_expires_at").and_then(|v| v.as_str()),
            Some((late + hour()).to_rfc3339().as_str())
        );
    }

    #[test]
    fn extension_triggers_at_exactly_the_threshold() {
        let f = fixture();
        let t0 = Utc::now();
        let issued = f
            .manager
            .issue(f.tenant, f.user, None, "api", hour(), t0)
            .unwrap();
        let policy = ExtendPolicy::sliding(Duration::minutes(10), hour());

        // Exactly ten minutes of lifetime left counts as "at most".
        let at_threshold = issued.expires_at - Duration::minutes(10);
        match f
            .manager
            .validate_with(f.tenant, &issued.raw_token, at_threshold, &policy)
            .unwrap()
        {
            TokenValidation::Valid { extended, record } => {
                assert!(extended);
                assert_eq!(record.expires_at, at_threshold + hour());
            }
            other => panic!("expected Valid, got {other:?}"),
        }
    }

    #[test]
    fn revoke_by_id_wins_over_expiry_check() {
        let f = fixture();
        let t0 = Utc::now();
        let issued = f
            .manager
            .issue(f.tenant, f.user, None, "api", hour(), t0)
            .unwrap();

        assert!(f
            .manager
            .revoke(f.tenant, issued.token_id, Actor::system("admin"), "compromised", t0)
            .unwrap());
        // Idempotent.
        assert!(!f
            .manager
            .revoke(f.tenant, issued.token_id, Actor::system("admin"), "compromised", t0)
            .unwrap());

        assert_eq!(
            f.manager
                .validate(f.tenant, &issued.raw_token, t0 + Duration::hours(2))
                .unwrap(),
            TokenValidation::Revoked
        );

        assert!(matches!(
            f.manager
                .revoke(f.tenant, TokenId::new(), Actor::system("admin"), "x", t0),
            Err(CoreError::NotFound)
        ));
    }

    struct FailingCommitStore {
        inner: InMemoryVersionStore,
        fail: std::sync::atomic::AtomicBool,
    }

    impl FailingCommitStore {
        fn new() -> Self {
            Self {
                inner: InMemoryVersionStore::new(),
                fail: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn fail_commits(&self, fail: bool) {
            self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
        }
    }

    impl VersionStore for FailingCommitStore {
        fn insert_header(&self, header: idvault_store::EntityHeader) -> CoreResult<()> {
            self.inner.insert_header(header)
        }

        fn load_header(
            &self,
            entity_id: EntityId,
        ) -> CoreResult<Option<idvault_store::EntityHeader>> {
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
            expected_current: Option<idvault_core::VersionId>,
            version: EntityVersion,
        ) -> CoreResult<bool> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(CoreError::internal_msg("commit_version", "backend unavailable"));
            }
            self.inner.commit_version(expected_current, version)
        }

        fn scan_current(
            &self,
            kind: &EntityKind,
        ) -> CoreResult<Vec<(idvault_store::EntityHeader, EntityVersion)>> {
            self.inner.scan_current(kind)
        }
    }

    #[test]
    fn failed_extension_write_keeps_the_token_valid() {
        let audit = Arc::new(InMemoryAuditSink::new());
        let backend = Arc::new(FailingCommitStore::new());
        let store = Arc::new(EntityStore::new(backend.clone(), audit.clone()));
        let manager = TokenManager::new(store, Arc::new(LinkStore::new()));
        let tenant = TenantId::new();
        let user = UserId::new();
        let t0 = Utc::now();

        let issued = manager.issue(tenant, user, None, "api", hour(), t0).unwrap();
        backend.fail_commits(true);

        let policy = ExtendPolicy::sliding(Duration::minutes(10), hour());
        let late = t0 + Duration::minutes(55);
        match manager
            .validate_with(tenant, &issued.raw_token, late, &policy)
            .unwrap()
        {
            TokenValidation::Valid { extended, record } => {
                assert!(!extended);
                assert_eq!(record.expires_at, issued.expires_at);
            }
            other => panic!("expected Valid, got {other:?}"),
        }
        assert!(audit
            .query(&AuditFilter::for_tenant(tenant).with_event_type("auth.token.extended"))
            .unwrap()
            .is_empty());

        // Once the backend recovers, the next validation extends normally.
        backend.fail_commits(false);
        assert!(matches!(
            manager
                .validate_with(tenant, &issued.raw_token, late, &policy)
                .unwrap(),
            TokenValidation::Valid { extended: true, .. }
        ));
    }

    #[test]
    fn session_tokens_revoked_together() {
        let f = fixture();
        let t0 = Utc::now();
        let session_id = SessionId::new();
        let a = f
            .manager
            .issue(f.tenant, f.user, Some(session_id), "api", hour(), t0)
            .unwrap();
        let b = f
            .manager
            .issue(f.tenant, f.user, Some(session_id), "refresh", hour(), t0)
            .unwrap();
        let loose = f
            .manager
            .issue(f.tenant, f.user, None, "api", hour(), t0)
            .unwrap();

        let revoked = f
            .manager
            .revoke_for_session(f.tenant, session_id, Actor::system("logout"), "logout", t0)
            .unwrap();
        assert_eq!(revoked, 2);

        for raw in [&a.raw_token, &b.raw_token] {
            assert_eq!(
                f.manager.validate(f.tenant, raw, t0).unwrap(),
                TokenValidation::Revoked
            );
        }
        assert!(matches!(
            f.manager.validate(f.tenant, &loose.raw_token, t0).unwrap(),
            TokenValidation::Valid { .. }
        ));
    }
}
