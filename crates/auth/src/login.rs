//! The login front door.
//!
//! `Authenticator` wires the pieces together in the only safe order: rate
//! limit first (before any hashing work), then the credential check, then a
//! session and a bearer token for the winner. Logout is the reverse, one
//! session revocation fanning out to its tokens.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use idvault_audit::Actor;
use idvault_core::{CoreResult, SessionId, TenantId, UserId};
use idvault_policy::PolicyEngine;
use idvault_ratelimit::{Decision, RateLimiter};
use idvault_store::{EntityStore, LinkStore, VersionStore};

use crate::credential::{CredentialManager, CredentialOutcome};
use crate::session::{SessionManager, SessionRecord};
use crate::token::{IssuedToken, TokenManager};

/// Rate-limited operation name for login attempts.
pub const LOGIN_OPERATION: &str = "login";

/// Scope stamped on tokens minted at login.
pub const SESSION_SCOPE: &str = "session";

/// Outcome of a login attempt.
#[derive(Debug)]
pub enum LoginOutcome {
    Authenticated {
        session: SessionRecord,
        token: IssuedToken,
    },
    /// Unknown user or wrong secret; the two are indistinguishable here.
    Rejected,
    Locked {
        retry_after: chrono::Duration,
    },
    RateLimited {
        retry_after: chrono::Duration,
    },
}

/// End-to-end authentication over the underlying managers.
pub struct Authenticator<S> {
    policy: Arc<PolicyEngine<S>>,
    credentials: CredentialManager<S>,
    sessions: SessionManager<S>,
    tokens: TokenManager<S>,
    limiter: Arc<RateLimiter>,
}

impl<S: VersionStore> Authenticator<S> {
    pub fn new(store: Arc<EntityStore<S>>, links: Arc<LinkStore>) -> Self {
        let policy = Arc::new(PolicyEngine::new(store.clone()));
        let limiter = Arc::new(RateLimiter::new().with_audit(store.audit().clone()));
        Self {
            credentials: CredentialManager::new(store.clone(), policy.clone()),
            sessions: SessionManager::new(store.clone(), policy.clone(), links.clone()),
            tokens: TokenManager::new(store, links),
            policy,
            limiter,
        }
    }

    pub fn policy(&self) -> &Arc<PolicyEngine<S>> {
        &self.policy
    }

    /// The login rate limiter, exposed so a [`crate::sweep::Sweeper`] can
    /// prune its finished window buckets.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn credentials(&self) -> &CredentialManager<S> {
        &self.credentials
    }

    pub fn sessions(&self) -> &SessionManager<S> {
        &self.sessions
    }

    pub fn tokens(&self) -> &TokenManager<S> {
        &self.tokens
    }

    /// Authenticate and, on success, open a session with a bearer token.
    pub fn login(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        secret: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<LoginOutcome> {
        let policy = self.policy.get_policy(tenant_id)?;
        let decision = self.limiter.check_and_increment(
            tenant_id,
            &user_id.to_string(),
            LOGIN_OPERATION,
            policy.rate_limit_window(),
            policy.rate_limit_requests,
            now,
        )?;
        if let Decision::RateLimited { retry_after } = decision {
            return Ok(LoginOutcome::RateLimited { retry_after });
        }

        match self.credentials.check_credential(tenant_id, user_id, secret, now)? {
            CredentialOutcome::Valid { user_id } => {
                let session = self.sessions.create_session(tenant_id, user_id, now)?;
                let token = self.tokens.issue(
                    tenant_id,
                    user_id,
                    Some(session.session_id),
                    SESSION_SCOPE,
                    policy.token_ttl(),
                    now,
                )?;
                Ok(LoginOutcome::Authenticated { session, token })
            }
            CredentialOutcome::Locked { retry_after } => Ok(LoginOutcome::Locked { retry_after }),
            CredentialOutcome::Unauthorized | CredentialOutcome::NotFound => {
                Ok(LoginOutcome::Rejected)
            }
        }
    }

    /// Tear down a session and every token minted against it.
    ///
    /// Returns the number of tokens revoked. Idempotent: a second logout of
    /// the same session revokes nothing further.
    pub fn logout(
        &self,
        tenant_id: TenantId,
        session_id: SessionId,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> CoreResult<usize> {
        self.sessions
            .invalidate_session(tenant_id, session_id, actor.clone(), now)?;
        self.tokens
            .revoke_for_session(tenant_id, session_id, actor, "logout", now)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use idvault_audit::InMemoryAuditSink;
    use idvault_policy::SecurityPolicy;
    use idvault_store::InMemoryVersionStore;

    use crate::session::SessionValidation;
    use crate::token::TokenValidation;

    use super::*;

    fn authenticator() -> Authenticator<Arc<InMemoryVersionStore>> {
        let store = Arc::new(EntityStore::new(
            Arc::new(InMemoryVersionStore::new()),
            Arc::new(InMemoryAuditSink::new()),
        ));
        Authenticator::new(store, Arc::new(LinkStore::new()))
    }

    const SECRET: &str = "Correct-Horse-9";

    #[test]
    fn login_mints_session_and_token() {
        let auth = authenticator();
        let tenant = TenantId::new();
        let user = UserId::new();
        let t0 = Utc::now();
        auth.credentials().register(tenant, user, SECRET, t0).unwrap();

        let LoginOutcome::Authenticated { session, token } =
            auth.login(tenant, user, SECRET, t0).unwrap()
        else {
            panic!("expected Authenticated");
        };
        assert_eq!(session.user_id, user);
        assert_eq!(token.expires_at, t0 + Duration::hours(1));

        assert!(matches!(
            auth.tokens().validate(tenant, &token.raw_token, t0).unwrap(),
            TokenValidation::Valid { .. }
        ));
    }

    #[test]
    fn wrong_secret_and_unknown_user_look_identical() {
        let auth = authenticator();
        let tenant = TenantId::new();
        let user = UserId::new();
        let t0 = Utc::now();
        auth.credentials().register(tenant, user, SECRET, t0).unwrap();

        assert!(matches!(
            auth.login(tenant, user, "Wrong-Horse-9", t0).unwrap(),
            LoginOutcome::Rejected
        ));
        assert!(matches!(
            auth.login(tenant, UserId::new(), SECRET, t0).unwrap(),
            LoginOutcome::Rejected
        ));
    }

    #[test]
    fn attempts_over_the_window_budget_are_limited() {
        let auth = authenticator();
        let tenant = TenantId::new();
        let user = UserId::new();
        let t0 = Utc::now();
        let mut policy = SecurityPolicy::default();
        policy.rate_limit_requests = 3;
        auth.policy()
            .set_policy(tenant, &policy, Actor::system("test"), t0)
            .unwrap();
        auth.credentials().register(tenant, user, SECRET, t0).unwrap();

        for _ in 0..3 {
            assert!(matches!(
                auth.login(tenant, user, "Wrong-Horse-9", t0).unwrap(),
                LoginOutcome::Rejected
            ));
        }
        // Even the correct secret is turned away without a credential check.
        match auth.login(tenant, user, SECRET, t0).unwrap() {
            LoginOutcome::RateLimited { retry_after } => {
                assert!(retry_after <= Duration::seconds(60));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn logout_revokes_session_and_tokens() {
        let auth = authenticator();
        let tenant = TenantId::new();
        let user = UserId::new();
        let t0 = Utc::now();
        auth.credentials().register(tenant, user, SECRET, t0).unwrap();

        let LoginOutcome::Authenticated { session, token } =
            auth.login(tenant, user, SECRET, t0).unwrap()
        else {
            panic!("expected Authenticated");
        };

        let revoked = auth.logout(tenant, session.session_id, Actor::User(user), t0).unwrap();
        assert_eq!(revoked, 1);
        assert_eq!(
            auth.sessions()
                .validate_session(tenant, session.session_id, t0)
                .unwrap(),
            SessionValidation::Revoked
        );
        assert_eq!(
            auth.tokens().validate(tenant, &token.raw_token, t0).unwrap(),
            TokenValidation::Revoked
        );

        // Second logout finds nothing left to revoke.
        assert_eq!(
            auth.logout(tenant, session.session_id, Actor::User(user), t0).unwrap(),
            0
        );
    }

    #[test]
    fn locked_account_reported_with_retry_after() {
        let auth = authenticator();
        let tenant = TenantId::new();
        let user = UserId::new();
        let t0 = Utc::now();
        auth.credentials().register(tenant, user, SECRET, t0).unwrap();

        for i in 1..=5 {
            auth.login(tenant, user, "Wrong-Horse-9", t0 + Duration::seconds(i))
                .unwrap();
        }
        match auth.login(tenant, user, SECRET, t0 + Duration::seconds(10)).unwrap() {
            LoginOutcome::Locked { retry_after } => {
                assert!(retry_after > Duration::minutes(29));
            }
            other => panic!("expected Locked, got {other:?}"),
        }
    }
}
