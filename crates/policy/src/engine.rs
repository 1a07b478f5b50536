//! Policy lookup and storage.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use idvault_audit::Actor;
use idvault_core::{Attributes, CoreError, CoreResult, TenantId, derive_entity_id};
use idvault_store::{AuditSpec, EntityKind, EntityStore, PutOutcome, VersionStore};

use crate::policy::SecurityPolicy;

/// Business key of the singleton policy entity within a tenant.
const POLICY_BUSINESS_KEY: &str = "security-policy";

/// Loads and stores per-tenant [`SecurityPolicy`] entities.
pub struct PolicyEngine<S> {
    store: Arc<EntityStore<S>>,
}

impl<S: VersionStore> PolicyEngine<S> {
    pub fn new(store: Arc<EntityStore<S>>) -> Self {
        Self { store }
    }

    /// The tenant's current policy, or safe defaults if none is stored.
    pub fn get_policy(&self, tenant_id: TenantId) -> CoreResult<SecurityPolicy> {
        let entity_id = derive_entity_id(tenant_id, POLICY_BUSINESS_KEY);
        match self.store.find_current(entity_id)? {
            Some(version) => version.attributes.to_record(),
            None => Ok(SecurityPolicy::default()),
        }
    }

    /// The tenant's policy as of a past instant (defaults if none existed).
    pub fn get_policy_as_of(
        &self,
        tenant_id: TenantId,
        at: DateTime<Utc>,
    ) -> CoreResult<SecurityPolicy> {
        let entity_id = derive_entity_id(tenant_id, POLICY_BUSINESS_KEY);
        match self.store.get_as_of(entity_id, at) {
            Ok(version) => version.attributes.to_record(),
            Err(CoreError::NotFound) => Ok(SecurityPolicy::default()),
            Err(e) => Err(e),
        }
    }

    /// Write a new policy version for the tenant.
    pub fn set_policy(
        &self,
        tenant_id: TenantId,
        policy: &SecurityPolicy,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> CoreResult<PutOutcome> {
        let attributes = Attributes::from_record(policy)?;
        self.store.put_with_event(
            tenant_id,
            EntityKind::SecurityPolicy,
            POLICY_BUSINESS_KEY,
            attributes,
            actor,
            now,
            Some(AuditSpec::new("policy.updated").with_payload(json!({
                "lockout_threshold": policy.lockout_threshold,
                "password_min_length": policy.password_min_length,
                "mfa_required": policy.mfa_required,
            }))),
        )
    }
}
