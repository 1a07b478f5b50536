//! Hub/satellite records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use idvault_core::{Attributes, Digest, EntityId, TenantId, VersionId};

use crate::schema::EntityKind;

/// Immutable identity record for a versioned entity (the "hub").
///
/// Created once, never mutated. The `entity_id` is content-derived from
/// `(tenant_id, business_key)`, so the header also serves as the collision
/// guard: an id can never be re-bound to a different business key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityHeader {
    pub entity_id: EntityId,
    pub tenant_id: TenantId,
    pub business_key: String,
    pub kind: EntityKind,
    pub created_at: DateTime<Utc>,
}

/// A time-sliced attribute snapshot (the "satellite").
///
/// A version is **current** while `valid_to` is `None`. The store invariant
/// is that at most one version per entity is current at any instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityVersion {
    pub entity_id: EntityId,
    pub version_id: VersionId,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub content_hash: Digest,
    pub attributes: Attributes,
}

impl EntityVersion {
    pub fn is_current(&self) -> bool {
        self.valid_to.is_none()
    }

    /// Whether this version was current at `at` (`valid_from <= at < valid_to`).
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && self.valid_to.map_or(true, |to| at < to)
    }
}

/// Result of a `put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// First version of a new entity.
    Created(EntityVersion),
    /// A new version superseding the previous current one.
    Updated(EntityVersion),
    /// Content hash matched the current version; nothing written.
    Unchanged(EntityVersion),
}

impl PutOutcome {
    pub fn version(&self) -> &EntityVersion {
        match self {
            PutOutcome::Created(v) | PutOutcome::Updated(v) | PutOutcome::Unchanged(v) => v,
        }
    }

    pub fn changed(&self) -> bool {
        !matches!(self, PutOutcome::Unchanged(_))
    }
}
