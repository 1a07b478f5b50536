//! Versioned entity storage trait.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use idvault_core::{CoreResult, EntityId, VersionId};

use crate::schema::EntityKind;
use crate::version::{EntityHeader, EntityVersion};

/// Storage primitives for the versioned entity store.
///
/// ## Design Principles
///
/// - **No storage assumptions**: the backend only needs atomic single-row
///   conditional writes; the in-memory implementation serves tests/dev and a
///   SQL backend can satisfy the same contract with a
///   `WHERE valid_to IS NULL AND version_id = $expected` update.
/// - **Tenant isolation by construction**: entity ids are derived from
///   `(tenant, business_key)`, so cross-tenant ids never collide.
/// - **Append-only history**: versions are closed, never deleted.
///
/// ## The CAS contract
///
/// `commit_version` is the single serialization point. It must atomically:
/// check that the entity's current version matches `expected_current`
/// (`None` = "no version yet"), close it with `valid_to = new.valid_from`,
/// and insert the new open version — or do **nothing** and report a lost
/// race. A cancelled or raced call must never leave zero or two open
/// versions behind.
pub trait VersionStore: Send + Sync {
    /// Insert a header if absent. Idempotent for an identical header;
    /// `Conflict` if the id is already bound to a different key/tenant/kind.
    fn insert_header(&self, header: EntityHeader) -> CoreResult<()>;

    fn load_header(&self, entity_id: EntityId) -> CoreResult<Option<EntityHeader>>;

    /// The current (open) version, if any.
    fn current(&self, entity_id: EntityId) -> CoreResult<Option<EntityVersion>>;

    /// The version covering `at`, if any.
    fn as_of(&self, entity_id: EntityId, at: DateTime<Utc>) -> CoreResult<Option<EntityVersion>>;

    /// All versions, oldest first. Empty if the entity has none.
    fn history(&self, entity_id: EntityId) -> CoreResult<Vec<EntityVersion>>;

    /// The CAS: atomically close `expected_current` and insert `version`.
    /// Returns `false` when another writer won the race.
    fn commit_version(
        &self,
        expected_current: Option<VersionId>,
        version: EntityVersion,
    ) -> CoreResult<bool>;

    /// Open versions of every entity of `kind`, with their headers.
    /// Used by background sweeps.
    fn scan_current(&self, kind: &EntityKind) -> CoreResult<Vec<(EntityHeader, EntityVersion)>>;
}

impl<S> VersionStore for Arc<S>
where
    S: VersionStore + ?Sized,
{
    fn insert_header(&self, header: EntityHeader) -> CoreResult<()> {
        (**self).insert_header(header)
    }

    fn load_header(&self, entity_id: EntityId) -> CoreResult<Option<EntityHeader>> {
        (**self).load_header(entity_id)
    }

    fn current(&self, entity_id: EntityId) -> CoreResult<Option<EntityVersion>> {
        (**self).current(entity_id)
    }

    fn as_of(&self, entity_id: EntityId, at: DateTime<Utc>) -> CoreResult<Option<EntityVersion>> {
        (**self).as_of(entity_id, at)
    }

    fn history(&self, entity_id: EntityId) -> CoreResult<Vec<EntityVersion>> {
        (**self).history(entity_id)
    }

    fn commit_version(
        &self,
        expected_current: Option<VersionId>,
        version: EntityVersion,
    ) -> CoreResult<bool> {
        (**self).commit_version(expected_current, version)
    }

    fn scan_current(&self, kind: &EntityKind) -> CoreResult<Vec<(EntityHeader, EntityVersion)>> {
        (**self).scan_current(kind)
    }
}
