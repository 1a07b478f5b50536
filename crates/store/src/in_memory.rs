//! In-memory version store.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use idvault_core::{CoreError, CoreResult, EntityId, VersionId};

use crate::schema::EntityKind;
use crate::store::VersionStore;
use crate::version::{EntityHeader, EntityVersion};

#[derive(Debug, Clone)]
struct EntityRecord {
    header: EntityHeader,
    versions: Vec<EntityVersion>,
}

impl EntityRecord {
    fn current(&self) -> Option<&EntityVersion> {
        self.versions.iter().rev().find(|v| v.is_current())
    }
}

/// In-memory hub/satellite store.
///
/// The CAS runs under the write lock, so `commit_version` is atomic the same
/// way a conditional single-row update is. Intended for tests/dev; not
/// optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryVersionStore {
    entities: RwLock<HashMap<EntityId, EntityRecord>>,
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned(op: &str) -> CoreError {
    CoreError::internal_msg(op, "lock poisoned")
}

impl VersionStore for InMemoryVersionStore {
    fn insert_header(&self, header: EntityHeader) -> CoreResult<()> {
        let mut entities = self.entities.write().map_err(|_| poisoned("insert_header"))?;
        match entities.get(&header.entity_id) {
            None => {
                entities.insert(
                    header.entity_id,
                    EntityRecord {
                        header,
                        versions: Vec::new(),
                    },
                );
                Ok(())
            }
            Some(existing)
                if existing.header.tenant_id == header.tenant_id
                    && existing.header.business_key == header.business_key
                    && existing.header.kind == header.kind =>
            {
                Ok(())
            }
            Some(existing) => Err(CoreError::conflict(format!(
                "entity id already bound to business key '{}'",
                existing.header.business_key
            ))),
        }
    }

    fn load_header(&self, entity_id: EntityId) -> CoreResult<Option<EntityHeader>> {
        let entities = self.entities.read().map_err(|_| poisoned("load_header"))?;
        Ok(entities.get(&entity_id).map(|r| r.header.clone()))
    }

    fn current(&self, entity_id: EntityId) -> CoreResult<Option<EntityVersion>> {
        let entities = self.entities.read().map_err(|_| poisoned("current"))?;
        Ok(entities
            .get(&entity_id)
            .and_then(|r| r.current().cloned()))
    }

    fn as_of(&self, entity_id: EntityId, at: DateTime<Utc>) -> CoreResult<Option<EntityVersion>> {
        let entities = self.entities.read().map_err(|_| poisoned("as_of"))?;
        Ok(entities
            .get(&entity_id)
            .and_then(|r| r.versions.iter().find(|v| v.covers(at)).cloned()))
    }

    fn history(&self, entity_id: EntityId) -> CoreResult<Vec<EntityVersion>> {
        let entities = self.entities.read().map_err(|_| poisoned("history"))?;
        Ok(entities
            .get(&entity_id)
            .map(|r| r.versions.clone())
            .unwrap_or_default())
    }

    fn commit_version(
        &self,
        expected_current: Option<VersionId>,
        version: EntityVersion,
    ) -> CoreResult<bool> {
        if version.valid_to.is_some() {
            return Err(CoreError::validation("commit_version: new version must be open"));
        }

        let mut entities = self.entities.write().map_err(|_| poisoned("commit_version"))?;
        let record = entities
            .get_mut(&version.entity_id)
            .ok_or_else(|| CoreError::validation("commit_version: header not inserted"))?;

        let current_id = record.current().map(|v| v.version_id);
        if current_id != expected_current {
            // Another writer won; caller retries from the top.
            return Ok(false);
        }

        if let Some(open) = record.versions.iter_mut().rev().find(|v| v.is_current()) {
            open.valid_to = Some(version.valid_from);
        }
        record.versions.push(version);
        Ok(true)
    }

    fn scan_current(&self, kind: &EntityKind) -> CoreResult<Vec<(EntityHeader, EntityVersion)>> {
        let entities = self.entities.read().map_err(|_| poisoned("scan_current"))?;
        let mut out = Vec::new();
        for record in entities.values() {
            if &record.header.kind != kind {
                continue;
            }
            if let Some(current) = record.current() {
                out.push((record.header.clone(), current.clone()));
            }
        }
        Ok(out)
    }
}
