//! Entity link table.
//!
//! Parent/child and ownership relationships are rows of
//! `(from, to, relationship)` resolved by id lookups, not in-memory object
//! graphs. Links carry no attributes; anything versioned belongs in a
//! satellite.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use idvault_core::{CoreError, CoreResult, EntityId};

/// A directed, typed relationship between two entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityLink {
    pub from: EntityId,
    pub to: EntityId,
    pub relationship: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LinkIndex {
    forward: HashMap<EntityId, Vec<EntityLink>>,
    reverse: HashMap<EntityId, Vec<EntityLink>>,
}

/// In-memory link table, indexed in both directions.
#[derive(Debug, Default)]
pub struct LinkStore {
    index: RwLock<LinkIndex>,
}

impl LinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a link. Idempotent for an existing `(from, to, relationship)`.
    pub fn link(
        &self,
        from: EntityId,
        to: EntityId,
        relationship: impl Into<String>,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        let relationship = relationship.into();
        let mut index = self
            .index
            .write()
            .map_err(|_| CoreError::internal_msg("link", "lock poisoned"))?;

        let exists = index
            .forward
            .get(&from)
            .is_some_and(|links| links.iter().any(|l| l.to == to && l.relationship == relationship));
        if exists {
            return Ok(());
        }

        let link = EntityLink {
            from,
            to,
            relationship,
            created_at: now,
        };
        index.forward.entry(from).or_default().push(link.clone());
        index.reverse.entry(to).or_default().push(link);
        Ok(())
    }

    /// Remove a link. Returns whether it existed.
    pub fn unlink(&self, from: EntityId, to: EntityId, relationship: &str) -> CoreResult<bool> {
        let mut index = self
            .index
            .write()
            .map_err(|_| CoreError::internal_msg("unlink", "lock poisoned"))?;

        let mut removed = false;
        if let Some(links) = index.forward.get_mut(&from) {
            let before = links.len();
            links.retain(|l| !(l.to == to && l.relationship == relationship));
            removed = links.len() != before;
        }
        if removed {
            if let Some(links) = index.reverse.get_mut(&to) {
                links.retain(|l| !(l.from == from && l.relationship == relationship));
            }
        }
        Ok(removed)
    }

    /// Outgoing links of one relationship type.
    pub fn links_from(&self, from: EntityId, relationship: &str) -> CoreResult<Vec<EntityLink>> {
        let index = self
            .index
            .read()
            .map_err(|_| CoreError::internal_msg("links_from", "lock poisoned"))?;
        Ok(index
            .forward
            .get(&from)
            .map(|links| {
                links
                    .iter()
                    .filter(|l| l.relationship == relationship)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Incoming links of one relationship type.
    pub fn links_to(&self, to: EntityId, relationship: &str) -> CoreResult<Vec<EntityLink>> {
        let index = self
            .index
            .read()
            .map_err(|_| CoreError::internal_msg("links_to", "lock poisoned"))?;
        Ok(index
            .reverse
            .get(&to)
            .map(|links| {
                links
                    .iter()
                    .filter(|l| l.relationship == relationship)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use idvault_core::{TenantId, derive_entity_id};

    use super::*;

    fn id(key: &str) -> EntityId {
        derive_entity_id(TenantId::from_uuid(uuid::Uuid::nil()), key)
    }

    #[test]
    fn link_is_idempotent_and_indexed_both_ways() {
        let store = LinkStore::new();
        let (user, session) = (id("user/a"), id("session/1"));
        let now = Utc::now();

        store.link(user, session, "user-session", now).unwrap();
        store.link(user, session, "user-session", now).unwrap();

        assert_eq!(store.links_from(user, "user-session").unwrap().len(), 1);
        assert_eq!(store.links_to(session, "user-session").unwrap().len(), 1);
    }

    #[test]
    fn unlink_removes_both_directions() {
        let store = LinkStore::new();
        let (user, session) = (id("user/a"), id("session/1"));
        store.link(user, session, "user-session", Utc::now()).unwrap();

        assert!(store.unlink(user, session, "user-session").unwrap());
        assert!(!store.unlink(user, session, "user-session").unwrap());
        assert!(store.links_from(user, "user-session").unwrap().is_empty());
        assert!(store.links_to(session, "user-session").unwrap().is_empty());
    }

    #[test]
    fn relationship_types_are_independent() {
        let store = LinkStore::new();
        let (a, b) = (id("a"), id("b"));
        let now = Utc::now();
        store.link(a, b, "owns", now).unwrap();
        store.link(a, b, "manages", now).unwrap();

        assert_eq!(store.links_from(a, "owns").unwrap().len(), 1);
        assert_eq!(store.links_from(a, "manages").unwrap().len(), 1);
        store.unlink(a, b, "owns").unwrap();
        assert_eq!(store.links_from(a, "manages").unwrap().len(), 1);
    }
}
