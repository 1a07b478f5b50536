//! `idvault-store` — bitemporal versioned entity store.
//!
//! Hub/satellite model: immutable [`EntityHeader`]s plus time-sliced
//! [`EntityVersion`]s. The store guarantees **exactly one current version per
//! entity** under concurrent writers via a single-row compare-and-set, with a
//! bounded retry loop in the [`EntityStore`] engine. No storage assumptions
//! beyond atomic conditional writes; the in-memory backend is the test/dev
//! implementation.

pub mod engine;
pub mod in_memory;
pub mod links;
pub mod schema;
pub mod store;
pub mod version;

pub use engine::{AuditSpec, EntityStore, PutConfig};
pub use in_memory::InMemoryVersionStore;
pub use links::{EntityLink, LinkStore};
pub use schema::EntityKind;
pub use store::VersionStore;
pub use version::{EntityHeader, EntityVersion, PutOutcome};
