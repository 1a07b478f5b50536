//! `idvault-core` — identity-state foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no storage concerns):
//! typed identifiers, the shared error taxonomy, key derivation and canonical
//! content hashing, and the clock abstraction used by time-sensitive
//! components.

pub mod attributes;
pub mod clock;
pub mod error;
pub mod id;
pub mod keys;

pub use attributes::Attributes;
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{CoreError, CoreResult};
pub use id::{AuditEventId, EntityId, SessionId, TenantId, TokenId, UserId, VersionId};
pub use keys::{Digest, content_hash, derive_entity_id};
