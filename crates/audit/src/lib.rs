//! `idvault-audit` — append-only audit event log.
//!
//! Every state-changing operation in the identity core records exactly one
//! audit event here. Events are never updated or deleted by normal operation.

pub mod event;
pub mod in_memory;
pub mod sink;

pub use event::{Actor, AuditEvent, NewAuditEvent, Severity};
pub use in_memory::InMemoryAuditSink;
pub use sink::{AuditFilter, AuditSink};
