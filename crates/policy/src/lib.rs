//! `idvault-policy` — per-tenant security policy engine.
//!
//! Policies are versioned entities like everything else, so policy changes are
//! bitemporally auditable. Tenants without a stored policy get safe defaults.

pub mod compliance;
pub mod engine;
pub mod policy;
pub mod rules;

pub use compliance::{ComplianceBaseline, ComplianceViolation, validate_compliance};
pub use engine::PolicyEngine;
pub use policy::SecurityPolicy;
pub use rules::{PasswordCheck, PasswordViolation, validate_password};
