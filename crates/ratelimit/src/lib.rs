//! `idvault-ratelimit` — windowed request counting per (tenant, subject, operation).

pub mod limiter;

pub use limiter::{Decision, RateLimiter};
