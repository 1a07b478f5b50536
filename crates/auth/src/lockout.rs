//! Lockout state, derived from credential attributes.
//!
//! Lockout is not its own entity: it is a view over a credential's failure
//! counters and `locked_until`, so every transition is a credential version
//! and therefore bitemporally auditable.

use chrono::{DateTime, Duration, Utc};

use idvault_core::{Attributes, CoreResult};

use crate::credential::attr;

/// Derived lockout state of a credential at an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutState {
    /// Accepting attempts; `failures` consecutive failures so far.
    Open { failures: u32 },
    /// Rejecting all attempts until `until`.
    Locked { until: DateTime<Utc> },
}

impl LockoutState {
    /// Evaluate a credential's attributes at `now`.
    ///
    /// An elapsed `locked_until` reads as `Open { failures: 0 }`: the stored
    /// counter belongs to the finished lockout episode and must not carry
    /// into the next one.
    pub fn of(attributes: &Attributes, now: DateTime<Utc>) -> CoreResult<Self> {
        let locked_until = attributes.get_time(attr::LOCKED_UNTIL)?;
        match locked_until {
            Some(until) if until > now => Ok(LockoutState::Locked { until }),
            Some(_) => Ok(LockoutState::Open { failures: 0 }),
            None => {
                let failures = attributes
                    .get_i64(attr::FAILED_ATTEMPTS)
                    .unwrap_or(0)
                    .max(0) as u32;
                Ok(LockoutState::Open { failures })
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, LockoutState::Locked { .. })
    }

    /// Time left on an active lockout, at `now`.
    pub fn retry_after(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            LockoutState::Locked { until } => Some(*until - now),
            LockoutState::Open { .. } => None,
        }
    }
}
