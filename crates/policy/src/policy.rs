//! Security policy record.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Tenant-scoped security configuration.
///
/// Durations are stored as whole seconds so the record serializes to plain
/// JSON attributes; accessor methods return `chrono::Duration`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub password_min_length: u32,
    pub password_require_uppercase: bool,
    pub password_require_lowercase: bool,
    pub password_require_digit: bool,
    pub password_require_symbol: bool,
    /// How many previous password hashes a new password is checked against.
    pub password_history_depth: u32,
    pub lockout_threshold: u32,
    pub lockout_duration_secs: i64,
    pub session_idle_timeout_secs: i64,
    pub session_absolute_timeout_secs: i64,
    pub token_ttl_secs: i64,
    pub mfa_required: bool,
    pub rate_limit_requests: u64,
    pub rate_limit_window_secs: i64,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            password_min_length: 8,
            password_require_uppercase: true,
            password_require_lowercase: true,
            password_require_digit: true,
            password_require_symbol: false,
            password_history_depth: 3,
            lockout_threshold: 5,
            lockout_duration_secs: 30 * 60,
            session_idle_timeout_secs: 30 * 60,
            session_absolute_timeout_secs: 12 * 60 * 60,
            token_ttl_secs: 60 * 60,
            mfa_required: false,
            rate_limit_requests: 60,
            rate_limit_window_secs: 60,
        }
    }
}

impl SecurityPolicy {
    pub fn lockout_duration(&self) -> Duration {
        Duration::seconds(self.lockout_duration_secs)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::seconds(self.session_idle_timeout_secs)
    }

    pub fn session_absolute_timeout(&self) -> Duration {
        Duration::seconds(self.session_absolute_timeout_secs)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::seconds(self.token_ttl_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::seconds(self.rate_limit_window_secs)
    }
}
