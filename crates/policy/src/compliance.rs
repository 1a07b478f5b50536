//! Compliance baseline attestation.
//!
//! Compares a tenant's policy against a named baseline and reports every
//! unmet rule. Attestation only: results never block normal operation.

use serde::{Deserialize, Serialize};

use crate::policy::SecurityPolicy;

/// A named set of minimum requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceBaseline {
    pub name: String,
    pub min_password_length: u32,
    pub max_lockout_threshold: u32,
    pub max_session_idle_timeout_secs: i64,
    pub require_mfa: bool,
}

impl ComplianceBaseline {
    /// The strict attestation baseline: 12+ char passwords, lockout within 5
    /// failures, 15 minute idle timeout, MFA on.
    pub fn strict() -> Self {
        Self {
            name: "strict".to_string(),
            min_password_length: 12,
            max_lockout_threshold: 5,
            max_session_idle_timeout_secs: 15 * 60,
            require_mfa: true,
        }
    }
}

/// One unmet baseline rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "rule")]
pub enum ComplianceViolation {
    PasswordLength { required: u32, actual: u32 },
    LockoutThreshold { maximum: u32, actual: u32 },
    SessionIdleTimeout { maximum_secs: i64, actual_secs: i64 },
    MfaNotRequired,
}

impl core::fmt::Display for ComplianceViolation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ComplianceViolation::PasswordLength { required, actual } => write!(
                f,
                "password minimum length {actual} below required {required}"
            ),
            ComplianceViolation::LockoutThreshold { maximum, actual } => {
                write!(f, "lockout threshold {actual} above maximum {maximum}")
            }
            ComplianceViolation::SessionIdleTimeout {
                maximum_secs,
                actual_secs,
            } => write!(
                f,
                "session idle timeout {actual_secs}s above maximum {maximum_secs}s"
            ),
            ComplianceViolation::MfaNotRequired => write!(f, "MFA not required"),
        }
    }
}

/// Every baseline rule the policy fails to meet. Empty means compliant.
pub fn validate_compliance(
    policy: &SecurityPolicy,
    baseline: &ComplianceBaseline,
) -> Vec<ComplianceViolation> {
    let mut violations = Vec::new();

    if policy.password_min_length < baseline.min_password_length {
        violations.push(ComplianceViolation::PasswordLength {
            required: baseline.min_password_length,
            actual: policy.password_min_length,
        });
    }
    if policy.lockout_threshold > baseline.max_lockout_threshold {
        violations.push(ComplianceViolation::LockoutThreshold {
            maximum: baseline.max_lockout_threshold,
            actual: policy.lockout_threshold,
        });
    }
    if policy.session_idle_timeout_secs > baseline.max_session_idle_timeout_secs {
        violations.push(ComplianceViolation::SessionIdleTimeout {
            maximum_secs: baseline.max_session_idle_timeout_secs,
            actual_secs: policy.session_idle_timeout_secs,
        });
    }
    if baseline.require_mfa && !policy.mfa_required {
        violations.push(ComplianceViolation::MfaNotRequired);
    }

    violations
}
