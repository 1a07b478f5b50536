//! Password rule validation.

use serde::{Deserialize, Serialize};

use crate::policy::SecurityPolicy;

/// A single unmet password rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordViolation {
    TooShort { minimum: u32 },
    MissingUppercase,
    MissingLowercase,
    MissingDigit,
    MissingSymbol,
}

impl core::fmt::Display for PasswordViolation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PasswordViolation::TooShort { minimum } => {
                write!(f, "must be at least {minimum} characters")
            }
            PasswordViolation::MissingUppercase => write!(f, "must contain an uppercase letter"),
            PasswordViolation::MissingLowercase => write!(f, "must contain a lowercase letter"),
            PasswordViolation::MissingDigit => write!(f, "must contain a digit"),
            PasswordViolation::MissingSymbol => write!(f, "must contain a symbol"),
        }
    }
}

/// Outcome of checking a candidate password against a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordCheck {
    pub is_valid: bool,
    pub violations: Vec<PasswordViolation>,
}

/// Check `candidate` against the policy's character rules.
///
/// History checks need the stored hashes and live with the credential
/// manager; this is the pure rule part.
pub fn validate_password(policy: &SecurityPolicy, candidate: &str) -> PasswordCheck {
    let mut violations = Vec::new();

    if (candidate.chars().count() as u32) < policy.password_min_length {
        violations.push(PasswordViolation::TooShort {
            minimum: policy.password_min_length,
        });
    }
    if policy.password_require_uppercase && !candidate.chars().any(|c| c.is_uppercase()) {
        violations.push(PasswordViolation::MissingUppercase);
    }
    if policy.password_require_lowercase && !candidate.chars().any(|c| c.is_lowercase()) {
        violations.push(PasswordViolation::MissingLowercase);
    }
    if policy.password_require_digit && !candidate.chars().any(|c| c.is_ascii_digit()) {
        violations.push(PasswordViolation::MissingDigit);
    }
    if policy.password_require_symbol
        && !candidate.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace())
    {
        violations.push(PasswordViolation::MissingSymbol);
    }

    PasswordCheck {
        is_valid: violations.is_empty(),
        violations,
    }
}
