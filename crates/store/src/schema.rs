//! Per-kind attribute schemas.
//!
//! The stored blob is a serialization detail; the contract is a typed schema
//! validated at the `put` boundary. Unknown kinds (`Custom`) skip validation.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

use idvault_core::{Attributes, CoreError, CoreResult};

/// Kind of a versioned entity; selects the attribute schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Credential,
    Session,
    Token,
    SecurityPolicy,
    Custom(String),
}

impl EntityKind {
    pub fn as_str(&self) -> &str {
        match self {
            EntityKind::Credential => "credential",
            EntityKind::Session => "session",
            EntityKind::Token => "token",
            EntityKind::SecurityPolicy => "security_policy",
            EntityKind::Custom(name) => name,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "credential" => EntityKind::Credential,
            "session" => EntityKind::Session,
            "token" => EntityKind::Token,
            "security_policy" => EntityKind::SecurityPolicy,
            other => EntityKind::Custom(other.to_string()),
        }
    }
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EntityKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EntityKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_name(&s))
    }
}

/// Expected JSON shape of a required attribute.
#[derive(Debug, Copy, Clone)]
enum FieldType {
    Str,
    Int,
    Bool,
    /// RFC 3339 string or null.
    TimeOrNull,
}

fn required_fields(kind: &EntityKind) -> &'static [(&'static str, FieldType)] {
    match kind {
        EntityKind::Credential => &[
            ("password_hash", FieldType::Str),
            ("failed_attempts", FieldType::Int),
            ("locked_until", FieldType::TimeOrNull),
        ],
        EntityKind::Session => &[
            ("user_id", FieldType::Str),
            ("status", FieldType::Str),
            ("started_at", FieldType::TimeOrNull),
            ("last_activity_at", FieldType::TimeOrNull),
        ],
        EntityKind::Token => &[
            ("token_hash", FieldType::Str),
            ("subject_id", FieldType::Str),
            ("expires_at", FieldType::TimeOrNull),
            ("revoked", FieldType::Bool),
        ],
        EntityKind::SecurityPolicy => &[
            ("password_min_length", FieldType::Int),
            ("lockout_threshold", FieldType::Int),
        ],
        EntityKind::Custom(_) => &[],
    }
}

/// Validate an attribute set against its kind's schema.
pub fn validate_attributes(kind: &EntityKind, attributes: &Attributes) -> CoreResult<()> {
    for (field, ty) in required_fields(kind) {
        let value = attributes.get(field).ok_or_else(|| {
            CoreError::validation(format!("{kind}: missing attribute '{field}'"))
        })?;
        let ok = match ty {
            FieldType::Str => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Bool => value.is_boolean(),
            FieldType::TimeOrNull => match value {
                JsonValue::Null => true,
                JsonValue::String(_) => attributes.get_time(field).is_ok(),
                _ => false,
            },
        };
        if !ok {
            return Err(CoreError::validation(format!(
                "{kind}: attribute '{field}' has wrong type"
            )));
        }
    }
    Ok(())
}
