//! Attribute sets carried by entity versions.
//!
//! An `Attributes` value is the typed payload of a satellite row. It is an
//! ordered map so the canonical byte encoding (and therefore the content hash)
//! is stable for logically-equal attribute sets.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{CoreError, CoreResult};

/// Ordered attribute map for a single entity version.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, JsonValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build attributes from any serializable record.
    ///
    /// The record must serialize to a JSON object; anything else is a
    /// validation error at the store boundary.
    pub fn from_record<T: Serialize>(record: &T) -> CoreResult<Self> {
        let value = serde_json::to_value(record)
            .map_err(|e| CoreError::validation(format!("attribute serialization: {e}")))?;
        match value {
            JsonValue::Object(map) => Ok(Self(map.into_iter().collect())),
            other => Err(CoreError::validation(format!(
                "attributes must be a JSON object, got {}",
                json_type(&other)
            ))),
        }
    }

    /// Deserialize the attribute set back into a typed record.
    pub fn to_record<T: for<'de> Deserialize<'de>>(&self) -> CoreResult<T> {
        let value = JsonValue::Object(self.0.clone().into_iter().collect());
        serde_json::from_value(value)
            .map_err(|e| CoreError::validation(format!("attribute deserialization: {e}")))
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Serialize) -> CoreResult<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| CoreError::validation(format!("attribute value: {e}")))?;
        self.0.insert(key.into(), value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<JsonValue> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(JsonValue::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(JsonValue::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(JsonValue::as_bool)
    }

    /// Read an RFC 3339 timestamp attribute. `null` and absent both read as `None`.
    pub fn get_time(&self, key: &str) -> CoreResult<Option<DateTime<Utc>>> {
        match self.0.get(key) {
            None | Some(JsonValue::Null) => Ok(None),
            Some(JsonValue::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|e| CoreError::validation(format!("attribute '{key}': {e}"))),
            Some(other) => Err(CoreError::validation(format!(
                "attribute '{key}': expected timestamp string, got {}",
                json_type(other)
            ))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }

    /// Canonical byte encoding for content hashing.
    ///
    /// JSON with sorted keys at every level (`BTreeMap` here, and serde_json's
    /// default object map is ordered too), so two logically-equal attribute
    /// sets encode to identical bytes.
    pub fn canonical_bytes(&self) -> CoreResult<Vec<u8>> {
        serde_json::to_vec(&self.0)
            .map_err(|e| CoreError::internal("canonical_bytes", e))
    }
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
