//! Key derivation and content hashing.
//!
//! Entity ids are derived, not generated: the same `(tenant, business_key)`
//! pair always maps to the same hub key. Content hashes detect no-op writes.
//! Both use SHA-256 with a domain-separation prefix and render as lowercase
//! hex (the one canonical digest encoding in this codebase).

use sha2::{Digest as _, Sha256};

use crate::attributes::Attributes;
use crate::error::{CoreError, CoreResult};
use crate::id::{EntityId, TenantId};

const ENTITY_ID_DOMAIN: &[u8] = b"idvault/entity-id/v1";
const CONTENT_HASH_DOMAIN: &[u8] = b"idvault/content/v1";

/// A 256-bit content digest (lowercase hex on the wire).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> CoreResult<Self> {
        let raw =
            hex::decode(s).map_err(|e| CoreError::validation(format!("Digest: {e}")))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| CoreError::validation("Digest: expected 32 bytes"))?;
        Ok(Self(bytes))
    }
}

impl core::fmt::Display for Digest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl serde::Serialize for Digest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for Digest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Derive the deterministic hub key for `(tenant, business_key)`.
///
/// Length-prefixed fields under a fixed domain tag, so distinct inputs cannot
/// collide by concatenation tricks.
pub fn derive_entity_id(tenant_id: TenantId, business_key: &str) -> EntityId {
    let mut hasher = Sha256::new();
    hasher.update(ENTITY_ID_DOMAIN);
    hasher.update(tenant_id.as_uuid().as_bytes());
    hasher.update((business_key.len() as u64).to_be_bytes());
    hasher.update(business_key.as_bytes());
    EntityId::from_bytes(hasher.finalize().into())
}

/// Hash an attribute set over its canonical encoding.
pub fn content_hash(attributes: &Attributes) -> CoreResult<Digest> {
    let bytes = attributes.canonical_bytes()?;
    let mut hasher = Sha256::new();
    hasher.update(CONTENT_HASH_DOMAIN);
    hasher.update(&bytes);
    Ok(Digest(hasher.finalize().into()))
}
