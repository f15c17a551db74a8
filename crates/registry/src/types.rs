//! Types for the user registry

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Normalized, length-bounded user name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalName(String);

impl CanonicalName {
    /// Wrap a name that has already been canonicalized.
    pub(crate) fn new_unchecked(name: String) -> Self {
        Self(name)
    }

    /// Canonicalize a raw name. See [`crate::canonicalize`].
    pub fn parse(raw: impl AsRef<[u8]>) -> crate::Result<Self> {
        crate::canonicalize(raw.as_ref())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CanonicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Trust status of a registered identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Active,
    Revoked,
}

/// A single name → identity row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    /// Opaque public identity key; never parsed by the registry.
    pub public_key: String,
    pub status: EntryStatus,
    /// Unix timestamp of the first registration
    pub created_at: i64,
    /// Unix timestamp of the last overwrite or status change
    pub updated_at: i64,
    /// Unix timestamp of the confirmed revocation, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<i64>,
}

impl RegistryEntry {
    pub fn new(name: impl Into<String>, public_key: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            name: name.into(),
            public_key: public_key.into(),
            status: EntryStatus::Active,
            created_at: now,
            updated_at: now,
            revoked_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == EntryStatus::Active
    }
}

/// Point-in-time copy of the active registry rows.
///
/// Serializes as a flat JSON object mapping name to public key, which is the
/// shape observers of the update subject expect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistrySnapshot(pub BTreeMap<String, String>);

impl RegistrySnapshot {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
