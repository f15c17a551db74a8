//! Registry implementation
//!
//! Every mutation takes the write lock for its whole check-and-set, so two
//! concurrent registrations of the same name cannot both succeed.

use crate::errors::*;
use crate::types::*;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Name → identity registry
///
/// Owned by the service and shared with handlers behind an `Arc`.
#[derive(Debug, Default)]
pub struct Registry {
    entries: RwLock<BTreeMap<String, RegistryEntry>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new name.
    ///
    /// Fails with [`RegistryError::AlreadyExists`] if the name is present,
    /// whatever its status.
    pub fn register(&self, name: &CanonicalName, public_key: &str) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(name.as_str()) {
            return Err(RegistryError::AlreadyExists {
                name: name.to_string(),
            });
        }
        entries.insert(
            name.to_string(),
            RegistryEntry::new(name.as_str(), public_key),
        );
        Ok(())
    }

    /// Look up the public key registered for `name`.
    pub fn lookup(&self, name: &str) -> Option<String> {
        self.entries
            .read()
            .get(name)
            .map(|entry| entry.public_key.clone())
    }

    /// Fetch the full row for `name`.
    pub fn entry(&self, name: &str) -> Option<RegistryEntry> {
        self.entries.read().get(name).cloned()
    }

    /// Unconditionally set the key for `name`.
    ///
    /// A different key re-activates a revoked row; re-announcing the revoked
    /// key itself leaves it revoked.
    pub fn overwrite(&self, name: &str, public_key: &str) {
        let now = chrono::Utc::now().timestamp();
        let mut entries = self.entries.write();
        match entries.get_mut(name) {
            Some(entry) => {
                if entry.public_key != public_key {
                    entry.public_key = public_key.to_string();
                    entry.status = EntryStatus::Active;
                    entry.revoked_at = None;
                }
                entry.updated_at = now;
            }
            None => {
                entries.insert(name.to_string(), RegistryEntry::new(name, public_key));
            }
        }
    }

    /// Mark `name` revoked, provided it still maps to `public_key`.
    ///
    /// Returns `false` if the row is gone or was re-keyed in the meantime.
    pub fn mark_revoked(&self, name: &str, public_key: &str) -> Result<bool> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(name).ok_or_else(|| RegistryError::NotFound {
            name: name.to_string(),
        })?;
        if entry.public_key != public_key {
            return Ok(false);
        }
        let now = chrono::Utc::now().timestamp();
        entry.status = EntryStatus::Revoked;
        entry.updated_at = now;
        entry.revoked_at = Some(now);
        Ok(true)
    }

    /// Copy of the active rows, safe to hand to other tasks.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let entries = self.entries.read();
        RegistrySnapshot(
            entries
                .values()
                .filter(|entry| entry.is_active())
                .map(|entry| (entry.name.clone(), entry.public_key.clone()))
                .collect(),
        )
    }

    /// Number of rows, revoked ones included
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
