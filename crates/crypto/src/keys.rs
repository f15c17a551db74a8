//! Identity key pairs
//!
//! Keys are NATS nkeys: Ed25519 pairs whose text forms are base32 with a
//! role prefix and a CRC16 trailer. Public keys start with `O`, `A` or `U`;
//! seeds start with `S` followed by the same letter.

use crate::errors::{CryptoError, Result};
use nkeys::KeyPairType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Role a key plays in the trust hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyRole {
    Operator,
    Account,
    User,
}

impl KeyRole {
    pub fn prefix(self) -> char {
        match self {
            KeyRole::Operator => 'O',
            KeyRole::Account => 'A',
            KeyRole::User => 'U',
        }
    }

    fn key_type(self) -> KeyPairType {
        match self {
            KeyRole::Operator => KeyPairType::Operator,
            KeyRole::Account => KeyPairType::Account,
            KeyRole::User => KeyPairType::User,
        }
    }

    fn from_key_type(kind: KeyPairType) -> Option<Self> {
        match kind {
            KeyPairType::Operator => Some(KeyRole::Operator),
            KeyPairType::Account => Some(KeyRole::Account),
            KeyPairType::User => Some(KeyRole::User),
            _ => None,
        }
    }
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            KeyRole::Operator => "operator",
            KeyRole::Account => "account",
            KeyRole::User => "user",
        };
        f.write_str(value)
    }
}

/// Nkey pair tagged with its role
#[derive(Clone)]
pub struct KeyPair {
    role: KeyRole,
    inner: Arc<nkeys::KeyPair>,
}

impl KeyPair {
    /// Generate a fresh key pair
    pub fn generate(role: KeyRole) -> Self {
        Self {
            role,
            inner: Arc::new(nkeys::KeyPair::new(role.key_type())),
        }
    }

    /// Rebuild a key pair from raw secret bytes
    pub fn from_secret_bytes(role: KeyRole, secret: &[u8; 32]) -> Result<Self> {
        let inner = nkeys::KeyPair::new_from_raw(role.key_type(), *secret)
            .map_err(|err| CryptoError::Key(err.to_string()))?;
        Ok(Self {
            role,
            inner: Arc::new(inner),
        })
    }

    /// Parse a seed produced by [`KeyPair::seed`]. Surrounding whitespace
    /// is ignored so seeds can be read straight from files.
    pub fn from_seed(seed: &str) -> Result<Self> {
        let inner = nkeys::KeyPair::from_seed(seed.trim()).map_err(|_| CryptoError::InvalidSeed)?;
        let role = KeyRole::from_key_type(inner.key_pair_type()).ok_or(CryptoError::InvalidSeed)?;
        Ok(Self {
            role,
            inner: Arc::new(inner),
        })
    }

    /// Like [`KeyPair::from_seed`] but insists on a role
    pub fn from_seed_with_role(seed: &str, role: KeyRole) -> Result<Self> {
        let pair = Self::from_seed(seed)?;
        if pair.role != role {
            return Err(CryptoError::WrongKeyRole {
                expected: role,
                found: pair.role,
            });
        }
        Ok(pair)
    }

    pub fn role(&self) -> KeyRole {
        self.role
    }

    pub fn public_key(&self) -> String {
        self.inner.public_key()
    }

    /// Secret seed text. Treat as sensitive.
    pub fn seed(&self) -> Result<String> {
        self.inner
            .seed()
            .map_err(|err| CryptoError::Key(err.to_string()))
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        self.inner
            .sign(message)
            .map_err(|err| CryptoError::Key(err.to_string()))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("role", &self.role)
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

fn public_only(text: &str) -> Result<nkeys::KeyPair> {
    nkeys::KeyPair::from_public_key(text)
        .map_err(|_| CryptoError::InvalidPublicKey(text.to_string()))
}

/// Role of a public key, failing on anything that is not an
/// operator, account or user nkey
pub fn public_key_role(text: &str) -> Result<KeyRole> {
    let key = public_only(text)?;
    KeyRole::from_key_type(key.key_pair_type())
        .ok_or_else(|| CryptoError::InvalidPublicKey(text.to_string()))
}

/// Verify `signature` over `message` against a public key
pub fn verify_signature(public_key: &str, message: &[u8], signature: &[u8]) -> Result<()> {
    public_only(public_key)?
        .verify(message, signature)
        .map_err(|_| CryptoError::InvalidSignature)
}
