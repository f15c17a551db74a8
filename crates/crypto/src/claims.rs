//! Signed claims documents
//!
//! A claims document is a JSON object with a common envelope (`jti`, `iat`,
//! `iss`, `sub`, `name`, `exp`) and a role specific `nats` section. On the
//! wire it travels as `header.payload.signature`, each segment base64url
//! without padding, signed by the key named in `iss`.

use crate::errors::{CryptoError, Result};
use crate::keys::{public_key_role, verify_signature, KeyPair, KeyRole};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const TOKEN_TYPE: &str = "JWT";
pub const TOKEN_ALGORITHM: &str = "ed25519-nkey";

#[derive(Debug, Serialize, Deserialize)]
struct TokenHeader {
    typ: String,
    alg: String,
}

/// Role specific part of a claims document
pub trait ClaimsSection {
    /// Role the issuing key must have, if any.
    fn issuer_role() -> Option<KeyRole>;
}

/// Claims envelope shared by every document type
///
/// Envelope fields not modeled here (`aud`, `nbf`, ...) are kept in
/// `extra` so re-signing a fetched document preserves them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims<T> {
    #[serde(default)]
    pub jti: String,
    #[serde(default)]
    pub iat: i64,
    #[serde(default)]
    pub iss: String,
    #[serde(default)]
    pub sub: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default)]
    pub nats: T,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub type UserClaims = Claims<UserSection>;
pub type AccountClaims = Claims<AccountSection>;
/// Claims with an uninterpreted section, used when only the envelope matters.
pub type GenericClaims = Claims<Value>;

impl<T: Default> Claims<T> {
    /// New unsigned claims about `subject`
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            jti: String::new(),
            iat: 0,
            iss: String::new(),
            sub: subject.into(),
            name: String::new(),
            exp: None,
            nats: T::default(),
            extra: Map::new(),
        }
    }
}

impl<T> Claims<T> {
    pub fn is_expired(&self) -> bool {
        self.check_expiry().is_err()
    }

    /// Fail with [`CryptoError::Expired`] once `exp` has passed
    pub fn check_expiry(&self) -> Result<()> {
        match self.exp {
            Some(exp) if exp <= chrono::Utc::now().timestamp() => Err(CryptoError::Expired(exp)),
            _ => Ok(()),
        }
    }
}

impl<T: Serialize + ClaimsSection> Claims<T> {
    /// Sign and encode the claims.
    ///
    /// Sets `iss` to the signer, `iat` to now and `jti` to the SHA-256 of
    /// the document, then returns the three-segment token.
    pub fn encode(&mut self, signer: &KeyPair) -> Result<String> {
        if let Some(expected) = T::issuer_role() {
            if signer.role() != expected {
                return Err(CryptoError::WrongKeyRole {
                    expected,
                    found: signer.role(),
                });
            }
        }

        self.iss = signer.public_key();
        self.iat = chrono::Utc::now().timestamp();
        self.jti = String::new();
        self.jti = hex::encode(Sha256::digest(serde_json::to_vec(self)?));

        let header = TokenHeader {
            typ: TOKEN_TYPE.to_string(),
            alg: TOKEN_ALGORITHM.to_string(),
        };
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?)
        );
        let signature = signer.sign(signing_input.as_bytes())?;

        Ok(format!(
            "{signing_input}.{}",
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }
}

impl<T: DeserializeOwned + Default + ClaimsSection> Claims<T> {
    /// Decode a token and verify its signature against `iss`.
    pub fn decode(token: &str) -> Result<Self> {
        let token = token.trim();
        let segments: Vec<&str> = token.split('.').collect();
        let [header, payload, signature] = segments.as_slice() else {
            return Err(CryptoError::MalformedToken(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        };

        let header: TokenHeader = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header)?)?;
        if header.alg != TOKEN_ALGORITHM {
            return Err(CryptoError::UnsupportedAlgorithm(header.alg));
        }

        let claims: Self = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload)?)?;
        let issuer_role = public_key_role(&claims.iss)?;
        if let Some(expected) = T::issuer_role() {
            if issuer_role != expected {
                return Err(CryptoError::WrongKeyRole {
                    expected,
                    found: issuer_role,
                });
            }
        }

        let signing_input_len = token.len() - signature.len() - 1;
        verify_signature(
            &claims.iss,
            token[..signing_input_len].as_bytes(),
            &URL_SAFE_NO_PAD.decode(signature)?,
        )?;

        Ok(claims)
    }
}

impl ClaimsSection for Value {
    fn issuer_role() -> Option<KeyRole> {
        None
    }
}

/// Allow/deny subject lists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,
}

/// Connection limits; `-1` means unlimited
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub payload: i64,
}

impl Default for Limits {
    fn default() -> Self {
        Self { payload: -1 }
    }
}

/// User section: what the credential holder may publish and subscribe to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSection {
    #[serde(rename = "pub", default)]
    pub publish: Permission,
    #[serde(rename = "sub", default)]
    pub subscribe: Permission,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub issuer_account: String,
}

impl ClaimsSection for UserSection {
    fn issuer_role() -> Option<KeyRole> {
        Some(KeyRole::Account)
    }
}

/// Account section: the trust document of a trust domain
///
/// Fields this crate does not model are kept in `extra` so a fetched
/// document can be re-signed without losing them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSection {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub revocations: BTreeMap<String, i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signing_keys: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AccountSection {
    /// Revoke every credential of `public_key` issued up to now
    pub fn revoke(&mut self, public_key: &str) {
        self.revoke_at(public_key, chrono::Utc::now().timestamp());
    }

    pub fn revoke_at(&mut self, public_key: &str, timestamp: i64) {
        self.revocations.insert(public_key.to_string(), timestamp);
    }

    pub fn is_revoked(&self, public_key: &str) -> bool {
        self.revocations.contains_key(public_key)
    }
}

impl ClaimsSection for AccountSection {
    fn issuer_role() -> Option<KeyRole> {
        Some(KeyRole::Operator)
    }
}
