//! Error types for keys, tokens and credential files

use crate::keys::KeyRole;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid seed")]
    InvalidSeed,

    #[error("Key error: {0}")]
    Key(String),

    #[error("Wrong key role: expected {expected}, found {found}")]
    WrongKeyRole { expected: KeyRole, found: KeyRole },

    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Signature verification failed")]
    InvalidSignature,

    #[error("Token expired at {0}")]
    Expired(i64),

    #[error("Malformed credentials: {0}")]
    MalformedCredentials(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] base64::DecodeError),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
