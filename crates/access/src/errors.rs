//! Error types for the access service
//!
//! Local, per-request failures turn into `-ERR` replies. System-of-record
//! failures are logged as well, since they point at infrastructure rather
//! than at the caller.

use chat_access_crypto::CryptoError;
use chat_access_network::BusError;
use chat_access_registry::RegistryError;
use thiserror::Error;

/// Literal success marker
pub const OK_REPLY: &str = "+OK";
/// Prefix of every failure reply
pub const ERR_PREFIX: &str = "-ERR";

#[derive(Error, Debug)]
pub enum AccessError {
    #[error("Name can not be empty")]
    EmptyName,

    #[error("User already exists: {name}")]
    AlreadyExists { name: String },

    #[error("Unknown user: {name}")]
    UnknownName { name: String },

    #[error("User already revoked: {name}")]
    AlreadyRevoked { name: String },

    #[error("Malformed presence: {0}")]
    MalformedPresence(String),

    #[error("Unexpected payload")]
    UnexpectedPayload,

    #[error("Unexpected empty")]
    UnexpectedEmpty,

    #[error("Serialization failure: {0}")]
    SerializationFailure(#[from] serde_json::Error),

    #[error("System request timed out: {subject}")]
    SystemRequestTimeout { subject: String },

    #[error("System request failed: {0}")]
    SystemRequestFailure(String),

    #[error("Signing failure: {0}")]
    SigningFailure(String),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

impl AccessError {
    /// Failure reply sent back to the requester
    pub fn to_reply(&self) -> Vec<u8> {
        error_reply(&self.to_string())
    }

    /// True for failures that originate at the system-of-record
    pub fn is_system_failure(&self) -> bool {
        matches!(
            self,
            AccessError::SystemRequestTimeout { .. } | AccessError::SystemRequestFailure(_)
        )
    }
}

impl From<RegistryError> for AccessError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::EmptyName => AccessError::EmptyName,
            RegistryError::AlreadyExists { name } => AccessError::AlreadyExists { name },
            RegistryError::NotFound { name } => AccessError::UnknownName { name },
        }
    }
}

impl From<CryptoError> for AccessError {
    fn from(err: CryptoError) -> Self {
        AccessError::SigningFailure(err.to_string())
    }
}

/// Map a failed system-of-record request
pub(crate) fn system_error(err: BusError) -> AccessError {
    match err {
        BusError::Timeout { subject, .. } => AccessError::SystemRequestTimeout { subject },
        other => AccessError::SystemRequestFailure(other.to_string()),
    }
}

pub fn error_reply(message: &str) -> Vec<u8> {
    format!("{ERR_PREFIX} '{message}'").into_bytes()
}

pub type Result<T> = std::result::Result<T, AccessError>;
