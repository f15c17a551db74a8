//! Error types for the user registry

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Name can not be empty")]
    EmptyName,

    #[error("User already exists: {name}")]
    AlreadyExists { name: String },

    #[error("User not found: {name}")]
    NotFound { name: String },
}

pub type Result<T> = std::result::Result<T, RegistryError>;
