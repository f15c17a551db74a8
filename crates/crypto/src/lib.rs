//! Cryptographic primitives for the chat access service
//!
//! - `keys`: nkey identity pairs for operators, accounts and users
//! - `claims`: signed claims documents for users and accounts, encoded as
//!   three-segment tokens
//! - `creds`: the credential bundle text handed to provisioned users

pub mod claims;
pub mod creds;
pub mod errors;
pub mod keys;

pub use claims::{
    AccountClaims, AccountSection, Claims, ClaimsSection, GenericClaims, Limits, Permission,
    UserClaims, UserSection, TOKEN_ALGORITHM, TOKEN_TYPE,
};
pub use creds::CredentialBundle;
pub use errors::*;
pub use keys::{public_key_role, verify_signature, KeyPair, KeyRole};
