//! User registry for the chat access service
//!
//! This crate holds the authoritative mapping from canonical user names to
//! public identity keys, plus the canonicalizer that turns raw request
//! payloads into bounded, normalized names. The registry is volatile and
//! lives only as long as the owning service.

pub mod canonical;
pub mod errors;
pub mod registry;
pub mod types;

pub use canonical::{canonicalize, MAX_NAME_LEN};
pub use errors::*;
pub use registry::Registry;
pub use types::*;
