//! Chat access service
//!
//! Mints scoped, time-limited user credentials on request, keeps the
//! name → identity registry current from presence announcements, and
//! revokes identities by pushing an updated account document to the
//! system-of-record.
//!
//! Every handler receives its collaborators explicitly; nothing here is a
//! process-wide global.

pub mod broadcaster;
pub mod config;
pub mod errors;
pub mod issuer;
pub mod presence;
pub mod resolver;
pub mod revocation;
pub mod service;
pub mod subjects;

pub use broadcaster::SnapshotBroadcaster;
pub use config::{AccessConfig, TrustDomain};
pub use errors::*;
pub use issuer::{AccessScope, CredentialIssuer, IssuedCredential};
pub use presence::{PresenceAnnouncement, PresencePayload, PresenceRecorder};
pub use resolver::{AccountResolver, ClaimsUpdateResponse, ResolverHandle};
pub use revocation::{Revocation, RevocationCoordinator};
pub use service::{AccessService, Endpoint, ServiceHandle};
pub use subjects::ChatSubjects;
