//! Credential issuance
//!
//! A credential lets its holder announce presence, post to broadcast
//! channels, send direct messages to anyone, and receive direct messages
//! addressed to its own key only.

use crate::config::{AccessConfig, TrustDomain};
use crate::errors::{AccessError, Result};
use crate::subjects::{ChatSubjects, INBOX_WILDCARD};
use chat_access_crypto::{CredentialBundle, KeyPair, KeyRole, UserClaims};
use chat_access_registry::{canonicalize, CanonicalName, Registry};
use std::sync::Arc;
use tracing::{debug, info};

/// Publish and subscribe allow-lists of one issued identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessScope {
    pub publish_allow: Vec<String>,
    pub subscribe_allow: Vec<String>,
}

impl AccessScope {
    pub fn for_identity(subjects: &ChatSubjects, public_key: &str) -> Self {
        Self {
            publish_allow: vec![
                subjects.online(),
                subjects.posts(),
                subjects.direct_messages(),
            ],
            subscribe_allow: vec![
                subjects.online(),
                subjects.posts(),
                subjects.direct_messages_to(public_key),
                INBOX_WILDCARD.to_string(),
            ],
        }
    }
}

/// Outcome of a successful issuance
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub name: CanonicalName,
    pub public_key: String,
    pub bundle: CredentialBundle,
}

/// Mints user credentials and records them in the registry
#[derive(Debug)]
pub struct CredentialIssuer {
    registry: Arc<Registry>,
    trust: Arc<TrustDomain>,
    subjects: ChatSubjects,
    server_label: String,
    validity: chrono::Duration,
    max_payload: i64,
}

impl CredentialIssuer {
    pub fn new(registry: Arc<Registry>, trust: Arc<TrustDomain>, config: &AccessConfig) -> Self {
        Self {
            registry,
            trust,
            subjects: config.subjects(),
            server_label: config.server_label.clone(),
            validity: config.credential_validity(),
            max_payload: config.max_payload,
        }
    }

    /// Issue a credential for the name carried in `raw_request`.
    ///
    /// The registry write is the last step and is atomic, so of several
    /// concurrent requests for one name exactly one succeeds.
    pub fn issue(&self, raw_request: &[u8]) -> Result<IssuedCredential> {
        let name = canonicalize(raw_request)?;

        if self.registry.lookup(name.as_str()).is_some() {
            return Err(AccessError::AlreadyExists {
                name: name.into_inner(),
            });
        }

        let user = KeyPair::generate(KeyRole::User);
        let public_key = user.public_key();
        let token = self.sign_user_claims(&name, &public_key)?;
        let bundle = CredentialBundle::new(token, user.seed()?, &self.server_label);

        self.registry.register(&name, &public_key)?;
        info!("Registered {:?} as {}", name.as_str(), public_key);

        Ok(IssuedCredential {
            name,
            public_key,
            bundle,
        })
    }

    fn sign_user_claims(&self, name: &CanonicalName, public_key: &str) -> Result<String> {
        let scope = AccessScope::for_identity(&self.subjects, public_key);

        let mut claims = UserClaims::new(public_key);
        claims.name = name.to_string();
        claims.exp = Some((chrono::Utc::now() + self.validity).timestamp());
        claims.nats.limits.payload = self.max_payload;
        claims.nats.publish.allow = scope.publish_allow;
        claims.nats.subscribe.allow = scope.subscribe_allow;
        claims.nats.issuer_account = self.trust.account_id().to_string();

        let token = claims.encode(&self.trust.signing_key)?;
        debug!("Signed user claims {} for {}", claims.jti, name);
        Ok(token)
    }
}
