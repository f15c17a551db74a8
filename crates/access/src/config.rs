//! Service configuration and trust-domain keys

use crate::subjects::{
    claims_lookup_subject, claims_update_subject, ChatSubjects, DEFAULT_AUDIENCE,
    DEFAULT_QUEUE_GROUP,
};
use chat_access_crypto::{AccountClaims, KeyPair};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Behavioural settings of the access service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Server/location label embedded in every credential bundle
    pub server_label: String,
    /// Audience token of the chat subject tree
    pub audience: String,
    /// Queue group shared by service replicas
    pub queue_group: String,
    /// Timeout of each system-of-record request, in milliseconds
    pub system_request_timeout_ms: u64,
    /// Lifetime of issued credentials, in days
    pub credential_validity_days: u32,
    /// Maximum message payload an issued user may publish, in bytes
    pub max_payload: i64,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            server_label: "<undisclosed>".to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            queue_group: DEFAULT_QUEUE_GROUP.to_string(),
            system_request_timeout_ms: 3_000,
            credential_validity_days: 365,
            max_payload: 1024,
        }
    }
}

impl AccessConfig {
    pub fn system_request_timeout(&self) -> Duration {
        Duration::from_millis(self.system_request_timeout_ms)
    }

    pub fn credential_validity(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.credential_validity_days))
    }

    pub fn subjects(&self) -> ChatSubjects {
        ChatSubjects::new(&self.audience)
    }
}

/// Account claims and keys of the trust domain the service acts for
#[derive(Clone)]
pub struct TrustDomain {
    /// Account document as loaded at startup
    pub account: AccountClaims,
    /// Key that signs user credentials
    pub signing_key: KeyPair,
    /// Key that re-signs the account document on revocation
    pub operator_key: Option<KeyPair>,
}

impl TrustDomain {
    pub fn new(account: AccountClaims, signing_key: KeyPair, operator_key: Option<KeyPair>) -> Self {
        Self {
            account,
            signing_key,
            operator_key,
        }
    }

    /// Public key of the account
    pub fn account_id(&self) -> &str {
        &self.account.sub
    }

    /// Whether the signing key is one the account document authorizes
    pub fn signing_key_is_authorized(&self) -> bool {
        let key = self.signing_key.public_key();
        key == self.account.sub || self.account.nats.signing_keys.contains(&key)
    }

    pub fn lookup_subject(&self) -> String {
        claims_lookup_subject(self.account_id())
    }

    pub fn update_subject(&self) -> String {
        claims_update_subject(self.account_id())
    }
}

impl fmt::Debug for TrustDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustDomain")
            .field("account", &self.account.sub)
            .field("signing_key", &self.signing_key.public_key())
            .field(
                "operator_key",
                &self.operator_key.as_ref().map(KeyPair::public_key),
            )
            .finish()
    }
}
