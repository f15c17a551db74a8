//! Identity revocation
//!
//! Revoking a name fetches the account document from the system-of-record,
//! adds the identity to its revocation list, re-signs it with the operator
//! key and pushes it back. Each remote request is attempted once.

use crate::config::{AccessConfig, TrustDomain};
use crate::errors::{system_error, AccessError, Result};
use crate::resolver::ClaimsUpdateResponse;
use chat_access_crypto::{AccountClaims, KeyPair};
use chat_access_network::MessageBus;
use chat_access_registry::{canonicalize, CanonicalName, Registry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// A confirmed revocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revocation {
    pub name: String,
    pub public_key: String,
}

pub struct RevocationCoordinator {
    registry: Arc<Registry>,
    trust: Arc<TrustDomain>,
    system_bus: Arc<dyn MessageBus>,
    timeout: Duration,
    // held across fetch, edit and push so concurrent revocations in one
    // account can not overwrite each other's document
    in_flight: Mutex<()>,
}

impl RevocationCoordinator {
    pub fn new(
        registry: Arc<Registry>,
        trust: Arc<TrustDomain>,
        system_bus: Arc<dyn MessageBus>,
        config: &AccessConfig,
    ) -> Self {
        Self {
            registry,
            trust,
            system_bus,
            timeout: config.system_request_timeout(),
            in_flight: Mutex::new(()),
        }
    }

    /// Revoke the identity currently registered under the name in
    /// `raw_request`.
    pub async fn revoke(&self, raw_request: &[u8]) -> Result<Revocation> {
        let name = canonicalize(raw_request)?;
        self.active_key(&name)?;
        let operator = self.trust.operator_key.as_ref().ok_or_else(|| {
            AccessError::SigningFailure("no operator signing key configured".to_string())
        })?;

        let _guard = self.in_flight.lock().await;
        // re-read under the lock: the name may have been revoked while we waited
        let public_key = self.active_key(&name)?;

        let mut account = self.fetch_account().await?;
        account.nats.revoke(&public_key);
        self.push_account(&mut account, operator).await?;

        if !self.registry.mark_revoked(name.as_str(), &public_key)? {
            warn!(
                "{} re-announced with a new key while {} was being revoked",
                name, public_key
            );
        }
        info!("Revoked {:?} ({})", name.as_str(), public_key);

        Ok(Revocation {
            name: name.into_inner(),
            public_key,
        })
    }

    fn active_key(&self, name: &CanonicalName) -> Result<String> {
        let entry = self
            .registry
            .entry(name.as_str())
            .ok_or_else(|| AccessError::UnknownName {
                name: name.to_string(),
            })?;
        if !entry.is_active() {
            return Err(AccessError::AlreadyRevoked { name: entry.name });
        }
        Ok(entry.public_key)
    }

    async fn fetch_account(&self) -> Result<AccountClaims> {
        let subject = self.trust.lookup_subject();
        let reply = self
            .system_bus
            .request(&subject, Vec::new(), self.timeout)
            .await
            .map_err(|err| {
                error!("Claims lookup on {} failed: {}", subject, err);
                system_error(err)
            })?;

        let account = AccountClaims::decode(&reply.payload_str()).map_err(|err| {
            error!("Claims lookup returned an unusable document: {}", err);
            AccessError::SystemRequestFailure(format!("invalid account document: {err}"))
        })?;

        if account.sub != self.trust.account_id() {
            error!(
                "Claims lookup returned account {} instead of {}",
                account.sub,
                self.trust.account_id()
            );
            return Err(AccessError::SystemRequestFailure(format!(
                "lookup returned account {}",
                account.sub
            )));
        }
        debug!(
            "Fetched account {} with {} revocation(s)",
            account.sub,
            account.nats.revocations.len()
        );
        Ok(account)
    }

    async fn push_account(&self, account: &mut AccountClaims, operator: &KeyPair) -> Result<()> {
        let token = account.encode(operator)?;
        let subject = self.trust.update_subject();

        let reply = self
            .system_bus
            .request(&subject, token.into_bytes(), self.timeout)
            .await
            .map_err(|err| {
                error!("Claims update on {} failed: {}", subject, err);
                system_error(err)
            })?;

        let response: ClaimsUpdateResponse = serde_json::from_slice(&reply.payload)
            .map_err(|err| {
                error!("Claims update reply is not a response envelope: {}", err);
                AccessError::SystemRequestFailure(format!("unreadable update reply: {err}"))
            })?;

        if let Some(rejection) = response.error {
            error!(
                "Claims update rejected ({}): {}",
                rejection.code, rejection.description
            );
            return Err(AccessError::SystemRequestFailure(rejection.description));
        }
        Ok(())
    }
}
