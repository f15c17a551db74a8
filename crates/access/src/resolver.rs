//! In-process system-of-record for one account
//!
//! Answers the claims LOOKUP and UPDATE requests the revocation flow sends,
//! so a single node (and the test suites) can run without an external
//! account server. An UPDATE is accepted only when the pushed document is
//! about this account and signed by one of the trusted operators.

use crate::errors::Result;
use crate::subjects::{claims_lookup_subject, claims_update_subject};
use chat_access_crypto::AccountClaims;
use chat_access_network::{Message, MessageBus, Subscription};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const UPDATE_OK_CODE: u16 = 200;
pub const UPDATE_REJECTED_CODE: u16 = 400;
pub const UPDATE_FORBIDDEN_CODE: u16 = 403;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateData {
    pub account: String,
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateError {
    pub account: String,
    pub code: u16,
    pub description: String,
}

/// Reply envelope of a claims UPDATE
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsUpdateResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<UpdateData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<UpdateError>,
}

impl ClaimsUpdateResponse {
    pub fn accepted(account: &str) -> Self {
        Self {
            data: Some(UpdateData {
                account: account.to_string(),
                code: UPDATE_OK_CODE,
                message: "jwt updated".to_string(),
            }),
            error: None,
        }
    }

    pub fn rejected(account: &str, code: u16, description: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(UpdateError {
                account: account.to_string(),
                code,
                description: description.into(),
            }),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.error.is_none() && self.data.is_some()
    }
}

/// Holds the current account document and serves it over the bus
pub struct AccountResolver {
    bus: Arc<dyn MessageBus>,
    account: String,
    token: RwLock<String>,
    trusted_operators: Vec<String>,
}

/// Running resolver task
pub struct ResolverHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ResolverHandle {
    /// Stop serving and wait for the task to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!("Account resolver task failed: {}", err);
        }
    }
}

impl AccountResolver {
    /// Serve `token` for the account it describes.
    pub fn new(
        bus: Arc<dyn MessageBus>,
        token: impl Into<String>,
        trusted_operators: Vec<String>,
    ) -> Result<Self> {
        let token = token.into();
        let claims = AccountClaims::decode(&token)?;
        Ok(Self {
            bus,
            account: claims.sub,
            token: RwLock::new(token.trim().to_string()),
            trusted_operators,
        })
    }

    pub fn account_id(&self) -> &str {
        &self.account
    }

    pub fn current_token(&self) -> String {
        self.token.read().clone()
    }

    pub fn current_claims(&self) -> Result<AccountClaims> {
        Ok(AccountClaims::decode(&self.current_token())?)
    }

    /// Validate and store a pushed document
    pub fn apply_update(&self, payload: &[u8]) -> ClaimsUpdateResponse {
        let text = String::from_utf8_lossy(payload);
        let claims = match AccountClaims::decode(&text) {
            Ok(claims) => claims,
            Err(err) => {
                return ClaimsUpdateResponse::rejected(
                    &self.account,
                    UPDATE_REJECTED_CODE,
                    format!("invalid account jwt: {err}"),
                )
            }
        };

        if claims.sub != self.account {
            return ClaimsUpdateResponse::rejected(
                &self.account,
                UPDATE_REJECTED_CODE,
                format!("jwt is for account {}", claims.sub),
            );
        }
        if !self.trusted_operators.contains(&claims.iss) {
            return ClaimsUpdateResponse::rejected(
                &self.account,
                UPDATE_FORBIDDEN_CODE,
                format!("issuer {} is not a trusted operator", claims.iss),
            );
        }

        *self.token.write() = text.trim().to_string();
        info!(
            "Account {} updated, {} revocation(s)",
            self.account,
            claims.nats.revocations.len()
        );
        ClaimsUpdateResponse::accepted(&self.account)
    }

    /// Subscribe to the lookup and update subjects and serve them until
    /// stopped or the bus closes.
    pub async fn spawn(self: Arc<Self>) -> Result<ResolverHandle> {
        let lookups = self
            .bus
            .subscribe(&claims_lookup_subject(&self.account), None)
            .await?;
        let updates = self
            .bus
            .subscribe(&claims_update_subject(&self.account), None)
            .await?;
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(self.serve(lookups, updates, shutdown_rx));
        Ok(ResolverHandle { shutdown, task })
    }

    async fn serve(
        self: Arc<Self>,
        mut lookups: Subscription,
        mut updates: Subscription,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!("Resolving claims for account {}", self.account);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                message = lookups.next() => match message {
                    Some(message) => {
                        let token = self.current_token().into_bytes();
                        self.reply(&message, token).await;
                    }
                    None => break,
                },
                message = updates.next() => match message {
                    Some(message) => {
                        let response = self.apply_update(&message.payload);
                        match serde_json::to_vec(&response) {
                            Ok(payload) => self.reply(&message, payload).await,
                            Err(err) => warn!("Failed to encode update response: {}", err),
                        }
                    }
                    None => break,
                },
            }
        }

        for id in [lookups.id(), updates.id()] {
            let _ = self.bus.unsubscribe(id).await;
        }
        debug!("Account resolver for {} stopped", self.account);
    }

    async fn reply(&self, message: &Message, payload: Vec<u8>) {
        if let Err(err) = self.bus.respond(message, payload).await {
            warn!("Failed to answer {}: {}", message.subject, err);
        }
    }
}
