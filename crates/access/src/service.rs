//! Bus dispatch
//!
//! One task per endpoint pulls messages off its subscription and hands each
//! to a handler task, so a slow system-of-record request never holds up
//! other requests. Draining unsubscribes, handles the messages already
//! queued on each subscription and waits for the handlers still in flight.

use crate::broadcaster::SnapshotBroadcaster;
use crate::config::{AccessConfig, TrustDomain};
use crate::errors::{Result, OK_REPLY};
use crate::issuer::CredentialIssuer;
use crate::presence::PresenceRecorder;
use crate::revocation::RevocationCoordinator;
use crate::subjects::{ACCESS_REQUEST_SUBJECT, REVOKE_REQUEST_SUBJECT, SNAPSHOT_QUERY_SUBJECT};
use chat_access_network::{Message, MessageBus, Subscription};
use chat_access_registry::Registry;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Inbound request kinds the service answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Access,
    Presence,
    Revoke,
    Snapshot,
}

impl Endpoint {
    pub const ALL: [Endpoint; 4] = [
        Endpoint::Access,
        Endpoint::Presence,
        Endpoint::Revoke,
        Endpoint::Snapshot,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Endpoint::Access => "access",
            Endpoint::Presence => "presence",
            Endpoint::Revoke => "revoke",
            Endpoint::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct AccessService {
    config: AccessConfig,
    bus: Arc<dyn MessageBus>,
    registry: Arc<Registry>,
    issuer: CredentialIssuer,
    presence: PresenceRecorder,
    revocation: RevocationCoordinator,
    broadcaster: SnapshotBroadcaster,
}

/// Running endpoint loops
pub struct ServiceHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<(Endpoint, JoinHandle<()>)>,
}

impl ServiceHandle {
    /// Stop accepting requests, answer the ones already queued and wait for
    /// in-flight handlers to finish.
    pub async fn drain(self) {
        let _ = self.shutdown.send(true);
        for (endpoint, task) in self.tasks {
            if let Err(err) = task.await {
                error!("{} endpoint task failed: {}", endpoint, err);
            }
        }
        info!("Access service drained");
    }
}

impl AccessService {
    /// `app_bus` carries client traffic; `system_bus` reaches the
    /// system-of-record. They may be the same bus.
    pub fn new(
        config: AccessConfig,
        trust: Arc<TrustDomain>,
        app_bus: Arc<dyn MessageBus>,
        system_bus: Arc<dyn MessageBus>,
        registry: Arc<Registry>,
    ) -> Self {
        if !trust.signing_key_is_authorized() {
            warn!(
                "Signing key {} is not listed on account {}",
                trust.signing_key.public_key(),
                trust.account_id()
            );
        }

        Self {
            issuer: CredentialIssuer::new(registry.clone(), trust.clone(), &config),
            presence: PresenceRecorder::new(registry.clone()),
            revocation: RevocationCoordinator::new(
                registry.clone(),
                trust,
                system_bus,
                &config,
            ),
            broadcaster: SnapshotBroadcaster::new(app_bus.clone()),
            bus: app_bus,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    /// Subject and queue group an endpoint listens on
    pub fn route(&self, endpoint: Endpoint) -> (String, Option<&str>) {
        let queue_group = Some(self.config.queue_group.as_str());
        match endpoint {
            Endpoint::Access => (ACCESS_REQUEST_SUBJECT.to_string(), queue_group),
            // every replica keeps its own registry, so each one sees presence
            Endpoint::Presence => (self.config.subjects().online(), None),
            Endpoint::Revoke => (REVOKE_REQUEST_SUBJECT.to_string(), queue_group),
            Endpoint::Snapshot => (SNAPSHOT_QUERY_SUBJECT.to_string(), queue_group),
        }
    }

    /// Subscribe every endpoint and start serving.
    pub async fn start(self: &Arc<Self>) -> Result<ServiceHandle> {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut subscriptions = Vec::with_capacity(Endpoint::ALL.len());

        for endpoint in Endpoint::ALL {
            let (subject, queue_group) = self.route(endpoint);
            match self.bus.subscribe(&subject, queue_group).await {
                Ok(subscription) => {
                    info!("Listening for {} requests on {}", endpoint, subject);
                    subscriptions.push((endpoint, subscription));
                }
                Err(err) => {
                    for (_, subscription) in &subscriptions {
                        let _ = self.bus.unsubscribe(subscription.id()).await;
                    }
                    return Err(err.into());
                }
            }
        }

        let tasks = subscriptions
            .into_iter()
            .map(|(endpoint, subscription)| {
                let task = tokio::spawn(self.clone().run_endpoint(
                    endpoint,
                    subscription,
                    shutdown_rx.clone(),
                ));
                (endpoint, task)
            })
            .collect();

        Ok(ServiceHandle { shutdown, tasks })
    }

    async fn run_endpoint(
        self: Arc<Self>,
        endpoint: Endpoint,
        mut subscription: Subscription,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                message = subscription.next() => match message {
                    Some(message) => {
                        let service = self.clone();
                        in_flight.spawn(async move { service.dispatch(endpoint, message).await });
                    }
                    None => break,
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(err) = joined {
                        error!("{} handler panicked: {}", endpoint, err);
                    }
                }
            }
        }

        if let Err(err) = self.bus.unsubscribe(subscription.id()).await {
            debug!("Failed to unsubscribe {} endpoint: {}", endpoint, err);
        }
        // Messages delivered before the unsubscribe are still queued
        while let Some(message) = subscription.next().await {
            let service = self.clone();
            in_flight.spawn(async move { service.dispatch(endpoint, message).await });
        }
        if !in_flight.is_empty() {
            debug!("Draining {} in-flight {} handler(s)", in_flight.len(), endpoint);
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(err) = joined {
                error!("{} handler panicked: {}", endpoint, err);
            }
        }
    }

    /// Handle one inbound message
    pub async fn dispatch(&self, endpoint: Endpoint, message: Message) {
        metrics::counter!("chat_access_requests_total", "endpoint" => endpoint.as_str())
            .increment(1);
        match endpoint {
            Endpoint::Access => self.handle_access(&message).await,
            Endpoint::Presence => self.handle_presence(&message).await,
            Endpoint::Revoke => self.handle_revoke(&message).await,
            Endpoint::Snapshot => self.handle_snapshot(&message).await,
        }
    }

    async fn handle_access(&self, message: &Message) {
        let reply = match self.issuer.issue(&message.payload) {
            Ok(issued) => match self.broadcaster.publish(&self.registry.snapshot()).await {
                Ok(()) => {
                    metrics::counter!("chat_access_credentials_issued_total").increment(1);
                    issued.bundle.render().into_bytes()
                }
                Err(err) => err.to_reply(),
            },
            Err(err) => {
                metrics::counter!("chat_access_request_failures_total", "endpoint" => "access")
                    .increment(1);
                warn!("Access request failed: {}", err);
                err.to_reply()
            }
        };
        self.reply(message, reply).await;
    }

    async fn handle_presence(&self, message: &Message) {
        match self.presence.record(&message.payload) {
            Ok(_) => {
                metrics::counter!("chat_access_presence_updates_total").increment(1);
                if let Err(err) = self.broadcaster.publish(&self.registry.snapshot()).await {
                    self.reply(message, err.to_reply()).await;
                }
            }
            Err(err) => {
                metrics::counter!("chat_access_request_failures_total", "endpoint" => "presence")
                    .increment(1);
                debug!("Ignoring presence on {}: {}", message.subject, err);
                self.reply(message, err.to_reply()).await;
            }
        }
    }

    async fn handle_revoke(&self, message: &Message) {
        let reply = match self.revocation.revoke(&message.payload).await {
            Ok(revocation) => {
                metrics::counter!("chat_access_revocations_total").increment(1);
                if let Err(err) = self.broadcaster.publish(&self.registry.snapshot()).await {
                    warn!("Revoked {} but could not broadcast: {}", revocation.name, err);
                }
                OK_REPLY.as_bytes().to_vec()
            }
            Err(err) => {
                metrics::counter!("chat_access_request_failures_total", "endpoint" => "revoke")
                    .increment(1);
                if err.is_system_failure() {
                    metrics::counter!("chat_access_system_failures_total").increment(1);
                    error!("Revocation aborted: {}", err);
                } else {
                    warn!("Revocation rejected: {}", err);
                }
                err.to_reply()
            }
        };
        self.reply(message, reply).await;
    }

    async fn handle_snapshot(&self, message: &Message) {
        let reply = match self.registry.snapshot().to_json() {
            Ok(json) => json,
            Err(err) => crate::errors::AccessError::from(err).to_reply(),
        };
        self.reply(message, reply).await;
    }

    async fn reply(&self, message: &Message, payload: Vec<u8>) {
        if let Err(err) = self.bus.respond(message, payload).await {
            warn!("Failed to reply on {:?}: {}", message.reply, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_access_crypto::{AccountClaims, KeyPair, KeyRole};
    use chat_access_network::LocalBus;

    fn service(bus: &LocalBus) -> Arc<AccessService> {
        let operator = KeyPair::generate(KeyRole::Operator);
        let account = KeyPair::generate(KeyRole::Account);
        let mut claims = AccountClaims::new(account.public_key());
        claims.encode(&operator).unwrap();
        let trust = Arc::new(TrustDomain::new(claims, account, Some(operator)));
        let bus: Arc<dyn MessageBus> = Arc::new(bus.clone());

        Arc::new(AccessService::new(
            AccessConfig::default(),
            trust,
            bus.clone(),
            bus,
            Arc::new(Registry::new()),
        ))
    }

    #[test]
    fn test_routes() {
        let bus = LocalBus::new();
        let service = service(&bus);
        assert_eq!(
            service.route(Endpoint::Access),
            ("chat.req.access".to_string(), Some("kubecon"))
        );
        assert_eq!(
            service.route(Endpoint::Presence),
            ("chat.KUBECON.online".to_string(), None)
        );
    }

    #[tokio::test]
    async fn test_start_and_drain_releases_subscriptions() {
        let bus = LocalBus::new();
        let service = service(&bus);

        let handle = service.start().await.unwrap();
        assert_eq!(bus.subscription_count(), Endpoint::ALL.len());

        handle.drain().await;
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_replies_to_access_request() {
        let bus = LocalBus::new();
        let service = service(&bus);
        let mut inbox = bus.subscribe("_INBOX.test", None).await.unwrap();

        service
            .dispatch(
                Endpoint::Access,
                Message::new(ACCESS_REQUEST_SUBJECT, Some("_INBOX.test".into()), b"Dana".to_vec()),
            )
            .await;

        let reply = inbox.next().await.unwrap();
        assert!(reply.payload_str().contains("BEGIN NATS USER JWT"));
        assert!(service.registry().lookup("dana").is_some());
    }
}
