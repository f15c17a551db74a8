#![allow(dead_code)]

use chat_access_crypto::{AccountClaims, KeyPair, KeyRole};
use chat_access_network::{LocalBus, Message, MessageBus};
use chat_access_registry::Registry;
use chat_access_service::{
    AccessConfig, AccessService, AccountResolver, ResolverHandle, ServiceHandle, TrustDomain,
};
use std::sync::Arc;
use std::time::Duration;

pub const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Harness {
    pub bus: LocalBus,
    pub registry: Arc<Registry>,
    pub service: Arc<AccessService>,
    pub resolver: Arc<AccountResolver>,
    pub account: String,
    service_handle: Option<ServiceHandle>,
    resolver_handle: Option<ResolverHandle>,
}

impl Harness {
    /// Service plus a resolver answering for its account
    pub async fn start() -> Self {
        Self::build(true).await
    }

    /// Service without anyone answering system requests
    pub async fn without_resolver() -> Self {
        Self::build(false).await
    }

    async fn build(serve_claims: bool) -> Self {
        let bus = LocalBus::new();
        let operator = KeyPair::generate(KeyRole::Operator);
        let account = KeyPair::generate(KeyRole::Account);
        let mut claims = AccountClaims::new(account.public_key());
        let token = claims.encode(&operator).unwrap();
        let account_id = account.public_key();

        let shared: Arc<dyn MessageBus> = Arc::new(bus.clone());
        let resolver = Arc::new(
            AccountResolver::new(shared.clone(), token, vec![operator.public_key()]).unwrap(),
        );
        let resolver_handle = if serve_claims {
            Some(resolver.clone().spawn().await.unwrap())
        } else {
            None
        };

        let trust = Arc::new(TrustDomain::new(claims, account, Some(operator)));
        let registry = Arc::new(Registry::new());
        let config = AccessConfig {
            server_label: "test/local".into(),
            system_request_timeout_ms: 250,
            ..Default::default()
        };
        let service = Arc::new(AccessService::new(
            config,
            trust,
            shared.clone(),
            shared,
            registry.clone(),
        ));
        let service_handle = Some(service.start().await.unwrap());

        Self {
            bus,
            registry,
            service,
            resolver,
            account: account_id,
            service_handle,
            resolver_handle,
        }
    }

    pub async fn request(&self, subject: &str, payload: &[u8]) -> Message {
        self.bus
            .request(subject, payload.to_vec(), REPLY_TIMEOUT)
            .await
            .unwrap()
    }

    pub async fn request_text(&self, subject: &str, payload: &[u8]) -> String {
        self.request(subject, payload).await.payload_str().into_owned()
    }

    /// Drain the service, leaving the bus and resolver up
    pub async fn drain_service(&mut self) {
        if let Some(handle) = self.service_handle.take() {
            handle.drain().await;
        }
    }

    pub async fn shutdown(mut self) {
        if let Some(handle) = self.service_handle.take() {
            handle.drain().await;
        }
        if let Some(handle) = self.resolver_handle.take() {
            handle.stop().await;
        }
        self.bus.close();
    }
}
