mod common;

use chat_access_crypto::{CredentialBundle, KeyRole, UserClaims};
use chat_access_network::MessageBus;
use chat_access_registry::RegistrySnapshot;
use chat_access_service::subjects::{ACCESS_REQUEST_SUBJECT, PROVISIONED_UPDATES_SUBJECT};
use common::{Harness, REPLY_TIMEOUT};
use futures::future::join_all;

#[tokio::test]
async fn test_issues_scoped_credentials() {
    let harness = Harness::start().await;
    let mut updates = harness
        .bus
        .subscribe(PROVISIONED_UPDATES_SUBJECT, None)
        .await
        .unwrap();

    let reply = harness
        .request_text(ACCESS_REQUEST_SUBJECT, b"Alice Smith")
        .await;
    let bundle = CredentialBundle::parse(&reply).unwrap();
    assert_eq!(bundle.location, "test/local");

    let claims = UserClaims::decode(&bundle.token).unwrap();
    assert_eq!(claims.name, "alice");
    assert_eq!(claims.nats.issuer_account, harness.account);
    assert!(claims.nats.subscribe.allow.contains(&format!(
        "chat.KUBECON.dms.{}",
        claims.sub
    )));
    assert!(claims
        .nats
        .publish
        .allow
        .contains(&"chat.KUBECON.dms.*".to_string()));

    let user = chat_access_crypto::KeyPair::from_seed(&bundle.seed).unwrap();
    assert_eq!(user.role(), KeyRole::User);
    assert_eq!(user.public_key(), claims.sub);
    assert_eq!(harness.registry.lookup("alice"), Some(claims.sub.clone()));

    let update = tokio::time::timeout(REPLY_TIMEOUT, updates.next())
        .await
        .unwrap()
        .unwrap();
    let snapshot: RegistrySnapshot = serde_json::from_slice(&update.payload).unwrap();
    assert_eq!(snapshot.get("alice"), Some(claims.sub.as_str()));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_and_empty_names_are_refused() {
    let harness = Harness::start().await;

    harness.request_text(ACCESS_REQUEST_SUBJECT, b"bob").await;
    let reply = harness.request_text(ACCESS_REQUEST_SUBJECT, b"BOB").await;
    assert_eq!(reply, "-ERR 'User already exists: bob'");

    let reply = harness.request_text(ACCESS_REQUEST_SUBJECT, b"").await;
    assert_eq!(reply, "-ERR 'Name can not be empty'");
    let reply = harness.request_text(ACCESS_REQUEST_SUBJECT, b" bob").await;
    assert_eq!(reply, "-ERR 'Name can not be empty'");

    assert_eq!(harness.registry.len(), 1);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_long_names_are_truncated() {
    let harness = Harness::start().await;

    let reply = harness
        .request_text(ACCESS_REQUEST_SUBJECT, b"Maximilian")
        .await;
    let bundle = CredentialBundle::parse(&reply).unwrap();
    let claims = UserClaims::decode(&bundle.token).unwrap();
    assert_eq!(claims.name, "maximili");

    let reply = harness.request_text(ACCESS_REQUEST_SUBJECT, b"maximilia").await;
    assert!(reply.starts_with("-ERR"));

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_for_one_name_yield_one_credential() {
    let harness = Harness::start().await;

    let replies = join_all(
        (0..16).map(|_| harness.request_text(ACCESS_REQUEST_SUBJECT, b"carol")),
    )
    .await;

    let issued = replies
        .iter()
        .filter(|reply| CredentialBundle::parse(reply).is_ok())
        .count();
    let refused = replies
        .iter()
        .filter(|reply| reply.as_str() == "-ERR 'User already exists: carol'")
        .count();
    assert_eq!(issued, 1);
    assert_eq!(refused, 15);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_drain_answers_requests_already_queued() {
    let mut harness = Harness::start().await;
    let inbox = chat_access_network::new_inbox();
    let mut replies = harness.bus.subscribe(&inbox, None).await.unwrap();

    let sent = 20;
    for i in 0..sent {
        let delivered = harness
            .bus
            .publish_request(ACCESS_REQUEST_SUBJECT, &inbox, format!("user{i:02}").into_bytes())
            .await
            .unwrap();
        assert_eq!(delivered, 1);
    }
    harness.drain_service().await;

    let mut answered = 0;
    while let Ok(Some(reply)) = tokio::time::timeout(REPLY_TIMEOUT, replies.next()).await {
        assert!(reply.payload_str().contains("BEGIN NATS USER JWT"));
        answered += 1;
        if answered == sent {
            break;
        }
    }
    assert_eq!(answered, sent);
    assert_eq!(harness.registry.len(), sent);
    harness.shutdown().await;
}
