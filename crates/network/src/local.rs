//! In-process message bus
//!
//! Backs the self-contained node and the test suites. Delivery is
//! unbounded and in publish order per subscriber; queue groups are served
//! round-robin.

use crate::bus::{BusError, Message, MessageBus, Subscription};
use crate::metrics::{BusMetrics, BusMetricsSnapshot};
use crate::subject::{is_valid_pattern, is_valid_subject, subject_matches};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

#[derive(Debug)]
struct SubscriptionEntry {
    id: u64,
    pattern: String,
    queue_group: Option<String>,
    sender: mpsc::UnboundedSender<Message>,
}

#[derive(Debug, Default)]
struct LocalBusInner {
    subscriptions: RwLock<Vec<SubscriptionEntry>>,
    next_id: AtomicU64,
    round_robin: AtomicUsize,
    closed: AtomicBool,
    metrics: BusMetrics,
}

/// Cloneable handle to a shared in-process bus
#[derive(Debug, Clone, Default)]
pub struct LocalBus {
    inner: Arc<LocalBusInner>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the bus: all subscriptions end and further operations fail
    /// with [`BusError::Closed`].
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.subscriptions.write().clear();
        debug!("Local bus closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.inner
            .subscriptions
            .read()
            .iter()
            .filter(|entry| !entry.sender.is_closed())
            .count()
    }

    pub fn metrics(&self) -> BusMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.is_closed() {
            Err(BusError::Closed)
        } else {
            Ok(())
        }
    }

    fn deliver(&self, message: Message) -> Result<usize, BusError> {
        self.ensure_open()?;
        if !is_valid_subject(&message.subject) {
            return Err(BusError::InvalidSubject(message.subject));
        }

        let mut delivered = 0;
        let mut saw_closed = false;
        {
            let subscriptions = self.inner.subscriptions.read();
            let mut groups: BTreeMap<&str, Vec<&SubscriptionEntry>> = BTreeMap::new();

            for entry in subscriptions
                .iter()
                .filter(|entry| subject_matches(&entry.pattern, &message.subject))
            {
                if entry.sender.is_closed() {
                    saw_closed = true;
                    continue;
                }
                match entry.queue_group.as_deref() {
                    Some(group) => groups.entry(group).or_default().push(entry),
                    None => {
                        if entry.sender.send(message.clone()).is_ok() {
                            delivered += 1;
                        }
                    }
                }
            }

            for members in groups.values() {
                let pick = self.inner.round_robin.fetch_add(1, Ordering::Relaxed) % members.len();
                if members[pick].sender.send(message.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }

        if saw_closed {
            self.inner
                .subscriptions
                .write()
                .retain(|entry| !entry.sender.is_closed());
        }

        trace!("Delivered {} to {} subscriber(s)", message.subject, delivered);
        self.inner.metrics.on_publish(delivered);
        Ok(delivered)
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<usize, BusError> {
        self.deliver(Message::new(subject, None, payload))
    }

    async fn publish_request(
        &self,
        subject: &str,
        reply: &str,
        payload: Vec<u8>,
    ) -> Result<usize, BusError> {
        if !is_valid_subject(reply) {
            return Err(BusError::InvalidSubject(reply.to_string()));
        }
        self.deliver(Message::new(subject, Some(reply.to_string()), payload))
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
    ) -> Result<Subscription, BusError> {
        self.ensure_open()?;
        if !is_valid_pattern(subject) {
            return Err(BusError::InvalidSubject(subject.to_string()));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner.subscriptions.write().push(SubscriptionEntry {
            id,
            pattern: subject.to_string(),
            queue_group: queue_group.map(str::to_string),
            sender,
        });
        self.inner.metrics.on_subscribe();
        debug!("Subscribed #{} to {} (queue: {:?})", id, subject, queue_group);

        Ok(Subscription::new(id, subject, receiver))
    }

    async fn unsubscribe(&self, id: u64) -> Result<(), BusError> {
        self.inner
            .subscriptions
            .write()
            .retain(|entry| entry.id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn plain_subscribers_each_get_a_copy() {
        let bus = LocalBus::new();
        let mut a = bus.subscribe("chat.KUBECON.online", None).await.unwrap();
        let mut b = bus.subscribe("chat.*.online", None).await.unwrap();

        let delivered = bus
            .publish("chat.KUBECON.online", b"hello".to_vec())
            .await
            .unwrap();
        assert_eq!(delivered, 2);

        assert_eq!(a.next().await.unwrap().payload, b"hello");
        assert_eq!(b.next().await.unwrap().payload, b"hello");
    }

    #[tokio::test]
    async fn queue_group_delivers_once() {
        let bus = LocalBus::new();
        let mut first = bus.subscribe("chat.req.access", Some("kubecon")).await.unwrap();
        let mut second = bus.subscribe("chat.req.access", Some("kubecon")).await.unwrap();

        for i in 0..4u8 {
            assert_eq!(bus.publish("chat.req.access", vec![i]).await.unwrap(), 1);
        }

        let mut received = 0;
        while let Ok(Some(_)) = timeout(Duration::from_millis(20), first.next()).await {
            received += 1;
        }
        while let Ok(Some(_)) = timeout(Duration::from_millis(20), second.next()).await {
            received += 1;
        }
        assert_eq!(received, 4);
    }

    #[tokio::test]
    async fn request_gets_reply() {
        let bus = LocalBus::new();
        let mut service = bus.subscribe("svc.echo", None).await.unwrap();
        let responder = bus.clone();
        tokio::spawn(async move {
            while let Some(message) = service.next().await {
                let payload = message.payload.clone();
                responder.respond(&message, payload).await.unwrap();
            }
        });

        let reply = bus
            .request("svc.echo", b"ping".to_vec(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.payload, b"ping");
        assert!(reply.subject.starts_with("_INBOX."));
    }

    #[tokio::test]
    async fn request_without_responders_fails_fast() {
        let bus = LocalBus::new();
        let err = bus
            .request("svc.nobody", Vec::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BusError::NoResponders {
                subject: "svc.nobody".into()
            }
        );
    }

    #[tokio::test]
    async fn request_times_out_when_nobody_answers() {
        let bus = LocalBus::new();
        let _silent = bus.subscribe("svc.silent", None).await.unwrap();

        let err = bus
            .request("svc.silent", Vec::new(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Timeout { .. }));
        // inbox cleaned up, only the silent subscriber remains
        assert_eq!(bus.subscription_count(), 1);
    }

    #[tokio::test]
    async fn dropped_subscriptions_stop_receiving() {
        let bus = LocalBus::new();
        let sub = bus.subscribe("chat.req.access", Some("kubecon")).await.unwrap();
        drop(sub);

        assert_eq!(bus.publish("chat.req.access", Vec::new()).await.unwrap(), 0);
        assert_eq!(bus.subscription_count(), 0);
        assert_eq!(bus.metrics().unrouted, 1);
    }

    #[tokio::test]
    async fn close_ends_subscriptions() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe("chat.req.access", None).await.unwrap();
        bus.close();

        assert!(sub.next().await.is_none());
        assert_eq!(
            bus.publish("chat.req.access", Vec::new()).await,
            Err(BusError::Closed)
        );
    }

    #[tokio::test]
    async fn invalid_subjects_rejected() {
        let bus = LocalBus::new();
        assert!(matches!(
            bus.publish("chat.*", Vec::new()).await,
            Err(BusError::InvalidSubject(_))
        ));
        assert!(bus.subscribe("chat.>.x", None).await.is_err());
    }

    #[test]
    fn unrouted_publishes_are_counted() {
        let bus = LocalBus::new();
        let delivered = tokio_test::block_on(bus.publish("chat.req.access", b"x".to_vec())).unwrap();
        assert_eq!(delivered, 0);

        let metrics = bus.metrics();
        assert_eq!(metrics.published, 1);
        assert_eq!(metrics.unrouted, 1);
        assert_eq!(metrics.delivered, 0);
    }
}
