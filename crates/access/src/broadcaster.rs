//! Registry snapshot broadcasts

use crate::errors::Result;
use crate::subjects::PROVISIONED_UPDATES_SUBJECT;
use chat_access_network::MessageBus;
use chat_access_registry::RegistrySnapshot;
use std::sync::Arc;
use tracing::{debug, warn};

/// Publishes the full name → key map after every registry change.
///
/// Delivery is best effort: a failed publish is logged and otherwise
/// ignored, since the next change publishes the complete map again.
pub struct SnapshotBroadcaster {
    bus: Arc<dyn MessageBus>,
    subject: String,
}

impl SnapshotBroadcaster {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self::with_subject(bus, PROVISIONED_UPDATES_SUBJECT)
    }

    pub fn with_subject(bus: Arc<dyn MessageBus>, subject: impl Into<String>) -> Self {
        Self {
            bus,
            subject: subject.into(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Serialize and publish `snapshot`.
    ///
    /// Only a serialization failure is reported to the caller.
    pub async fn publish(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        let payload = snapshot.to_json()?;

        match self.bus.publish(&self.subject, payload).await {
            Ok(receivers) => {
                metrics::counter!("chat_access_snapshots_published_total").increment(1);
                debug!(
                    "Broadcast snapshot of {} names to {} receivers",
                    snapshot.len(),
                    receivers
                );
            }
            Err(err) => {
                metrics::counter!("chat_access_snapshot_publish_failures_total").increment(1);
                warn!("Failed to broadcast registry snapshot: {}", err);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_access_network::LocalBus;
    use chat_access_registry::{CanonicalName, Registry};
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_snapshot_reaches_subscribers() {
        let bus = LocalBus::new();
        let mut updates = bus.subscribe(PROVISIONED_UPDATES_SUBJECT, None).await.unwrap();
        let broadcaster = SnapshotBroadcaster::new(Arc::new(bus.clone()));

        let registry = Registry::new();
        registry
            .register(&CanonicalName::parse("alice").unwrap(), "UALICE")
            .unwrap();
        broadcaster.publish(&registry.snapshot()).await.unwrap();

        let message = updates.next().await.unwrap();
        let map: BTreeMap<String, String> = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(map.get("alice").map(String::as_str), Some("UALICE"));
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let bus = LocalBus::new();
        bus.close();
        let broadcaster = SnapshotBroadcaster::new(Arc::new(bus));

        let snapshot = RegistrySnapshot::default();
        assert!(broadcaster.publish(&snapshot).await.is_ok());
    }
}
