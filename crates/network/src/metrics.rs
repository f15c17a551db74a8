use std::sync::atomic::{AtomicU64, Ordering};

/// Bus traffic counters
#[derive(Debug, Default)]
pub struct BusMetrics {
    published: AtomicU64,
    delivered: AtomicU64,
    unrouted: AtomicU64,
    subscriptions: AtomicU64,
}

impl BusMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a publish that reached `delivered` subscribers
    pub fn on_publish(&self, delivered: usize) {
        self.published.fetch_add(1, Ordering::Relaxed);
        if delivered > 0 {
            self.delivered
                .fetch_add(delivered as u64, Ordering::Relaxed);
        } else {
            self.unrouted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn on_subscribe(&self) {
        self.subscriptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BusMetricsSnapshot {
        BusMetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            unrouted: self.unrouted.load(Ordering::Relaxed),
            subscriptions: self.subscriptions.load(Ordering::Relaxed),
        }
    }
}

/// Read-only metrics snapshot for external consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMetricsSnapshot {
    pub published: u64,
    pub delivered: u64,
    /// Publishes that matched no subscriber
    pub unrouted: u64,
    pub subscriptions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_counters() {
        let metrics = BusMetrics::new();
        metrics.on_publish(2);
        metrics.on_publish(0);
        metrics.on_subscribe();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.published, 2);
        assert_eq!(snapshot.delivered, 2);
        assert_eq!(snapshot.unrouted, 1);
        assert_eq!(snapshot.subscriptions, 1);
    }
}
