//! Subscription manager for running reactive aggregations.

use crate::config::ReactiveAggregateConfig;
use crate::error::{AggregateError, Result};
use crate::reactive::ReactiveAggregate;
use crate::source::DataSource;
use crate::types::{AggregateStats, SubscriptionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

use super::sink::{ChannelSink, SubscriptionSink};
use super::types::{SinkConfig, SubscriptionHandle};

/// A running subscription and the sink it publishes into.
struct ActiveSubscription {
    aggregate: ReactiveAggregate,
    sink: Arc<ChannelSink>,
}

type Registry = RwLock<HashMap<SubscriptionId, ActiveSubscription>>;

/// Runs one reactive aggregation per subscription, each publishing into a
/// channel-backed sink.
///
/// A subscription that stops on its own (dropped subscriber, observer
/// failure) leaves the registry as soon as its sink stops.
pub struct SubscriptionManager {
    /// Active subscriptions by ID.
    subscriptions: Arc<Registry>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    /// Settings for new sinks.
    sink_config: SinkConfig,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self::with_sink_config(SinkConfig::default())
    }

    /// Create a new subscription manager with custom sink settings.
    pub fn with_sink_config(sink_config: SinkConfig) -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            sink_config,
        }
    }

    /// Start a reactive aggregation over `source`.
    ///
    /// The initial snapshot and `Ready` are already buffered in the returned
    /// handle.
    pub fn subscribe(
        &self,
        source: Arc<dyn DataSource>,
        config: ReactiveAggregateConfig,
    ) -> Result<SubscriptionHandle> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sink, handle) = ChannelSink::new(id, self.sink_config.clone());

        let aggregate = ReactiveAggregate::start(sink.clone(), source, config)?;
        self.subscriptions.write().insert(
            id,
            ActiveSubscription {
                aggregate,
                sink: Arc::clone(&sink),
            },
        );

        // Runs straight away if the sink already stopped.
        let registry = Arc::downgrade(&self.subscriptions);
        sink.on_stop(Box::new(move || forget(&registry, id)));

        debug!(subscription = %id, "subscribed");
        Ok(handle)
    }

    /// Unsubscribe and clean up. Returns false if `id` is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscriptions.write().remove(&id);
        match removed {
            Some(active) => {
                active.aggregate.stop();
                active.sink.stop();
                debug!(subscription = %id, "unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Force a recompute of one subscription.
    pub fn request_recompute(&self, id: SubscriptionId) -> Result<()> {
        match self.subscriptions.read().get(&id) {
            Some(active) => active.aggregate.request_recompute(),
            None => Err(AggregateError::Stopped),
        }
    }

    /// Statistics of one subscription.
    pub fn stats(&self, id: SubscriptionId) -> Option<AggregateStats> {
        self.subscriptions
            .read()
            .get(&id)
            .map(|active| active.aggregate.stats())
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Stop every subscription.
    pub fn stop_all(&self) {
        let drained: Vec<_> = self.subscriptions.write().drain().collect();
        for (_, active) in drained {
            active.aggregate.stop();
            active.sink.stop();
        }
    }
}

/// Drop `id` from the registry, if the manager is still alive.
fn forget(registry: &Weak<Registry>, id: SubscriptionId) {
    let Some(registry) = registry.upgrade() else {
        return;
    };
    // Dropped outside the lock.
    let removed = registry.write().remove(&id);
    if removed.is_some() {
        debug!(subscription = %id, "subscription stopped, removed");
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCollection;
    use crate::subscriptions::{DropReason, PublicationEvent};
    use crate::types::DocumentId;
    use serde_json::json;
    use std::time::Duration;

    fn books() -> Arc<MemoryCollection> {
        let books = MemoryCollection::new("books");
        books.upsert(json!({"_id": 1, "title": "Dune"})).unwrap();
        Arc::new(books)
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let manager = SubscriptionManager::new();
        let source = books();

        let handle = manager
            .subscribe(source.clone(), ReactiveAggregateConfig::default())
            .unwrap();
        assert_eq!(manager.subscription_count(), 1);
        assert_eq!(source.observer_count(), 1);

        assert!(manager.unsubscribe(handle.id));
        assert!(!manager.unsubscribe(handle.id));
        assert_eq!(manager.subscription_count(), 0);
        assert_eq!(source.observer_count(), 0);

        let events = handle.drain();
        assert_eq!(
            events.last(),
            Some(&PublicationEvent::Dropped {
                reason: DropReason::Unsubscribed
            })
        );
    }

    #[test]
    fn test_ids_are_distinct() {
        let manager = SubscriptionManager::new();
        let a = manager
            .subscribe(books(), ReactiveAggregateConfig::default())
            .unwrap();
        let b = manager
            .subscribe(books(), ReactiveAggregateConfig::default())
            .unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(manager.subscription_count(), 2);
        manager.stop_all();
        assert_eq!(manager.subscription_count(), 0);
    }

    #[test]
    fn test_failed_subscribe_is_not_registered() {
        let manager = SubscriptionManager::new();
        let result = manager.subscribe(
            books(),
            ReactiveAggregateConfig::new(vec![json!("not a stage")]),
        );
        assert!(matches!(result, Err(AggregateError::Configuration(_))));
        assert_eq!(manager.subscription_count(), 0);
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let manager = SubscriptionManager::with_sink_config(SinkConfig { buffer_size: 4 });
        let source = books();
        let handle = manager
            .subscribe(source.clone(), ReactiveAggregateConfig::default())
            .unwrap();

        // Never drained: each recompute adds more events than fit.
        for i in 2..10 {
            source.upsert(json!({ "_id": i })).unwrap();
            std::thread::sleep(Duration::from_millis(5));
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while manager.subscription_count() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(manager.subscription_count(), 0);
        assert_eq!(source.observer_count(), 0);
        assert!(handle
            .drain()
            .iter()
            .all(|event| event.document_id() != Some(&DocumentId::Int(9))));
    }

    #[test]
    fn test_overflowed_subscription_is_forgotten() {
        let manager = SubscriptionManager::with_sink_config(SinkConfig { buffer_size: 2 });
        let source = books();
        let handle = manager
            .subscribe(source.clone(), ReactiveAggregateConfig::default())
            .unwrap();
        assert!(manager.stats(handle.id).is_some());

        source.upsert(json!({"_id": 2})).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while manager.stats(handle.id).is_some() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(manager.stats(handle.id).is_none());
        assert!(manager.request_recompute(handle.id).is_err());
        assert_eq!(source.observer_count(), 0);
        assert!(!manager.unsubscribe(handle.id));
    }

    #[test]
    fn test_failed_subscription_is_forgotten() {
        let manager = SubscriptionManager::new();
        let source = books();
        let handle = manager
            .subscribe(source.clone(), ReactiveAggregateConfig::default())
            .unwrap();

        source.fail_observers("change stream closed");

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while manager.stats(handle.id).is_some() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(manager.stats(handle.id).is_none());
        assert_eq!(manager.subscription_count(), 0);
        assert!(matches!(
            handle.drain().last(),
            Some(PublicationEvent::Dropped {
                reason: DropReason::Error(_)
            })
        ));
    }

    #[test]
    fn test_request_recompute_unknown() {
        let manager = SubscriptionManager::new();
        assert!(manager.request_recompute(SubscriptionId(42)).is_err());
        assert!(manager.stats(SubscriptionId(42)).is_none());
    }
}
