//! The sink a reactive aggregation publishes into.

use super::types::{DropReason, PublicationEvent, SinkConfig, SubscriptionHandle};
use crate::error::AggregateError;
use crate::types::{DocumentId, SubscriptionId};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Callback run when the host stops a subscription.
pub type StopHook = Box<dyn FnOnce() + Send>;

/// Host-provided subscription capability.
///
/// No document call is made before the first recompute completes.
pub trait SubscriptionSink: Send + Sync {
    /// Identity of the subscription; keys the extras singleton.
    fn id(&self) -> SubscriptionId;

    fn added(&self, collection: &str, id: &DocumentId, fields: &Value);

    fn changed(&self, collection: &str, id: &DocumentId, fields: &Value);

    fn removed(&self, collection: &str, id: &DocumentId);

    /// The initial snapshot has been published.
    fn ready(&self);

    /// The subscription terminated with `error`.
    fn error(&self, error: &AggregateError);

    /// A recompute failed; previously published records stand.
    fn recompute_failed(&self, _error: &AggregateError) {}

    /// Register `hook` to run when the host stops the subscription.
    fn on_stop(&self, hook: StopHook);
}

/// Sink that forwards events into a bounded channel.
///
/// A subscriber that falls `buffer_size` events behind is dropped: it gets a
/// best-effort [`PublicationEvent::Dropped`] and the stop hooks run.
pub struct ChannelSink {
    id: SubscriptionId,
    sender: Sender<PublicationEvent>,
    dropped: AtomicBool,
    hooks: Mutex<StopHooks>,
}

#[derive(Default)]
struct StopHooks {
    stopped: bool,
    pending: Vec<StopHook>,
}

impl ChannelSink {
    /// Create a sink and the handle that receives its events.
    pub fn new(id: SubscriptionId, config: SinkConfig) -> (Arc<Self>, SubscriptionHandle) {
        let (sender, receiver) = bounded(config.buffer_size);
        let sink = Arc::new(Self {
            id,
            sender,
            dropped: AtomicBool::new(false),
            hooks: Mutex::new(StopHooks::default()),
        });
        (sink, SubscriptionHandle { id, receiver })
    }

    /// Stop the subscription from the host side.
    pub fn stop(&self) {
        self.drop_subscriber(DropReason::Unsubscribed);
    }

    /// Whether the subscriber has been dropped.
    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }

    fn send(&self, event: PublicationEvent) {
        if self.is_dropped() {
            return;
        }
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.drop_subscriber(DropReason::BufferOverflow),
            Err(TrySendError::Disconnected(_)) => self.drop_subscriber(DropReason::Disconnected),
        }
    }

    fn drop_subscriber(&self, reason: DropReason) {
        if self.dropped.swap(true, Ordering::SeqCst) {
            return;
        }
        // Might fail if the buffer is full, that's ok.
        let _ = self.sender.try_send(PublicationEvent::Dropped { reason });
        self.run_stop_hooks();
    }

    fn run_stop_hooks(&self) {
        let pending = {
            let mut hooks = self.hooks.lock();
            if hooks.stopped {
                return;
            }
            hooks.stopped = true;
            std::mem::take(&mut hooks.pending)
        };
        for hook in pending {
            hook();
        }
    }
}

impl SubscriptionSink for ChannelSink {
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn added(&self, collection: &str, id: &DocumentId, fields: &Value) {
        self.send(PublicationEvent::Added {
            collection: collection.to_string(),
            id: id.clone(),
            fields: fields.clone(),
        });
    }

    fn changed(&self, collection: &str, id: &DocumentId, fields: &Value) {
        self.send(PublicationEvent::Changed {
            collection: collection.to_string(),
            id: id.clone(),
            fields: fields.clone(),
        });
    }

    fn removed(&self, collection: &str, id: &DocumentId) {
        self.send(PublicationEvent::Removed {
            collection: collection.to_string(),
            id: id.clone(),
        });
    }

    fn ready(&self) {
        self.send(PublicationEvent::Ready);
    }

    fn error(&self, error: &AggregateError) {
        self.send(PublicationEvent::failure(error, true));
        self.drop_subscriber(DropReason::Error(error.to_string()));
    }

    fn recompute_failed(&self, error: &AggregateError) {
        self.send(PublicationEvent::failure(error, false));
    }

    fn on_stop(&self, hook: StopHook) {
        let mut hooks = self.hooks.lock();
        if hooks.stopped {
            drop(hooks);
            hook();
        } else {
            hooks.pending.push(hook);
        }
    }
}
