//! Shared helpers for integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use reactive_aggregate::{
    AggregateError, DocumentId, ErrorKind, StopHook, SubscriptionId, SubscriptionSink,
};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Poll `condition` for up to five seconds.
pub fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Sleep long enough for a worker to go idle.
pub fn settle() {
    std::thread::sleep(Duration::from_millis(100));
}

/// One call made on a [`RecordingSink`].
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Added(String, DocumentId, Value),
    Changed(String, DocumentId, Value),
    Removed(String, DocumentId),
    Ready,
    RecomputeFailed(ErrorKind),
    Error(ErrorKind),
}

/// Sink that records every call and checks protocol invariants as they
/// happen.
pub struct RecordingSink {
    id: SubscriptionId,
    calls: Mutex<Vec<Call>>,
    present: Mutex<HashSet<(String, DocumentId)>>,
    violations: Mutex<Vec<String>>,
    hooks: Mutex<Vec<StopHook>>,
}

impl RecordingSink {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id: SubscriptionId(id),
            calls: Mutex::new(Vec::new()),
            present: Mutex::new(HashSet::new()),
            violations: Mutex::new(Vec::new()),
            hooks: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock())
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Identities the subscriber currently believes present in `collection`.
    pub fn present(&self, collection: &str) -> HashSet<DocumentId> {
        self.present
            .lock()
            .iter()
            .filter(|(c, _)| c == collection)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn violations(&self) -> Vec<String> {
        self.violations.lock().clone()
    }

    /// Run the registered stop hooks, as a host would on unsubscribe.
    pub fn stop(&self) {
        let hooks = std::mem::take(&mut *self.hooks.lock());
        for hook in hooks {
            hook();
        }
    }
}

impl SubscriptionSink for RecordingSink {
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn added(&self, collection: &str, id: &DocumentId, fields: &Value) {
        if !self.present.lock().insert((collection.to_string(), id.clone())) {
            self.violations
                .lock()
                .push(format!("duplicate add of {} in {}", id, collection));
        }
        self.calls
            .lock()
            .push(Call::Added(collection.to_string(), id.clone(), fields.clone()));
    }

    fn changed(&self, collection: &str, id: &DocumentId, fields: &Value) {
        if !self.present.lock().contains(&(collection.to_string(), id.clone())) {
            self.violations
                .lock()
                .push(format!("change of unknown {} in {}", id, collection));
        }
        self.calls
            .lock()
            .push(Call::Changed(collection.to_string(), id.clone(), fields.clone()));
    }

    fn removed(&self, collection: &str, id: &DocumentId) {
        if !self.present.lock().remove(&(collection.to_string(), id.clone())) {
            self.violations
                .lock()
                .push(format!("orphan remove of {} in {}", id, collection));
        }
        self.calls
            .lock()
            .push(Call::Removed(collection.to_string(), id.clone()));
    }

    fn ready(&self) {
        self.calls.lock().push(Call::Ready);
    }

    fn error(&self, error: &AggregateError) {
        self.calls.lock().push(Call::Error(error.kind()));
    }

    fn recompute_failed(&self, error: &AggregateError) {
        self.calls.lock().push(Call::RecomputeFailed(error.kind()));
    }

    fn on_stop(&self, hook: StopHook) {
        self.hooks.lock().push(hook);
    }
}

pub fn ids(values: &[i64]) -> HashSet<DocumentId> {
    values.iter().map(|v| DocumentId::Int(*v)).collect()
}
