//! Reactive aggregation: keeps a subscription's published set in step with
//! the result of an aggregation pipeline.
//!
//! ## Lifecycle
//!
//! 1. **Setup**: validate the configuration, register the stop hook, attach
//!    the observers (the automatic one over the primary source last).
//! 2. **Initial snapshot**: one unconditional recompute on the caller's
//!    thread, then `ready`. Signals received until then are ignored.
//! 3. **Live**: a dedicated worker owns the differ and the debounce state.
//!    Change signals queue on its channel while a recompute is running and
//!    are coalesced afterwards, so recomputes never overlap.
//! 4. **Stop**: observers are detached synchronously, a scheduled recompute
//!    becomes a no-op, and an in-flight one discards its output.

use crate::config::ReactiveAggregateConfig;
use crate::debounce::{DebounceState, SignalOutcome};
use crate::diff::{DiffOp, DiffResult, ExtrasOp, Snapshot, SnapshotDiffer};
use crate::error::{AggregateError, Result};
use crate::observers::{ChangeNotifier, ObserverSet, Signal, SignalGate};
use crate::source::{DataSource, Watchable};
use crate::subscriptions::SubscriptionSink;
use crate::types::{AggregateStats, Document, DocumentId, SubscriptionId};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// State shared between the subscription handle, its stop hook and its
/// worker.
struct Shared {
    id: SubscriptionId,
    gate: Arc<SignalGate>,
    observers: Mutex<ObserverSet>,
    control: Sender<Signal>,
    stats: Mutex<AggregateStats>,
    /// Held around every sink call a recompute makes. Reentrant because a
    /// sink may stop the subscription from inside one of its calls.
    publishing: ReentrantMutex<()>,
}

impl Shared {
    /// Detach observers and wake the worker so it exits. Idempotent.
    ///
    /// Once this returns no recompute starts another sink call.
    fn shutdown(&self) -> bool {
        if !self.gate.close() {
            return false;
        }
        // Wait out a sink call already in progress.
        drop(self.publishing.lock());
        self.observers.lock().stop_all();
        let _ = self.control.send(Signal::Stop);
        info!(subscription = %self.id, "reactive aggregate stopped");
        true
    }

    /// Run `call` against the sink unless the subscription has stopped.
    fn fenced<F: FnOnce()>(&self, call: F) -> bool {
        let _guard = self.publishing.lock();
        if self.gate.is_stopped() {
            return false;
        }
        call();
        true
    }

    fn notifier(&self) -> ChangeNotifier {
        ChangeNotifier::new(self.control.clone(), Arc::clone(&self.gate))
    }
}

/// Where published records go.
struct Targets {
    documents: String,
    extras: String,
    extras_id: DocumentId,
}

/// Runs recomputes. Owned by exactly one thread at a time.
struct Recomputer {
    shared: Arc<Shared>,
    sink: Arc<dyn SubscriptionSink>,
    source: Arc<dyn DataSource>,
    pipeline: Vec<Value>,
    options: Document,
    docs_prop_name: Option<String>,
    targets: Targets,
    differ: SnapshotDiffer,
}

impl Recomputer {
    fn ensure_running(&self) -> Result<()> {
        if self.shared.gate.is_stopped() {
            Err(AggregateError::Stopped)
        } else {
            Ok(())
        }
    }

    /// Aggregate, diff and publish. On error the published state is
    /// unchanged.
    fn recompute(&mut self) -> Result<()> {
        self.ensure_running()?;

        let records = self
            .source
            .aggregate(&self.pipeline, &self.options)
            .map_err(AggregateError::Aggregation)?;

        // The subscription may have stopped while the aggregation ran.
        self.ensure_running()?;

        let snapshot = Snapshot::from_records(records, self.docs_prop_name.as_deref())?;
        let result = self.differ.diff(snapshot)?;
        self.publish(&result)?;

        let mut stats = self.shared.stats.lock();
        stats.recomputes += 1;
        stats.iteration = result.iteration;
        stats.published_documents = self.differ.identities().len();
        drop(stats);

        debug!(
            subscription = %self.shared.id,
            iteration = result.iteration.0,
            added = result.added(),
            changed = result.changed(),
            removed = result.removed(),
            "published snapshot"
        );
        Ok(())
    }

    /// Send `result` to the sink, extras first. Fails with
    /// [`AggregateError::Stopped`] if the subscription stops part way.
    fn publish(&self, result: &DiffResult) -> Result<()> {
        if let Some(extras) = &result.extras {
            let fields = Value::Object(extras.fields().clone());
            let (target, id) = (&self.targets.extras, &self.targets.extras_id);
            let sent = self.shared.fenced(|| match extras {
                ExtrasOp::Added(_) => self.sink.added(target, id, &fields),
                ExtrasOp::Changed(_) => self.sink.changed(target, id, &fields),
            });
            if !sent {
                return Err(AggregateError::Stopped);
            }
        }

        let collection = self.targets.documents.as_str();
        for op in &result.ops {
            let sent = self.shared.fenced(|| match op {
                DiffOp::Added { id, fields } => self.sink.added(collection, id, fields),
                DiffOp::Changed { id, fields } => self.sink.changed(collection, id, fields),
                DiffOp::Removed { id } => self.sink.removed(collection, id),
            });
            if !sent {
                trace!(subscription = %self.shared.id, "stopped mid-publish");
                return Err(AggregateError::Stopped);
            }
        }
        Ok(())
    }

    fn report_failure(&self, error: &AggregateError) {
        self.shared.stats.lock().failed_recomputes += 1;
        warn!(
            subscription = %self.shared.id,
            kind = %error.kind(),
            error = %error,
            "recompute failed, keeping last published state"
        );
        self.shared.fenced(|| self.sink.recompute_failed(error));
    }

    /// Worker loop. Returns when the subscription stops.
    fn run(mut self, signals: Receiver<Signal>, mut debounce: DebounceState) {
        loop {
            let first = match debounce.deadline() {
                Some(deadline) => match signals.recv_deadline(deadline) {
                    Ok(signal) => Some(signal),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => return,
                },
                None => match signals.recv() {
                    Ok(signal) => Some(signal),
                    Err(_) => return,
                },
            };

            let mut due = false;
            for signal in first.into_iter().chain(signals.try_iter()) {
                match signal {
                    Signal::Change(kind) => {
                        self.shared.stats.lock().signals += 1;
                        match debounce.on_signal(Instant::now()) {
                            SignalOutcome::RecomputeNow => due = true,
                            outcome => trace!(
                                subscription = %self.shared.id,
                                ?kind,
                                ?outcome,
                                "change coalesced"
                            ),
                        }
                    }
                    Signal::Recompute => {
                        debounce.reset();
                        due = true;
                    }
                    Signal::ObserverFailed(message) => {
                        self.fail(AggregateError::Observer(message));
                        return;
                    }
                    Signal::Stop => return,
                }
            }

            if self.shared.gate.is_stopped() {
                return;
            }
            due |= debounce.on_timer(Instant::now());
            if !due {
                continue;
            }

            match self.recompute() {
                Ok(()) => {}
                Err(AggregateError::Stopped) => {
                    debug!(subscription = %self.shared.id, "discarding recompute after stop");
                    return;
                }
                Err(err) => self.report_failure(&err),
            }
        }
    }

    /// Terminate the subscription with a fatal error.
    fn fail(&self, error: AggregateError) {
        warn!(subscription = %self.shared.id, error = %error, "subscription failed");
        if self.shared.shutdown() {
            self.sink.error(&error);
        }
    }
}

/// A live reactive aggregation bound to one subscription.
///
/// Dropping it stops the subscription.
pub struct ReactiveAggregate {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl ReactiveAggregate {
    /// Validate `config`, wire observers, publish the initial snapshot and
    /// start watching.
    ///
    /// Fails with a configuration error before anything is published, with
    /// an observer error if a change source cannot be attached, or with the
    /// error of the initial recompute.
    pub fn start(
        sink: Arc<dyn SubscriptionSink>,
        source: Arc<dyn DataSource>,
        config: ReactiveAggregateConfig,
    ) -> Result<Self> {
        config.validate()?;

        let id = sink.id();
        let (control, signals) = unbounded();
        let gate = Arc::new(SignalGate::new());
        let shared = Arc::new(Shared {
            id,
            gate: Arc::clone(&gate),
            observers: Mutex::new(ObserverSet::new()),
            control,
            stats: Mutex::new(AggregateStats::default()),
            publishing: ReentrantMutex::new(()),
        });

        let stop_shared = Arc::clone(&shared);
        sink.on_stop(Box::new(move || {
            stop_shared.shutdown();
        }));

        let mut watched: Vec<Arc<dyn Watchable>> = config.observers.clone();
        if !config.no_automatic_observer {
            let cursor = source
                .find(&config.observe_selector, &config.observe_options)
                .map_err(|e| {
                    AggregateError::Configuration(format!(
                        "cannot observe `{}`: {}",
                        source.name(),
                        e
                    ))
                });
            match cursor {
                Ok(cursor) => watched.push(cursor),
                Err(err) => {
                    shared.shutdown();
                    return Err(err);
                }
            }
        }

        if let Err(err) = Self::wire(&shared, &watched) {
            shared.shutdown();
            return Err(err);
        }

        let targets = Targets {
            documents: config
                .client_collection
                .clone()
                .unwrap_or_else(|| source.name().to_string()),
            extras: config.client_extras_collection.clone(),
            extras_id: DocumentId::Str(id.to_string()),
        };
        let debounce = DebounceState::new(config.debounce());
        let mut recomputer = Recomputer {
            shared: Arc::clone(&shared),
            sink: Arc::clone(&sink),
            source,
            pipeline: config.pipeline,
            options: config.aggregation_options,
            docs_prop_name: config.docs_prop_name,
            targets,
            differ: SnapshotDiffer::new(config.id_field),
        };

        if let Err(err) = recomputer.recompute() {
            shared.shutdown();
            return Err(err);
        }
        gate.finish_initializing();
        if !shared.fenced(|| sink.ready()) {
            return Err(AggregateError::Stopped);
        }

        let worker = thread::Builder::new()
            .name(format!("reactive-aggregate-{}", id))
            .spawn(move || recomputer.run(signals, debounce));
        let worker = match worker {
            Ok(worker) => worker,
            Err(err) => {
                shared.shutdown();
                return Err(err.into());
            }
        };

        info!(
            subscription = %id,
            observers = shared.observers.lock().len(),
            "reactive aggregate ready"
        );

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    fn wire(shared: &Shared, watched: &[Arc<dyn Watchable>]) -> Result<()> {
        let mut observers = shared.observers.lock();
        for watchable in watched {
            observers.attach(watchable.as_ref(), shared.notifier())?;
        }
        Ok(())
    }

    pub fn id(&self) -> SubscriptionId {
        self.shared.id
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.gate.is_stopped()
    }

    /// Whether the worker thread is still alive.
    pub fn is_worker_running(&self) -> bool {
        self.worker
            .as_ref()
            .map_or(false, |worker| !worker.is_finished())
    }

    /// Number of attached observers (0 once stopped).
    pub fn observer_count(&self) -> usize {
        self.shared.observers.lock().len()
    }

    pub fn stats(&self) -> AggregateStats {
        self.shared.stats.lock().clone()
    }

    /// Queue a recompute that bypasses debouncing.
    pub fn request_recompute(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(AggregateError::Stopped);
        }
        self.shared
            .control
            .send(Signal::Recompute)
            .map_err(|_| AggregateError::Stopped)
    }

    /// Stop the subscription. Observers are detached before this returns.
    pub fn stop(&self) {
        self.shared.shutdown();
    }
}

impl Drop for ReactiveAggregate {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCollection;
    use crate::subscriptions::{ChannelSink, PublicationEvent, SinkConfig};
    use serde_json::json;
    use std::time::Duration;

    fn collection() -> Arc<MemoryCollection> {
        let books = MemoryCollection::new("books");
        books.upsert(json!({"_id": 1, "title": "Dune"})).unwrap();
        books.upsert(json!({"_id": 2, "title": "Emma"})).unwrap();
        Arc::new(books)
    }

    fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_initial_snapshot_then_ready() {
        let books = collection();
        let (sink, handle) = ChannelSink::new(SubscriptionId(1), SinkConfig::default());
        let aggregate = ReactiveAggregate::start(
            sink,
            books.clone(),
            ReactiveAggregateConfig::new(vec![json!({"$match": {}})]),
        )
        .unwrap();

        let events = handle.drain();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            PublicationEvent::Added { collection, id, .. } if collection == "books" && *id == DocumentId::Int(1)
        ));
        assert_eq!(events[2], PublicationEvent::Ready);

        // Initial documents announced by the observer were ignored.
        assert_eq!(books.aggregate_calls(), 1);
        assert_eq!(aggregate.observer_count(), 1);
        assert_eq!(aggregate.stats().recomputes, 1);
        assert_eq!(aggregate.stats().signals, 0);
    }

    #[test]
    fn test_change_triggers_recompute() {
        let books = collection();
        let (sink, handle) = ChannelSink::new(SubscriptionId(2), SinkConfig::default());
        let aggregate =
            ReactiveAggregate::start(sink, books.clone(), ReactiveAggregateConfig::default())
                .unwrap();
        handle.drain();

        books.remove(&DocumentId::Int(1));
        assert!(wait_for(|| aggregate.stats().recomputes == 2));

        let events = handle.drain();
        assert_eq!(
            events.last(),
            Some(&PublicationEvent::Removed {
                collection: "books".into(),
                id: DocumentId::Int(1)
            })
        );
        assert_eq!(aggregate.stats().published_documents, 1);
    }

    #[test]
    fn test_stop_detaches_observers() {
        let books = collection();
        let (sink, _handle) = ChannelSink::new(SubscriptionId(3), SinkConfig::default());
        let aggregate =
            ReactiveAggregate::start(sink, books.clone(), ReactiveAggregateConfig::default())
                .unwrap();
        assert_eq!(books.observer_count(), 1);

        aggregate.stop();
        assert!(aggregate.is_stopped());
        assert_eq!(books.observer_count(), 0);
        assert_eq!(aggregate.observer_count(), 0);
        assert!(matches!(
            aggregate.request_recompute(),
            Err(AggregateError::Stopped)
        ));
        assert!(wait_for(|| !aggregate.is_worker_running()));
    }

    #[test]
    fn test_no_automatic_observer() {
        let books = collection();
        let (sink, _handle) = ChannelSink::new(SubscriptionId(4), SinkConfig::default());
        let aggregate = ReactiveAggregate::start(
            sink,
            books.clone(),
            ReactiveAggregateConfig {
                no_automatic_observer: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(aggregate.observer_count(), 0);
        assert_eq!(books.observer_count(), 0);
    }

    #[test]
    fn test_host_stop_hook_stops_aggregate() {
        let books = collection();
        let (sink, _handle) = ChannelSink::new(SubscriptionId(5), SinkConfig::default());
        let aggregate = ReactiveAggregate::start(
            sink.clone(),
            books.clone(),
            ReactiveAggregateConfig::default(),
        )
        .unwrap();

        sink.stop();
        assert!(aggregate.is_stopped());
        assert_eq!(books.observer_count(), 0);
    }
}
