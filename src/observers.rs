//! Observer wiring.
//!
//! Each attached [`Watchable`] receives its own [`ChangeNotifier`]; every
//! notification becomes a signal on the subscription's command queue. The
//! returned [`ObserveHandle`]s are owned by an [`ObserverSet`] and released
//! together when the subscription stops.

use crate::error::{AggregateError, Result};
use crate::source::{ObserveHandle, Watchable};
use crate::types::{ChangeKind, DocumentId};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Message consumed by a subscription worker.
#[derive(Debug)]
pub(crate) enum Signal {
    /// An observer reported a change.
    Change(ChangeKind),
    /// Recompute immediately, bypassing debounce.
    Recompute,
    /// An observer failed.
    ObserverFailed(String),
    /// Exit the worker.
    Stop,
}

/// Lifecycle flags shared by a subscription and its notifiers.
#[derive(Debug)]
pub(crate) struct SignalGate {
    initializing: AtomicBool,
    stopped: AtomicBool,
}

impl SignalGate {
    pub(crate) fn new() -> Self {
        Self {
            initializing: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    pub(crate) fn finish_initializing(&self) {
        self.initializing.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_initializing(&self) -> bool {
        self.initializing.load(Ordering::SeqCst)
    }

    /// Returns true the first time it is called.
    pub(crate) fn close(&self) -> bool {
        !self.stopped.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Change-signal input handed to observers.
///
/// Signals received while the subscription is still initializing are
/// ignored; the first snapshot comes from an explicit recompute.
#[derive(Clone, Debug)]
pub struct ChangeNotifier {
    sender: Sender<Signal>,
    gate: Arc<SignalGate>,
}

impl ChangeNotifier {
    pub(crate) fn new(sender: Sender<Signal>, gate: Arc<SignalGate>) -> Self {
        Self { sender, gate }
    }

    /// A notifier wired to a fresh queue, for driving observers in isolation.
    pub fn detached() -> (Self, DetachedSignals) {
        let (sender, receiver) = unbounded();
        let gate = Arc::new(SignalGate::new());
        gate.finish_initializing();
        (Self::new(sender, gate), DetachedSignals { receiver })
    }

    pub fn added(&self, id: &DocumentId) {
        self.notify(ChangeKind::Added, id);
    }

    pub fn changed(&self, id: &DocumentId) {
        self.notify(ChangeKind::Changed, id);
    }

    pub fn removed(&self, id: &DocumentId) {
        self.notify(ChangeKind::Removed, id);
    }

    pub fn notify(&self, kind: ChangeKind, id: &DocumentId) {
        if self.gate.is_stopped() {
            return;
        }
        if self.gate.is_initializing() {
            trace!(?kind, %id, "ignoring change during initialization");
            return;
        }
        let _ = self.sender.send(Signal::Change(kind));
    }

    /// Report a failure of the change source. This terminates the subscription.
    pub fn error(&self, message: impl Into<String>) {
        if self.gate.is_stopped() {
            return;
        }
        let _ = self.sender.send(Signal::ObserverFailed(message.into()));
    }

    /// Whether the subscription behind this notifier has stopped.
    pub fn is_closed(&self) -> bool {
        self.gate.is_stopped()
    }
}

/// Receiving end of [`ChangeNotifier::detached`].
pub struct DetachedSignals {
    receiver: Receiver<Signal>,
}

impl DetachedSignals {
    /// Drain pending change kinds. Observer errors are returned as `Err`.
    pub fn drain(&self) -> Vec<std::result::Result<ChangeKind, String>> {
        self.receiver
            .try_iter()
            .filter_map(|signal| match signal {
                Signal::Change(kind) => Some(Ok(kind)),
                Signal::ObserverFailed(message) => Some(Err(message)),
                Signal::Recompute | Signal::Stop => None,
            })
            .collect()
    }
}

/// The observers attached to one subscription.
#[derive(Default)]
pub struct ObserverSet {
    handles: Vec<Box<dyn ObserveHandle>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `watchable`, keeping its handle for [`ObserverSet::stop_all`].
    pub fn attach(&mut self, watchable: &dyn Watchable, notifier: ChangeNotifier) -> Result<()> {
        let handle = watchable
            .observe_changes(notifier)
            .map_err(|e| AggregateError::Observer(e.to_string()))?;
        self.handles.push(handle);
        Ok(())
    }

    /// Detach every observer.
    pub fn stop_all(&mut self) {
        for mut handle in self.handles.drain(..) {
            handle.stop();
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Drop for ObserverSet {
    fn drop(&mut self) {
        self.stop_all();
    }
}
