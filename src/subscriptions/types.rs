//! Subscription types for publishing reactive aggregations.

use crate::error::{AggregateError, ErrorKind};
use crate::types::{DocumentId, SubscriptionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Configuration for a channel-backed subscription.
#[derive(Clone, Debug)]
pub struct SinkConfig {
    /// Max buffered events before dropping the subscriber.
    /// Default: 1000
    pub buffer_size: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}

/// Events delivered to a subscriber.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PublicationEvent {
    // --- Document Events ---
    /// A record entered the published set.
    Added {
        collection: String,
        id: DocumentId,
        fields: Value,
    },

    /// A published record was replaced.
    Changed {
        collection: String,
        id: DocumentId,
        fields: Value,
    },

    /// A record left the published set.
    Removed { collection: String, id: DocumentId },

    // --- Lifecycle Events ---
    /// The initial snapshot has been published.
    Ready,

    /// A recompute failed; the published set is unchanged.
    RecomputeFailed { kind: ErrorKind, message: String },

    /// The subscription terminated with an error.
    Error { kind: ErrorKind, message: String },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

impl PublicationEvent {
    pub(crate) fn failure(error: &AggregateError, fatal: bool) -> Self {
        let kind = error.kind();
        let message = error.to_string();
        if fatal {
            PublicationEvent::Error { kind, message }
        } else {
            PublicationEvent::RecomputeFailed { kind, message }
        }
    }

    /// Document identity carried by this event, if any.
    pub fn document_id(&self) -> Option<&DocumentId> {
        match self {
            PublicationEvent::Added { id, .. }
            | PublicationEvent::Changed { id, .. }
            | PublicationEvent::Removed { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Receiver went away.
    Disconnected,
    /// Terminated by an error.
    Error(String),
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Handle to receive a subscription's events.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<PublicationEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<PublicationEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<PublicationEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<PublicationEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Take every event currently buffered.
    pub fn drain(&self) -> Vec<PublicationEvent> {
        self.receiver.try_iter().collect()
    }
}
