//! # Reactive Aggregate
//!
//! Keeps a subscriber's view of an aggregation result up to date with a
//! minimal added/changed/removed protocol, recomputing only when watched
//! data changes and coalescing bursts of changes.
//!
//! ## Core Concepts
//!
//! - **Observers**: change sources whose notifications trigger recomputes
//! - **Debounce**: a count threshold and a timer bound the recompute rate
//! - **Snapshot diff**: each result set is diffed against the identities
//!   published last time
//! - **Extras**: non-document fields of a single-record result, published
//!   as a singleton keyed by the subscription
//!
//! ## Example
//!
//! ```ignore
//! use reactive_aggregate::{MemoryCollection, ReactiveAggregateConfig, SubscriptionManager};
//!
//! let orders = Arc::new(MemoryCollection::new("orders"));
//! let manager = SubscriptionManager::new();
//!
//! let handle = manager.subscribe(orders.clone(), ReactiveAggregateConfig {
//!     pipeline: vec![json!({"$match": {"status": "open"}})],
//!     debounce_count: 100,
//!     debounce_delay: Duration::from_millis(250),
//!     ..Default::default()
//! })?;
//!
//! orders.upsert(json!({"_id": 1, "status": "open"}))?;
//! ```

pub mod config;
pub mod debounce;
pub mod diff;
pub mod error;
pub mod memory;
pub mod observers;
pub mod reactive;
pub mod source;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use config::{
    DebounceConfig, ReactiveAggregateConfig, DEFAULT_EXTRAS_COLLECTION, DEFAULT_ID_FIELD,
};
pub use debounce::{DebounceState, SignalOutcome};
pub use diff::{DiffOp, DiffResult, ExtrasOp, IdentityMap, Snapshot, SnapshotDiffer};
pub use error::{AggregateError, ErrorKind, Result};
pub use memory::{MemoryCollection, MemoryCursor, MemoryQuery};
pub use observers::{ChangeNotifier, DetachedSignals, ObserverSet};
pub use reactive::ReactiveAggregate;
pub use source::{Aggregator, DataSource, ObserveHandle, Watchable};
pub use subscriptions::{
    ChannelSink, DropReason, PublicationEvent, SinkConfig, StopHook, SubscriptionHandle,
    SubscriptionManager, SubscriptionSink,
};
pub use types::*;
