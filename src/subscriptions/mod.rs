//! Subscription sinks and the subscription manager.
//!
//! A reactive aggregation publishes into a [`SubscriptionSink`]:
//! - `added` / `changed` / `removed` per document, by target collection
//! - `ready` after the initial snapshot
//! - `recompute_failed` for non-fatal failures, `error` for fatal ones
//!
//! [`ChannelSink`] is the in-process sink: events land in a bounded channel
//! and slow subscribers are dropped.
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionManager::new();
//! let handle = manager.subscribe(source, ReactiveAggregateConfig::new(pipeline))?;
//!
//! loop {
//!     match handle.recv() {
//!         Ok(PublicationEvent::Added { id, fields, .. }) => println!("+ {id}: {fields}"),
//!         Ok(PublicationEvent::Ready) => println!("initial snapshot published"),
//!         Ok(PublicationEvent::Dropped { reason }) => break,
//!         Ok(_) => {}
//!         Err(_) => break,
//!     }
//! }
//! ```

mod manager;
mod sink;
mod types;

pub use manager::SubscriptionManager;
pub use sink::{ChannelSink, StopHook, SubscriptionSink};
pub use types::{DropReason, PublicationEvent, SinkConfig, SubscriptionHandle};
