//! Contracts for the external collaborators of a reactive aggregation.
//!
//! - [`Aggregator`]: runs a pipeline and returns an ordered record set
//! - [`Watchable`]: anything that can report changes to a [`ChangeNotifier`]
//! - [`DataSource`]: the primary source, which can both aggregate and
//!   produce the automatic observer
//!
//! The engine behind these traits is opaque: pipelines and options are
//! forwarded unchanged.

use crate::observers::ChangeNotifier;
use crate::types::{BoxError, Document};
use serde_json::Value;
use std::sync::Arc;

/// Executes an aggregation pipeline.
pub trait Aggregator: Send + Sync {
    /// Run `pipeline` with `options`, returning records in result order.
    fn aggregate(&self, pipeline: &[Value], options: &Document) -> Result<Vec<Value>, BoxError>;
}

impl<F> Aggregator for F
where
    F: Fn(&[Value], &Document) -> Result<Vec<Value>, BoxError> + Send + Sync,
{
    fn aggregate(&self, pipeline: &[Value], options: &Document) -> Result<Vec<Value>, BoxError> {
        self(pipeline, options)
    }
}

/// Handle returned when an observer is attached. Stopping it detaches the
/// observer; no notifications may be delivered after `stop` returns.
pub trait ObserveHandle: Send {
    fn stop(&mut self);
}

/// A change source that can be watched.
pub trait Watchable: Send + Sync {
    /// Start reporting changes to `notifier`.
    fn observe_changes(&self, notifier: ChangeNotifier) -> Result<Box<dyn ObserveHandle>, BoxError>;
}

/// The primary data source of a subscription.
pub trait DataSource: Aggregator {
    /// Name used as the default client collection.
    fn name(&self) -> &str;

    /// Build a watchable cursor over this source.
    fn find(&self, selector: &Document, options: &Document) -> Result<Arc<dyn Watchable>, BoxError>;
}
