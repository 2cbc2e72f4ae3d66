//! In-process data source.
//!
//! `MemoryCollection` keeps ordered JSON documents and reports changes to
//! every attached observer. A new observer is told about the existing
//! documents straight away, the way a live cursor announces its initial
//! result set. Aggregation is delegated to a host-supplied query closure;
//! the default query returns the documents unchanged.

use crate::error::{AggregateError, Result};
use crate::observers::ChangeNotifier;
use crate::source::{Aggregator, DataSource, ObserveHandle, Watchable};
use crate::types::{BoxError, ChangeKind, Document, DocumentId};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Aggregation over a collection: `(documents, pipeline, options)`.
pub type MemoryQuery =
    dyn Fn(&[Value], &[Value], &Document) -> std::result::Result<Vec<Value>, BoxError> + Send + Sync;

struct Registration {
    id: u64,
    selector: Document,
    notifier: ChangeNotifier,
}

struct Inner {
    name: String,
    id_field: String,
    documents: RwLock<Vec<Value>>,
    registrations: Mutex<Vec<Registration>>,
    next_registration: AtomicU64,
    query: Box<MemoryQuery>,
    failure: Mutex<Option<String>>,
    aggregate_calls: AtomicU64,
}

/// An observable in-memory collection.
#[derive(Clone)]
pub struct MemoryCollection {
    inner: Arc<Inner>,
}

impl MemoryCollection {
    /// Collection whose aggregation returns its documents in order.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_query(name, |documents: &[Value], _: &[Value], _: &Document| {
            Ok(documents.to_vec())
        })
    }

    /// Collection aggregated by `query`.
    pub fn with_query<F>(name: impl Into<String>, query: F) -> Self
    where
        F: Fn(&[Value], &[Value], &Document) -> std::result::Result<Vec<Value>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                id_field: crate::config::DEFAULT_ID_FIELD.to_string(),
                documents: RwLock::new(Vec::new()),
                registrations: Mutex::new(Vec::new()),
                next_registration: AtomicU64::new(1),
                query: Box::new(query),
                failure: Mutex::new(None),
                aggregate_calls: AtomicU64::new(0),
            }),
        }
    }

    /// Insert `document`, or replace the one with the same identity.
    pub fn upsert(&self, document: Value) -> Result<ChangeKind> {
        let id = DocumentId::of_record(&document, &self.inner.id_field).ok_or_else(|| {
            AggregateError::MissingIdentity {
                field: self.inner.id_field.clone(),
                position: 0,
            }
        })?;

        let previous = {
            let mut documents = self.inner.documents.write();
            match self.position(&documents, &id) {
                Some(index) => Some(std::mem::replace(&mut documents[index], document.clone())),
                None => {
                    documents.push(document.clone());
                    None
                }
            }
        };

        let kind = if previous.is_some() {
            ChangeKind::Changed
        } else {
            ChangeKind::Added
        };
        self.notify(&id, previous.as_ref(), Some(&document));
        Ok(kind)
    }

    /// Apply `update` to the document with identity `id`. Returns false if
    /// there is no such document.
    pub fn update<F: FnOnce(&mut Value)>(&self, id: &DocumentId, update: F) -> bool {
        let change = {
            let mut documents = self.inner.documents.write();
            match self.position(&documents, id) {
                Some(index) => {
                    let previous = documents[index].clone();
                    update(&mut documents[index]);
                    Some((previous, documents[index].clone()))
                }
                None => None,
            }
        };

        match change {
            Some((previous, current)) => {
                self.notify(id, Some(&previous), Some(&current));
                true
            }
            None => false,
        }
    }

    /// Remove the document with identity `id`.
    pub fn remove(&self, id: &DocumentId) -> bool {
        let removed = {
            let mut documents = self.inner.documents.write();
            self.position(&documents, id)
                .map(|index| documents.remove(index))
        };

        match removed {
            Some(previous) => {
                self.notify(id, Some(&previous), None);
                true
            }
            None => false,
        }
    }

    /// Make every aggregation fail with `message` until cleared.
    pub fn fail_aggregations(&self, message: impl Into<String>) {
        *self.inner.failure.lock() = Some(message.into());
    }

    pub fn clear_failure(&self) {
        *self.inner.failure.lock() = None;
    }

    /// Report an error to every observer.
    pub fn fail_observers(&self, message: &str) {
        for registration in self.inner.registrations.lock().iter() {
            registration.notifier.error(message);
        }
    }

    pub fn aggregate_calls(&self) -> u64 {
        self.inner.aggregate_calls.load(Ordering::SeqCst)
    }

    pub fn observer_count(&self) -> usize {
        self.inner.registrations.lock().len()
    }

    pub fn len(&self) -> usize {
        self.inner.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.documents.read().is_empty()
    }

    pub fn documents(&self) -> Vec<Value> {
        self.inner.documents.read().clone()
    }

    fn position(&self, documents: &[Value], id: &DocumentId) -> Option<usize> {
        documents
            .iter()
            .position(|doc| DocumentId::of_record(doc, &self.inner.id_field).as_ref() == Some(id))
    }

    fn notify(&self, id: &DocumentId, previous: Option<&Value>, current: Option<&Value>) {
        for registration in self.inner.registrations.lock().iter() {
            let before = previous.map_or(false, |doc| matches_selector(doc, &registration.selector));
            let after = current.map_or(false, |doc| matches_selector(doc, &registration.selector));
            match (before, after) {
                (true, true) => registration.notifier.changed(id),
                (false, true) => registration.notifier.added(id),
                (true, false) => registration.notifier.removed(id),
                (false, false) => {}
            }
        }
    }

    fn observe(&self, selector: Document, notifier: ChangeNotifier) -> Box<dyn ObserveHandle> {
        let id = self.inner.next_registration.fetch_add(1, Ordering::SeqCst);

        let mut registrations = self.inner.registrations.lock();
        for document in self.inner.documents.read().iter() {
            if matches_selector(document, &selector) {
                if let Some(doc_id) = DocumentId::of_record(document, &self.inner.id_field) {
                    notifier.added(&doc_id);
                }
            }
        }
        registrations.push(Registration {
            id,
            selector,
            notifier,
        });

        Box::new(MemoryObserveHandle {
            inner: Arc::clone(&self.inner),
            id,
        })
    }
}

impl Aggregator for MemoryCollection {
    fn aggregate(
        &self,
        pipeline: &[Value],
        options: &Document,
    ) -> std::result::Result<Vec<Value>, BoxError> {
        self.inner.aggregate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.inner.failure.lock().clone() {
            return Err(message.into());
        }
        let documents = self.documents();
        (self.inner.query)(&documents, pipeline, options)
    }
}

impl DataSource for MemoryCollection {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn find(
        &self,
        selector: &Document,
        _options: &Document,
    ) -> std::result::Result<Arc<dyn Watchable>, BoxError> {
        Ok(Arc::new(MemoryCursor {
            collection: self.clone(),
            selector: selector.clone(),
        }))
    }
}

impl Watchable for MemoryCollection {
    fn observe_changes(
        &self,
        notifier: ChangeNotifier,
    ) -> std::result::Result<Box<dyn ObserveHandle>, BoxError> {
        Ok(self.observe(Document::new(), notifier))
    }
}

/// Documents of a collection matching a top-level equality selector.
#[derive(Clone)]
pub struct MemoryCursor {
    collection: MemoryCollection,
    selector: Document,
}

impl MemoryCursor {
    pub fn new(collection: &MemoryCollection, selector: Document) -> Self {
        Self {
            collection: collection.clone(),
            selector,
        }
    }
}

impl Watchable for MemoryCursor {
    fn observe_changes(
        &self,
        notifier: ChangeNotifier,
    ) -> std::result::Result<Box<dyn ObserveHandle>, BoxError> {
        Ok(self.collection.observe(self.selector.clone(), notifier))
    }
}

struct MemoryObserveHandle {
    inner: Arc<Inner>,
    id: u64,
}

impl ObserveHandle for MemoryObserveHandle {
    fn stop(&mut self) {
        self.inner
            .registrations
            .lock()
            .retain(|registration| registration.id != self.id);
    }
}

fn matches_selector(document: &Value, selector: &Document) -> bool {
    selector
        .iter()
        .all(|(field, expected)| document.get(field) == Some(expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn selector(value: Value) -> Document {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_upsert_update_remove() {
        let tasks = MemoryCollection::new("tasks");
        assert_eq!(
            tasks.upsert(json!({"_id": 1, "done": false})).unwrap(),
            ChangeKind::Added
        );
        assert_eq!(
            tasks.upsert(json!({"_id": 1, "done": true})).unwrap(),
            ChangeKind::Changed
        );
        assert_eq!(tasks.len(), 1);

        assert!(tasks.update(&DocumentId::Int(1), |doc| doc["done"] = json!(false)));
        assert_eq!(tasks.documents()[0]["done"], json!(false));
        assert!(!tasks.update(&DocumentId::Int(9), |_| {}));

        assert!(tasks.remove(&DocumentId::Int(1)));
        assert!(!tasks.remove(&DocumentId::Int(1)));
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_upsert_requires_identity() {
        let tasks = MemoryCollection::new("tasks");
        assert!(matches!(
            tasks.upsert(json!({"title": "no id"})),
            Err(AggregateError::MissingIdentity { .. })
        ));
    }

    #[test]
    fn test_observer_sees_initial_and_live_changes() {
        let tasks = MemoryCollection::new("tasks");
        tasks.upsert(json!({"_id": 1})).unwrap();

        let (notifier, signals) = ChangeNotifier::detached();
        let mut handle = tasks.observe_changes(notifier).unwrap();
        assert_eq!(signals.drain(), vec![Ok(ChangeKind::Added)]);

        tasks.upsert(json!({"_id": 2})).unwrap();
        tasks.upsert(json!({"_id": 2, "v": 1})).unwrap();
        tasks.remove(&DocumentId::Int(1));
        assert_eq!(
            signals.drain(),
            vec![
                Ok(ChangeKind::Added),
                Ok(ChangeKind::Changed),
                Ok(ChangeKind::Removed)
            ]
        );

        handle.stop();
        assert_eq!(tasks.observer_count(), 0);
        tasks.upsert(json!({"_id": 3})).unwrap();
        assert!(signals.drain().is_empty());
    }

    #[test]
    fn test_cursor_selector() {
        let tasks = MemoryCollection::new("tasks");
        tasks.upsert(json!({"_id": 1, "owner": "ann"})).unwrap();
        tasks.upsert(json!({"_id": 2, "owner": "bob"})).unwrap();

        let cursor = MemoryCursor::new(&tasks, selector(json!({"owner": "ann"})));
        let (notifier, signals) = ChangeNotifier::detached();
        let _handle = cursor.observe_changes(notifier).unwrap();
        assert_eq!(signals.drain().len(), 1);

        // Not matching before or after: silent.
        tasks.upsert(json!({"_id": 2, "owner": "bob", "v": 2})).unwrap();
        assert!(signals.drain().is_empty());

        // Leaves the selector: removed. Enters it: added.
        tasks.upsert(json!({"_id": 1, "owner": "bob"})).unwrap();
        tasks.upsert(json!({"_id": 2, "owner": "ann"})).unwrap();
        assert_eq!(
            signals.drain(),
            vec![Ok(ChangeKind::Removed), Ok(ChangeKind::Added)]
        );
    }

    #[test]
    fn test_aggregate_uses_query_and_failures() {
        let tasks = MemoryCollection::with_query("tasks", |docs: &[Value], _: &[Value], _: &Document| {
            Ok(vec![json!({"_id": "count", "n": docs.len()})])
        });
        tasks.upsert(json!({"_id": 1})).unwrap();

        let result = tasks.aggregate(&[], &Document::new()).unwrap();
        assert_eq!(result, vec![json!({"_id": "count", "n": 1})]);

        tasks.fail_aggregations("engine offline");
        let err = tasks.aggregate(&[], &Document::new()).unwrap_err();
        assert_eq!(err.to_string(), "engine offline");

        tasks.clear_failure();
        assert!(tasks.aggregate(&[], &Document::new()).is_ok());
        assert_eq!(tasks.aggregate_calls(), 3);
    }

    #[test]
    fn test_fail_observers() {
        let tasks = MemoryCollection::new("tasks");
        let (notifier, signals) = ChangeNotifier::detached();
        let _handle = tasks.observe_changes(notifier).unwrap();
        tasks.fail_observers("oplog lost");
        assert_eq!(signals.drain(), vec![Err("oplog lost".to_string())]);
    }
}
