//! The snapshot differ.

use super::identity_map::IdentityMap;
use super::snapshot::Snapshot;
use crate::error::{AggregateError, Result};
use crate::types::{Document, DocumentId, Iteration};
use serde_json::Value;

/// One publication operation for a result document.
#[derive(Clone, Debug, PartialEq)]
pub enum DiffOp {
    Added { id: DocumentId, fields: Value },
    Changed { id: DocumentId, fields: Value },
    Removed { id: DocumentId },
}

impl DiffOp {
    pub fn id(&self) -> &DocumentId {
        match self {
            DiffOp::Added { id, .. } | DiffOp::Changed { id, .. } | DiffOp::Removed { id } => id,
        }
    }
}

/// Publication of the extras singleton.
#[derive(Clone, Debug, PartialEq)]
pub enum ExtrasOp {
    Added(Document),
    Changed(Document),
}

impl ExtrasOp {
    pub fn fields(&self) -> &Document {
        match self {
            ExtrasOp::Added(fields) | ExtrasOp::Changed(fields) => fields,
        }
    }
}

/// Everything one recompute publishes, in publication order: extras first,
/// then added/changed in snapshot order, then removals.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DiffResult {
    pub iteration: Iteration,
    pub extras: Option<ExtrasOp>,
    pub ops: Vec<DiffOp>,
}

impl DiffResult {
    pub fn added(&self) -> usize {
        self.count(|op| matches!(op, DiffOp::Added { .. }))
    }

    pub fn changed(&self) -> usize {
        self.count(|op| matches!(op, DiffOp::Changed { .. }))
    }

    pub fn removed(&self) -> usize {
        self.count(|op| matches!(op, DiffOp::Removed { .. }))
    }

    fn count(&self, predicate: impl Fn(&DiffOp) -> bool) -> usize {
        self.ops.iter().filter(|op| predicate(op)).count()
    }
}

/// Per-subscription differ state: identity map, iteration counter and
/// whether the extras singleton has been published.
#[derive(Debug)]
pub struct SnapshotDiffer {
    id_field: String,
    identities: IdentityMap,
    iteration: Iteration,
    extras_published: bool,
}

impl SnapshotDiffer {
    pub fn new(id_field: impl Into<String>) -> Self {
        Self {
            id_field: id_field.into(),
            identities: IdentityMap::new(),
            iteration: Iteration::default(),
            extras_published: false,
        }
    }

    /// Iteration of the last accepted snapshot (0 before the first).
    pub fn iteration(&self) -> Iteration {
        self.iteration
    }

    pub fn identities(&self) -> &IdentityMap {
        &self.identities
    }

    /// Diff `snapshot` against the published state and adopt it.
    ///
    /// Fails with [`AggregateError::MissingIdentity`] if any document lacks
    /// an identity, in which case nothing is modified.
    pub fn diff(&mut self, snapshot: Snapshot) -> Result<DiffResult> {
        let (documents, extras) = snapshot.into_parts();

        let mut keyed = Vec::with_capacity(documents.len());
        for (position, document) in documents.into_iter().enumerate() {
            let id = DocumentId::of_record(&document, &self.id_field).ok_or_else(|| {
                AggregateError::MissingIdentity {
                    field: self.id_field.clone(),
                    position,
                }
            })?;
            keyed.push((id, document));
        }

        let iteration = self.iteration.next();
        self.iteration = iteration;

        let extras = extras.map(|fields| {
            if self.extras_published {
                ExtrasOp::Changed(fields)
            } else {
                self.extras_published = true;
                ExtrasOp::Added(fields)
            }
        });

        let mut ops = Vec::with_capacity(keyed.len());
        for (id, fields) in keyed {
            match self.identities.stamp(id.clone(), iteration) {
                None => ops.push(DiffOp::Added { id, fields }),
                Some(_) => ops.push(DiffOp::Changed { id, fields }),
            }
        }

        for id in self.identities.remove_stale(iteration) {
            ops.push(DiffOp::Removed { id });
        }

        Ok(DiffResult {
            iteration,
            extras,
            ops,
        })
    }
}
