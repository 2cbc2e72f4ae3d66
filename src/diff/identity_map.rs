//! Identity map: published identities and the iteration that last saw them.

use crate::types::{DocumentId, Iteration};
use std::collections::HashMap;

/// Identities included in the most recently published snapshot.
#[derive(Clone, Debug, Default)]
pub struct IdentityMap {
    entries: HashMap<DocumentId, Iteration>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp `id` with `iteration`. Returns the previous stamp.
    pub fn stamp(&mut self, id: DocumentId, iteration: Iteration) -> Option<Iteration> {
        self.entries.insert(id, iteration)
    }

    /// Remove and return every identity not stamped with `current`.
    pub fn remove_stale(&mut self, current: Iteration) -> Vec<DocumentId> {
        let mut stale = Vec::new();
        self.entries.retain(|id, stamp| {
            if *stamp == current {
                true
            } else {
                stale.push(id.clone());
                false
            }
        });
        stale
    }

    pub fn get(&self, id: &DocumentId) -> Option<Iteration> {
        self.entries.get(id).copied()
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &DocumentId> {
        self.entries.keys()
    }
}
