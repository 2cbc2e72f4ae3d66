//! Snapshot differencing.
//!
//! A recompute produces a complete [`Snapshot`]. The [`SnapshotDiffer`]
//! compares it against the identities published by the previous recompute
//! and yields the minimal added/changed/removed sequence:
//! - records are visited in snapshot order; unseen identities are `added`,
//!   known ones are `changed` (full replacement)
//! - every identity not stamped with the current iteration is `removed`
//!   afterwards
//!
//! A snapshot with a record lacking its identity is rejected before any
//! state is touched.

mod differ;
mod identity_map;
mod snapshot;

pub use differ::{DiffOp, DiffResult, ExtrasOp, SnapshotDiffer};
pub use identity_map::IdentityMap;
pub use snapshot::Snapshot;
