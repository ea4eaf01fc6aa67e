//! DatabaseSnapshot: version-bounded view of the store
//!
//! A snapshot records the commit version at creation and answers every
//! read from the row version chains at that version. It holds no lock
//! between calls: each scan takes the catalog and row read locks briefly,
//! materializes the visible rows and releases them.
//!
//! # Design Notes
//!
//! - **Lazy**: nothing is copied at creation, unlike a cloned snapshot
//! - **Immutable**: commits after creation are never observed
//! - **Thread-safe**: shares the store state through an `Arc`
//! - **Catalog is live**: column renames apply to open snapshots too

use std::sync::Arc;

use geostrata_core::predicate::Predicate;
use geostrata_core::{RelationRef, Result, RowId, SnapshotView, StoredRow};

use crate::database::Shared;

/// A snapshot view reading row versions at a fixed commit version
#[derive(Debug, Clone)]
pub struct DatabaseSnapshot {
    version: u64,
    shared: Arc<Shared>,
}

impl DatabaseSnapshot {
    pub(crate) fn new(version: u64, shared: Arc<Shared>) -> Self {
        Self { version, shared }
    }
}

impl SnapshotView for DatabaseSnapshot {
    fn version(&self) -> u64 {
        self.version
    }

    fn scan(&self, relation: &RelationRef, predicate: Option<&Predicate>) -> Result<Vec<StoredRow>> {
        self.shared.scan_at(self.version, relation, predicate)
    }

    fn row_version(&self, relation: &RelationRef, row_id: RowId) -> Result<Option<u64>> {
        self.shared.row_version_at(self.version, relation, row_id)
    }

    fn filter(
        &self,
        relation: &RelationRef,
        predicate: &Predicate,
        rows: Vec<StoredRow>,
    ) -> Result<Vec<StoredRow>> {
        self.shared.filter_staged(relation, predicate, rows)
    }
}
