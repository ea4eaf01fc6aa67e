//! Core traits for storage and snapshot abstraction
//!
//! This module defines the Storage and SnapshotView traits that sit between
//! the provider and the relational geometry store. The provider never sees
//! a concrete store: everything it needs (relation metadata, snapshots,
//! prepared rows, atomic commits, DDL) goes through these traits.
//!
//! ## Write path
//!
//! ```text
//! prepare_insert / prepare_update   defaults, type coercion, NOT NULL
//!        ↓ (buffered in a transaction)
//! commit(batch, validator)          commit lock → validator sees latest
//!                                   state → unique checks → apply at a
//!                                   new version, all-or-nothing
//! ```

use crate::error::Result;
use crate::predicate::Predicate;
use crate::relation::{Datum, RelationInfo, RelationRef, StoredRow, TableDef};
use crate::types::{DatabaseId, RowId};

/// One buffered row change
#[derive(Debug, Clone, PartialEq)]
pub enum RowWrite {
    /// Insert a prepared row (values in the relation's column order)
    Insert {
        /// Target relation
        relation: RelationRef,
        /// Prepared row
        row: StoredRow,
    },
    /// Replace an existing row with prepared values
    Update {
        /// Target relation
        relation: RelationRef,
        /// New row contents, same row id
        row: StoredRow,
    },
    /// Delete a row
    Delete {
        /// Target relation
        relation: RelationRef,
        /// Row to delete
        row_id: RowId,
    },
}

impl RowWrite {
    /// Relation the write targets
    pub fn relation(&self) -> &RelationRef {
        match self {
            RowWrite::Insert { relation, .. }
            | RowWrite::Update { relation, .. }
            | RowWrite::Delete { relation, .. } => relation,
        }
    }

    /// Row the write targets
    pub fn row_id(&self) -> RowId {
        match self {
            RowWrite::Insert { row, .. } | RowWrite::Update { row, .. } => row.row_id,
            RowWrite::Delete { row_id, .. } => *row_id,
        }
    }
}

/// Ordered list of row changes applied atomically by `Storage::commit`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<RowWrite>,
}

impl WriteBatch {
    /// Empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a change
    pub fn push(&mut self, write: RowWrite) {
        self.writes.push(write);
    }

    /// Number of changes
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Check if the batch is empty
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Iterate over changes in order
    pub fn iter(&self) -> std::slice::Iter<'_, RowWrite> {
        self.writes.iter()
    }
}

impl FromIterator<RowWrite> for WriteBatch {
    fn from_iter<I: IntoIterator<Item = RowWrite>>(iter: I) -> Self {
        WriteBatch {
            writes: iter.into_iter().collect(),
        }
    }
}

/// Storage abstraction for the relational geometry store
///
/// Thread safety: all methods must be safe to call concurrently from
/// multiple threads (requires Send + Sync). Readers never wait on writers:
/// a snapshot, once opened, answers from its own version.
pub trait Storage: Send + Sync {
    /// Identity of this store; feature ids are scoped to it
    fn database_id(&self) -> DatabaseId;

    /// Version of the latest committed batch
    fn current_version(&self) -> u64;

    /// Check whether a relation exists
    fn relation_exists(&self, relation: &RelationRef) -> bool;

    /// Describe a relation's columns, keys and kind
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the relation does not exist.
    fn describe(&self, relation: &RelationRef) -> Result<RelationInfo>;

    /// Open a snapshot at the current version
    fn snapshot(&self) -> Box<dyn SnapshotView>;

    /// Build a complete row for insertion
    ///
    /// Columns missing from `values` receive their default (sequences are
    /// consumed immediately and never rolled back). Values are coerced to
    /// the column type and NOT NULL is checked. Uniqueness is only checked
    /// at commit.
    ///
    /// # Errors
    ///
    /// `ConstraintViolation` for type or not-null failures, `NotFound` for
    /// unknown relations or columns, `InvalidOperation` for read-only
    /// relations.
    fn prepare_insert(&self, relation: &RelationRef, values: &[(String, Datum)]) -> Result<StoredRow>;

    /// Apply `changes` on top of `current`, coercing and checking them
    ///
    /// # Errors
    ///
    /// Same as `prepare_insert`.
    fn prepare_update(
        &self,
        relation: &RelationRef,
        current: &StoredRow,
        changes: &[(String, Datum)],
    ) -> Result<StoredRow>;

    /// Apply a batch atomically and return the new version
    ///
    /// Under the store's commit lock, `validate` is called with a view of the
    /// latest committed state; if it fails, nothing is applied. Unique and
    /// primary-key constraints are then checked against the latest state
    /// plus the batch itself. Either every write becomes visible at one new
    /// version or none does.
    ///
    /// # Errors
    ///
    /// Whatever `validate` returns, `ConstraintViolation` for unique
    /// failures, `NotFound` for rows that vanished.
    fn commit(
        &self,
        batch: &WriteBatch,
        validate: &dyn Fn(&dyn SnapshotView) -> Result<()>,
    ) -> Result<u64>;

    /// Evaluate a column's default clause (consumes sequence values)
    fn evaluate_default(&self, relation: &RelationRef, column: &str) -> Result<Datum>;

    /// Count rows and distinct value tuples over `columns` at the current
    /// version; returns `(rows, distinct)`
    fn count_distinct(&self, relation: &RelationRef, columns: &[String]) -> Result<(usize, usize)>;

    /// Rename columns atomically; either every rename applies or none
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown columns, `InvalidOperation` for name
    /// collisions or read-only relations.
    fn rename_columns(&self, relation: &RelationRef, renames: &[(String, String)]) -> Result<()>;

    /// Create a table (and its schema when missing)
    fn create_table(&self, def: &TableDef) -> Result<()>;
}

/// Snapshot view: a read-only, versioned view of the store
///
/// Every read cursor owns one. Scans materialize rows visible at
/// `version()`; later commits are never observed.
pub trait SnapshotView: Send + Sync {
    /// Version this snapshot reads at
    fn version(&self) -> u64;

    /// Rows of a relation matching `predicate`, in row id order
    fn scan(&self, relation: &RelationRef, predicate: Option<&Predicate>) -> Result<Vec<StoredRow>>;

    /// Version at which a row was last written, `None` when the row does
    /// not exist (or is deleted) at this snapshot
    fn row_version(&self, relation: &RelationRef, row_id: RowId) -> Result<Option<u64>>;

    /// Keep the rows matching `predicate`, evaluated with the relation's
    /// column types; used for rows buffered in a transaction
    fn filter(
        &self,
        relation: &RelationRef,
        predicate: &Predicate,
        rows: Vec<StoredRow>,
    ) -> Result<Vec<StoredRow>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptySnapshot(u64);

    impl SnapshotView for EmptySnapshot {
        fn version(&self) -> u64 {
            self.0
        }

        fn scan(&self, _: &RelationRef, _: Option<&Predicate>) -> Result<Vec<StoredRow>> {
            Ok(Vec::new())
        }

        fn row_version(&self, _: &RelationRef, _: RowId) -> Result<Option<u64>> {
            Ok(None)
        }

        fn filter(&self, _: &RelationRef, _: &Predicate, rows: Vec<StoredRow>) -> Result<Vec<StoredRow>> {
            Ok(rows)
        }
    }

    #[test]
    fn snapshot_view_is_object_safe_and_send_sync() {
        fn accepts_snapshot(_: &dyn SnapshotView) {}
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        accepts_snapshot(&EmptySnapshot(3));
        assert_send::<Box<dyn SnapshotView>>();
        assert_sync::<Box<dyn SnapshotView>>();
    }

    #[test]
    fn storage_is_object_safe() {
        fn accepts_storage(_: Option<&dyn Storage>) {}
        accepts_storage(None);
    }

    #[test]
    fn write_batch_collects_in_order() {
        let rel = RelationRef::table("s", "t");
        let batch: WriteBatch = vec![
            RowWrite::Delete {
                relation: rel.clone(),
                row_id: RowId(2),
            },
            RowWrite::Insert {
                relation: rel.clone(),
                row: StoredRow {
                    row_id: RowId(7),
                    values: vec![Some("1".into())],
                },
            },
        ]
        .into_iter()
        .collect();
        assert_eq!(batch.len(), 2);
        let ids: Vec<_> = batch.iter().map(|w| w.row_id()).collect();
        assert_eq!(ids, vec![RowId(2), RowId(7)]);
        assert_eq!(batch.iter().next().map(|w| w.relation()), Some(&rel));
    }
}
