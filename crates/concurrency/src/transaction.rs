//! Transaction context for OCC
//!
//! TransactionContext buffers row inserts, updates and deletes against a
//! snapshot of the store. Nothing reaches the store until commit, where the
//! buffered changes become one `WriteBatch` applied atomically.
//!
//! Rows are prepared by the store before they are buffered (defaults,
//! sequence values, type coercion, NOT NULL), so a bad value fails at the
//! call that introduced it. Uniqueness is only known at commit.

use crate::validation::{validate_read_set, ReadSet, ValidationResult};
use geostrata_core::predicate::Predicate;
use geostrata_core::{
    Error, RelationRef, Result, RowId, RowWrite, SnapshotView, Storage, StoredRow, WriteBatch,
};
use rustc_hash::FxHashSet;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

/// Error type for commit failures
///
/// A commit either applies every buffered change or none of them.
#[derive(Debug)]
pub enum CommitError {
    /// Another transaction changed or deleted a row this one changed
    ValidationFailed(ValidationResult),

    /// Transaction was not in correct state for commit
    ///
    /// Commit requires Active state to transition to Validating
    InvalidState(String),

    /// The store rejected the batch (constraint violation, vanished rows)
    Rejected(Error),
}

impl std::fmt::Display for CommitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitError::ValidationFailed(result) => {
                write!(f, "Commit failed: {} conflict(s): {}", result.conflict_count(), result)
            }
            CommitError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            CommitError::Rejected(e) => write!(f, "Commit rejected: {}", e),
        }
    }
}

impl std::error::Error for CommitError {}

impl From<CommitError> for Error {
    fn from(e: CommitError) -> Self {
        match e {
            CommitError::ValidationFailed(result) => Error::Conflict(result.to_string()),
            CommitError::InvalidState(msg) => Error::TransactionNotActive { state: msg },
            CommitError::Rejected(e) => e,
        }
    }
}

/// Summary of pending operations that would be rolled back on abort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOperations {
    /// Rows inserted by this transaction
    pub inserts: usize,
    /// Existing rows rewritten by this transaction
    pub updates: usize,
    /// Existing rows deleted by this transaction
    pub deletes: usize,
}

impl PendingOperations {
    /// Total number of pending operations
    pub fn total(&self) -> usize {
        self.inserts + self.updates + self.deletes
    }

    /// Check if there are no pending operations
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Status of a transaction in its lifecycle
///
/// State transitions:
/// - `Active` → `Validating` (begin commit)
/// - `Validating` → `Committed` (validation passed, batch applied)
/// - `Validating` → `Aborted` (conflict or constraint failure)
/// - `Active` → `Aborted` (user abort or error)
///
/// Terminal states (no transitions allowed):
/// - `Committed`
/// - `Aborted`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Transaction is executing, can read/write
    Active,
    /// Transaction is being validated for conflicts
    Validating,
    /// Transaction committed successfully
    Committed,
    /// Transaction was aborted
    Aborted {
        /// Human-readable reason for abort
        reason: String,
    },
}

type RowKey = (RelationRef, RowId);

/// Transaction context for OCC with snapshot isolation
///
/// # Read-Your-Writes Semantics
///
/// `scan` merges the snapshot with the buffered changes:
/// 1. rows deleted in this transaction are hidden
/// 2. rows inserted or updated in this transaction replace snapshot rows
/// 3. everything else comes from the snapshot
///
/// # Conflict Tracking
///
/// Updating or deleting an existing row records the row's version from the
/// snapshot in `read_set`. At commit, a row whose version moved in between
/// aborts the transaction (first committer wins).
pub struct TransactionContext {
    /// Unique transaction ID
    pub txn_id: u64,

    /// Version at transaction start (snapshot version)
    pub start_version: u64,

    snapshot: Box<dyn SnapshotView>,

    /// Versions of existing rows this transaction changes
    pub read_set: ReadSet,

    /// Final contents of every row inserted or updated (buffered)
    write_set: BTreeMap<RowKey, StoredRow>,

    /// Subset of `write_set` that does not exist in the store yet
    insert_set: FxHashSet<RowKey>,

    /// Existing rows to delete (buffered)
    delete_set: BTreeSet<RowKey>,

    /// Current transaction status
    pub status: TransactionStatus,

    start_time: Instant,
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("txn_id", &self.txn_id)
            .field("start_version", &self.start_version)
            .field("status", &self.status)
            .field("pending", &self.pending_operations())
            .finish()
    }
}

impl TransactionContext {
    /// Create a transaction reading from `snapshot`
    pub fn with_snapshot(txn_id: u64, snapshot: Box<dyn SnapshotView>) -> Self {
        TransactionContext {
            txn_id,
            start_version: snapshot.version(),
            snapshot,
            read_set: ReadSet::default(),
            write_set: BTreeMap::new(),
            insert_set: FxHashSet::default(),
            delete_set: BTreeSet::new(),
            status: TransactionStatus::Active,
            start_time: Instant::now(),
        }
    }

    /// The snapshot this transaction reads from
    pub fn snapshot(&self) -> &dyn SnapshotView {
        self.snapshot.as_ref()
    }

    // === Reads ===

    /// Rows of `relation` matching `predicate` as this transaction sees
    /// them, in row id order
    pub fn scan(&self, relation: &RelationRef, predicate: Option<&Predicate>) -> Result<Vec<StoredRow>> {
        self.ensure_active()?;

        let mut rows: Vec<StoredRow> = self
            .snapshot
            .scan(relation, predicate)?
            .into_iter()
            .filter(|row| {
                let key = (relation.clone(), row.row_id);
                !self.delete_set.contains(&key) && !self.write_set.contains_key(&key)
            })
            .collect();

        let staged: Vec<StoredRow> = self
            .write_set
            .iter()
            .filter(|((rel, _), _)| rel == relation)
            .map(|(_, row)| row.clone())
            .collect();
        if !staged.is_empty() {
            let staged = match predicate {
                Some(p) => self.snapshot.filter(relation, p, staged)?,
                None => staged,
            };
            rows.extend(staged);
            rows.sort_by_key(|r| r.row_id);
        }
        Ok(rows)
    }

    /// One row as this transaction sees it
    pub fn get_row(&self, relation: &RelationRef, row_id: RowId) -> Result<Option<StoredRow>> {
        self.ensure_active()?;
        let key = (relation.clone(), row_id);
        if self.delete_set.contains(&key) {
            return Ok(None);
        }
        if let Some(row) = self.write_set.get(&key) {
            return Ok(Some(row.clone()));
        }
        Ok(self
            .snapshot
            .scan(relation, None)?
            .into_iter()
            .find(|r| r.row_id == row_id))
    }

    // === Writes ===

    /// Buffer a prepared row for insertion
    pub fn insert(&mut self, relation: &RelationRef, row: StoredRow) -> Result<()> {
        self.ensure_active()?;
        let key = (relation.clone(), row.row_id);
        if self.write_set.contains_key(&key) || self.delete_set.contains(&key) {
            return Err(Error::invalid_operation(format!(
                "row {} of {} is already written in transaction {}",
                row.row_id, relation, self.txn_id
            )));
        }
        self.insert_set.insert(key.clone());
        self.write_set.insert(key, row);
        Ok(())
    }

    /// Buffer new contents for an existing row
    ///
    /// # Errors
    ///
    /// `NotFound` when the row is not visible to this transaction.
    pub fn update(&mut self, relation: &RelationRef, row: StoredRow) -> Result<()> {
        self.ensure_active()?;
        let key = (relation.clone(), row.row_id);
        if self.delete_set.contains(&key) {
            return Err(Error::not_found(format!(
                "row {} of {} was deleted in this transaction",
                row.row_id, relation
            )));
        }
        if !self.insert_set.contains(&key) {
            self.record_read(relation, row.row_id)?;
        }
        self.write_set.insert(key, row);
        Ok(())
    }

    /// Buffer the deletion of a row
    ///
    /// Deleting a row inserted by this same transaction simply drops the
    /// insert.
    ///
    /// # Errors
    ///
    /// `NotFound` when the row is not visible to this transaction.
    pub fn delete(&mut self, relation: &RelationRef, row_id: RowId) -> Result<()> {
        self.ensure_active()?;
        let key = (relation.clone(), row_id);
        if self.insert_set.remove(&key) {
            self.write_set.remove(&key);
            return Ok(());
        }
        if self.delete_set.contains(&key) {
            return Err(Error::not_found(format!(
                "row {} of {} was deleted in this transaction",
                row_id, relation
            )));
        }
        self.record_read(relation, row_id)?;
        self.write_set.remove(&key);
        self.delete_set.insert(key);
        Ok(())
    }

    fn record_read(&mut self, relation: &RelationRef, row_id: RowId) -> Result<()> {
        let key = (relation.clone(), row_id);
        if self.read_set.contains_key(&key) {
            return Ok(());
        }
        match self.snapshot.row_version(relation, row_id)? {
            Some(version) => {
                self.read_set.insert(key, version);
                Ok(())
            }
            None => Err(Error::not_found(format!(
                "row {} of {} does not exist",
                row_id, relation
            ))),
        }
    }

    /// Buffered changes as one batch: deletes, then updates, then inserts
    pub fn to_batch(&self) -> WriteBatch {
        let deletes = self.delete_set.iter().map(|(relation, row_id)| RowWrite::Delete {
            relation: relation.clone(),
            row_id: *row_id,
        });
        let updates = self
            .write_set
            .iter()
            .filter(|(key, _)| !self.insert_set.contains(*key))
            .map(|((relation, _), row)| RowWrite::Update {
                relation: relation.clone(),
                row: row.clone(),
            });
        let inserts = self
            .write_set
            .iter()
            .filter(|(key, _)| self.insert_set.contains(*key))
            .map(|((relation, _), row)| RowWrite::Insert {
                relation: relation.clone(),
                row: row.clone(),
            });
        deletes.chain(updates).chain(inserts).collect()
    }

    // === State ===

    /// Check if transaction is in Active state
    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }

    /// Check if transaction is committed
    pub fn is_committed(&self) -> bool {
        self.status == TransactionStatus::Committed
    }

    /// Check if transaction is aborted
    pub fn is_aborted(&self) -> bool {
        matches!(self.status, TransactionStatus::Aborted { .. })
    }

    /// Check if transaction can be rolled back
    pub fn can_rollback(&self) -> bool {
        matches!(
            self.status,
            TransactionStatus::Active | TransactionStatus::Validating
        )
    }

    /// Check if the transaction has buffered nothing
    pub fn is_read_only(&self) -> bool {
        self.write_set.is_empty() && self.delete_set.is_empty()
    }

    /// Get the elapsed time since transaction started
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Check if transaction can accept operations
    ///
    /// # Errors
    /// Returns `TransactionNotActive` if transaction is not in `Active` state.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::TransactionNotActive {
                state: format!("{:?}", self.status),
            })
        }
    }

    /// Transition to Validating state
    ///
    /// # State Transition
    /// `Active` → `Validating`
    pub fn mark_validating(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.status = TransactionStatus::Validating;
        Ok(())
    }

    /// Transition to Committed state
    ///
    /// # State Transition
    /// `Validating` → `Committed`
    pub fn mark_committed(&mut self) -> Result<()> {
        match &self.status {
            TransactionStatus::Validating => {
                self.status = TransactionStatus::Committed;
                Ok(())
            }
            _ => Err(Error::invalid_operation(format!(
                "Cannot commit transaction {} from state {:?}",
                self.txn_id, self.status
            ))),
        }
    }

    /// Abort the transaction and discard every buffered change
    ///
    /// # State Transitions
    /// - `Active` → `Aborted`
    /// - `Validating` → `Aborted`
    pub fn mark_aborted(&mut self, reason: String) -> Result<()> {
        match &self.status {
            TransactionStatus::Committed => Err(Error::invalid_operation(format!(
                "Cannot abort committed transaction {}",
                self.txn_id
            ))),
            TransactionStatus::Aborted { .. } => Err(Error::invalid_operation(format!(
                "Transaction {} already aborted",
                self.txn_id
            ))),
            _ => {
                self.status = TransactionStatus::Aborted { reason };
                self.write_set.clear();
                self.insert_set.clear();
                self.delete_set.clear();
                Ok(())
            }
        }
    }

    /// Get summary of pending operations
    pub fn pending_operations(&self) -> PendingOperations {
        PendingOperations {
            inserts: self.insert_set.len(),
            updates: self.write_set.len() - self.insert_set.len(),
            deletes: self.delete_set.len(),
        }
    }

    // === Commit Operation ===

    /// Commit the transaction
    ///
    /// 1. Transition to Validating state
    /// 2. Hand the batch to the store; under its commit lock the read set
    ///    is validated against the latest state
    /// 3. On success transition to Committed and return the new version;
    ///    otherwise transition to Aborted
    ///
    /// A read-only transaction commits without touching the store and
    /// returns its snapshot version.
    pub fn commit(&mut self, store: &dyn Storage) -> std::result::Result<u64, CommitError> {
        if !self.is_active() {
            return Err(CommitError::InvalidState(format!(
                "Cannot commit transaction {} from {:?} state - must be Active",
                self.txn_id, self.status
            )));
        }
        self.status = TransactionStatus::Validating;

        if self.is_read_only() {
            self.status = TransactionStatus::Committed;
            return Ok(self.start_version);
        }

        let batch = self.to_batch();
        let failed: RefCell<Option<ValidationResult>> = RefCell::new(None);
        let read_set = &self.read_set;
        let outcome = store.commit(&batch, &|latest| {
            let result = validate_read_set(read_set, latest)?;
            if result.is_valid() {
                Ok(())
            } else {
                let message = result.to_string();
                *failed.borrow_mut() = Some(result);
                Err(Error::Conflict(message))
            }
        });

        match outcome {
            Ok(version) => {
                self.status = TransactionStatus::Committed;
                Ok(version)
            }
            Err(e) => {
                let error = match failed.into_inner() {
                    Some(result) => CommitError::ValidationFailed(result),
                    None => CommitError::Rejected(e),
                };
                self.status = TransactionStatus::Aborted {
                    reason: error.to_string(),
                };
                self.write_set.clear();
                self.insert_set.clear();
                self.delete_set.clear();
                Err(error)
            }
        }
    }
}
