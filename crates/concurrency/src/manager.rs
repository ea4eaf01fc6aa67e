//! Transaction manager for coordinating commit operations
//!
//! The manager hands out transaction ids, opens each transaction on a fresh
//! snapshot and drives the commit protocol:
//!
//! ```text
//! 1. txn.commit(store)        Active → Validating
//! 2. store.commit(batch, ..)  commit lock, read set validated against the
//!                             latest state, unique checks, apply at v+1
//! 3. Committed(v) | Aborted   all-or-nothing
//! ```
//!
//! It also tracks which snapshot versions are still in use so the store
//! can drop row versions nobody can see any more.

use crate::{CommitError, TransactionContext};
use dashmap::DashMap;
use geostrata_core::{Result, Storage};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters over the manager's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionMetrics {
    /// Transactions begun
    pub started: u64,
    /// Transactions committed
    pub committed: u64,
    /// Transactions aborted, explicitly or by a failed commit
    pub aborted: u64,
    /// Commits that failed validation
    pub conflicts: u64,
}

/// Manages transaction lifecycle and atomic commits
pub struct TransactionManager {
    /// Next transaction ID
    next_txn_id: AtomicU64,

    /// Open transactions and the version each one reads at
    active: DashMap<u64, u64>,

    started: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    conflicts: AtomicU64,
}

impl TransactionManager {
    /// Create a new transaction manager
    pub fn new() -> Self {
        TransactionManager {
            next_txn_id: AtomicU64::new(1),
            active: DashMap::new(),
            started: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
        }
    }

    /// Allocate the next transaction ID
    pub fn next_txn_id(&self) -> u64 {
        self.next_txn_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Begin a transaction on a snapshot of `store`
    pub fn begin(&self, store: &dyn Storage) -> TransactionContext {
        let txn = TransactionContext::with_snapshot(self.next_txn_id(), store.snapshot());
        self.active.insert(txn.txn_id, txn.start_version);
        self.started.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            target: "geostrata::txn",
            txn_id = txn.txn_id,
            start_version = txn.start_version,
            "transaction started"
        );
        txn
    }

    /// Commit a transaction and return its commit version
    pub fn commit(
        &self,
        txn: &mut TransactionContext,
        store: &dyn Storage,
    ) -> std::result::Result<u64, CommitError> {
        let pending = txn.pending_operations();
        let outcome = txn.commit(store);
        self.active.remove(&txn.txn_id);

        match &outcome {
            Ok(version) => {
                self.committed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    target: "geostrata::txn",
                    txn_id = txn.txn_id,
                    version = *version,
                    inserts = pending.inserts,
                    updates = pending.updates,
                    deletes = pending.deletes,
                    elapsed_us = txn.elapsed().as_micros() as u64,
                    "transaction committed"
                );
            }
            Err(CommitError::InvalidState(_)) => {}
            Err(e) => {
                if matches!(e, CommitError::ValidationFailed(_)) {
                    self.conflicts.fetch_add(1, Ordering::Relaxed);
                }
                self.aborted.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target: "geostrata::txn",
                    txn_id = txn.txn_id,
                    error = %e,
                    "transaction aborted at commit"
                );
            }
        }
        outcome
    }

    /// Explicitly abort a transaction, discarding its buffered changes
    pub fn abort(&self, txn: &mut TransactionContext, reason: String) -> Result<()> {
        txn.mark_aborted(reason)?;
        self.active.remove(&txn.txn_id);
        self.aborted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(target: "geostrata::txn", txn_id = txn.txn_id, "transaction rolled back");
        Ok(())
    }

    /// Commit with automatic rollback on failure
    pub fn commit_or_rollback(
        &self,
        txn: &mut TransactionContext,
        store: &dyn Storage,
    ) -> std::result::Result<u64, CommitError> {
        match self.commit(txn, store) {
            Ok(version) => Ok(version),
            Err(e) => {
                if txn.can_rollback() {
                    let _ = txn.mark_aborted(format!("Commit failed: {}", e));
                }
                Err(e)
            }
        }
    }

    /// Number of transactions neither committed nor aborted
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Oldest version an open transaction still reads at, or `current`
    /// when none is open
    pub fn oldest_active_version(&self, current: u64) -> u64 {
        self.active
            .iter()
            .map(|entry| *entry.value())
            .min()
            .unwrap_or(current)
    }

    /// Snapshot of the lifetime counters
    pub fn metrics(&self) -> TransactionMetrics {
        TransactionMetrics {
            started: self.started.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        }
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active", &self.active.len())
            .field("metrics", &self.metrics())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geostrata_core::{ColumnDef, RelationRef, TableDef};
    use geostrata_storage::Database;

    fn setup() -> (TransactionManager, Database, RelationRef) {
        let db = Database::new();
        let rel = RelationRef::table("public", "t");
        db.create_table(
            &TableDef::new("public", "t")
                .column(ColumnDef::new("pk", "serial"))
                .column(ColumnDef::new("name", "text"))
                .primary_key(["pk"]),
        )
        .unwrap();
        db.insert(&rel, &[("name", Some("a".into()))]).unwrap();
        (TransactionManager::new(), db, rel)
    }

    #[test]
    fn test_txn_ids_are_unique() {
        let manager = TransactionManager::new();
        let a = manager.next_txn_id();
        let b = manager.next_txn_id();
        assert!(b > a);
    }

    #[test]
    fn test_commit_updates_metrics() {
        let (manager, db, rel) = setup();
        let mut txn = manager.begin(&db);
        assert_eq!(manager.active_count(), 1);

        let row = db
            .prepare_insert(&rel, &[("name".to_string(), Some("b".into()))])
            .unwrap();
        txn.insert(&rel, row).unwrap();
        let version = manager.commit(&mut txn, &db).unwrap();

        assert_eq!(version, db.current_version());
        assert_eq!(manager.active_count(), 0);
        let metrics = manager.metrics();
        assert_eq!((metrics.started, metrics.committed, metrics.aborted), (1, 1, 0));
    }

    #[test]
    fn test_conflict_is_counted() {
        let (manager, db, rel) = setup();
        let mut t1 = manager.begin(&db);
        let mut t2 = manager.begin(&db);
        let row = t1.scan(&rel, None).unwrap().remove(0);

        t1.delete(&rel, row.row_id).unwrap();
        t2.delete(&rel, row.row_id).unwrap();
        manager.commit(&mut t1, &db).unwrap();
        assert!(manager.commit_or_rollback(&mut t2, &db).is_err());

        let metrics = manager.metrics();
        assert_eq!(metrics.conflicts, 1);
        assert_eq!(metrics.aborted, 1);
        assert!(t2.is_aborted());
    }

    #[test]
    fn test_abort_releases_snapshot() {
        let (manager, db, _) = setup();
        let start = db.current_version();
        let mut txn = manager.begin(&db);
        db.insert(&RelationRef::table("public", "t"), &[("name", Some("x".into()))])
            .unwrap();

        assert_eq!(manager.oldest_active_version(db.current_version()), start);
        manager.abort(&mut txn, "user".into()).unwrap();
        assert_eq!(
            manager.oldest_active_version(db.current_version()),
            db.current_version()
        );
        assert!(manager.abort(&mut txn, "again".into()).is_err());
    }

    static_assertions::assert_impl_all!(TransactionManager: Send, Sync);
}
