//! Shared connection to a store
//!
//! A `Connection` owns the store handle, the transaction manager and the
//! provider configuration. Feature sources, iterators, layers and the style
//! store all hold an `Arc<Connection>`.
//!
//! Open iterators register themselves in a cursor table so callers can see
//! how many cursors are alive; each iterator unregisters on drop.

use crate::config::ProviderConfig;
use dashmap::DashMap;
use geostrata_concurrency::{TransactionContext, TransactionManager, TransactionMetrics};
use geostrata_core::{RelationRef, Result, Storage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Connection to one store
pub struct Connection {
    storage: Arc<dyn Storage>,
    transactions: TransactionManager,
    config: ProviderConfig,
    cursors: DashMap<u64, RelationRef>,
    next_cursor: AtomicU64,
}

impl Connection {
    /// Connect with the default configuration
    pub fn new(storage: impl Storage + 'static) -> Arc<Self> {
        Self::with_config(storage, ProviderConfig::default())
    }

    /// Connect with an explicit configuration
    pub fn with_config(storage: impl Storage + 'static, config: ProviderConfig) -> Arc<Self> {
        Self::from_shared(Arc::new(storage), config)
    }

    /// Connect to an already shared store handle
    pub fn from_shared(storage: Arc<dyn Storage>, config: ProviderConfig) -> Arc<Self> {
        Arc::new(Connection {
            storage,
            transactions: TransactionManager::new(),
            config,
            cursors: DashMap::new(),
            next_cursor: AtomicU64::new(1),
        })
    }

    /// The store
    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Provider configuration
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Transaction manager shared by every source of this connection
    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    /// Lifetime transaction counters
    pub fn metrics(&self) -> TransactionMetrics {
        self.transactions.metrics()
    }

    /// Begin a transaction for manual control
    pub fn begin(&self) -> TransactionContext {
        self.transactions.begin(self.storage())
    }

    /// Commit a manually controlled transaction and return its version
    ///
    /// # Errors
    ///
    /// `Conflict` when another transaction changed the same rows first,
    /// or the store's own error when it rejects the batch.
    pub fn commit(&self, txn: &mut TransactionContext) -> Result<u64> {
        Ok(self.transactions.commit_or_rollback(txn, self.storage())?)
    }

    /// Roll back a manually controlled transaction
    ///
    /// # Errors
    ///
    /// `TransactionNotActive` when the transaction already finished.
    pub fn rollback(&self, txn: &mut TransactionContext, reason: impl Into<String>) -> Result<()> {
        self.transactions.abort(txn, reason.into())
    }

    /// Run `f` in a transaction; commit on success, roll back on error
    ///
    /// # Example
    ///
    /// ```ignore
    /// let fids = conn.transaction(|txn| source.add_features_in(txn, &mut features))?;
    /// ```
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut TransactionContext) -> Result<T>,
    {
        let mut txn = self.begin();
        match f(&mut txn) {
            Ok(value) => {
                self.commit(&mut txn)?;
                Ok(value)
            }
            Err(e) => {
                if txn.is_active() {
                    if let Err(rollback_error) = self.rollback(&mut txn, format!("operation failed: {}", e)) {
                        warn!(
                            target: "geostrata::provider",
                            txn_id = txn.txn_id,
                            error = %e,
                            rollback_error = %rollback_error,
                            "Rollback after failed operation did not complete"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    // === Cursors ===

    pub(crate) fn register_cursor(&self, relation: &RelationRef) -> u64 {
        let id = self.next_cursor.fetch_add(1, Ordering::Relaxed);
        self.cursors.insert(id, relation.clone());
        debug!(target: "geostrata::provider", cursor = id, relation = %relation, "Cursor opened");
        id
    }

    pub(crate) fn unregister_cursor(&self, id: u64) {
        if self.cursors.remove(&id).is_some() {
            debug!(target: "geostrata::provider", cursor = id, "Cursor closed");
        }
    }

    /// Number of iterators currently open on this connection
    pub fn open_cursors(&self) -> usize {
        self.cursors.len()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("database", &self.storage.database_id())
            .field("version", &self.storage.current_version())
            .field("open_cursors", &self.cursors.len())
            .field("active_transactions", &self.transactions.active_count())
            .finish()
    }
}
