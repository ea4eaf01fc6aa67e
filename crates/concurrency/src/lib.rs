//! Optimistic concurrency control for geostrata
//!
//! This crate implements snapshot-isolated transactions over any `Storage`:
//! - TransactionContext: buffered row writes with read-your-writes scans
//! - Validation: first-committer-wins on the rows a transaction changes
//! - TransactionManager: transaction ids, commit/abort, active snapshot
//!   tracking for version garbage collection

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod transaction;
pub mod validation;

pub use manager::{TransactionManager, TransactionMetrics};
pub use transaction::{CommitError, PendingOperations, TransactionContext, TransactionStatus};
pub use validation::{validate_read_set, ConflictType, ReadSet, ValidationResult};
