//! Error types for geostrata
//!
//! This module defines the error taxonomy shared by every layer of the
//! provider stack. We use `thiserror` for automatic `Display` and `Error`
//! trait implementations.
//!
//! ## Propagation policy
//!
//! - Construction-time errors (`InvalidSource`) invalidate a whole feature
//!   source; every later call on it fails fast with the same error.
//! - Per-call errors (`ConstraintViolation`, `Conflict`, `NotFound`, ...)
//!   are returned to the caller and leave the source usable.

use std::io;
use thiserror::Error;

/// Result type alias for geostrata operations
pub type Result<T> = std::result::Result<T, Error>;

/// Which store-side constraint rejected a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    /// A NOT NULL column received NULL
    NotNull,
    /// A unique constraint or primary key saw a duplicate tuple
    Unique,
    /// A value could not be converted to the column type
    Type,
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstraintKind::NotNull => write!(f, "not-null"),
            ConstraintKind::Unique => write!(f, "unique"),
            ConstraintKind::Type => write!(f, "type"),
        }
    }
}

/// Error types for geostrata
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (configuration files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The source descriptor is invalid or the declared key is not unique
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    /// The store rejected a write
    #[error("{kind} constraint violated on {relation}: {message}")]
    ConstraintViolation {
        /// Constraint family
        kind: ConstraintKind,
        /// Relation the write targeted
        relation: String,
        /// Human-readable detail
        message: String,
    },

    /// Typed operation on a field whose store type has no mapping
    #[error("Unsupported type '{type_name}' for field '{field}'")]
    UnsupportedType {
        /// Field name
        field: String,
        /// Store type name
        type_name: String,
    },

    /// Write-write conflict detected at commit
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Requested object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Text could not be parsed (descriptors, literals, expressions, EWKB)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Operation is not valid in the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Transaction is not in the active state
    #[error("Transaction not active (state: {state})")]
    TransactionNotActive {
        /// Current state of the transaction
        state: String,
    },

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Build an `InvalidSource` error
    pub fn invalid_source(msg: impl Into<String>) -> Self {
        Error::InvalidSource(msg.into())
    }

    /// Build a `Parse` error
    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }

    /// Build an `InvalidOperation` error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Error::InvalidOperation(msg.into())
    }

    /// Build a `NotFound` error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Build a `Storage` error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Build a `ConstraintViolation` error
    pub fn constraint(
        kind: ConstraintKind,
        relation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::ConstraintViolation {
            kind,
            relation: relation.into(),
            message: message.into(),
        }
    }

    /// True for errors raised because the store refused a write
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Error::ConstraintViolation { .. })
    }
}
