//! Core types and traits for geostrata
//!
//! This crate defines the foundational types used throughout the system:
//! - Value: tagged attribute value (null distinct from unset)
//! - Field / Fields: attribute metadata with constraint origins
//! - Feature / FeatureId: one record and its store-scoped identifier
//! - Geometry: geometry model with EWKB and WKT codecs
//! - Predicate: store-native filter tree
//! - Literal codecs: array and hstore text forms
//! - Relation types: what the store reports about tables, views and queries
//! - Error: Error type hierarchy
//! - Traits: Core trait definitions (Storage, SnapshotView)

#![warn(missing_docs)]
#![warn(clippy::all)]

// Module declarations
pub mod error;
pub mod feature;
pub mod field;
pub mod geometry;
pub mod literal;
pub mod predicate;
pub mod relation;
pub mod traits;
pub mod types;
pub mod value;

// Re-export commonly used types and traits
pub use error::{ConstraintKind, Error, Result};
pub use feature::Feature;
pub use field::{Constraint, ConstraintOrigin, Field, FieldConstraints, FieldType, Fields};
pub use geometry::{Coord, Geometry, Rect, Shape};
pub use predicate::{CompareOp, Literal, Predicate};
pub use relation::{
    ColumnDef, ColumnInfo, Datum, RelationInfo, RelationKind, RelationRef, StoredRow, TableDef,
    TypeKind,
};
pub use traits::{RowWrite, SnapshotView, Storage, WriteBatch};
pub use types::{DatabaseId, FeatureId, RowId};
pub use value::Value;
