//! Storage layer for geostrata
//!
//! This crate implements the in-memory relational geometry store behind the
//! `Storage` trait:
//! - Database: catalog + MVCC row chains, commit under a single lock
//! - Catalog: schemas, tables with inheritance, views, query relations,
//!   domains and enums
//! - ColumnType: declared types, value coercion and ordering
//! - Sequences and default clause evaluation
//! - DatabaseSnapshot: lazy version-bounded SnapshotView
//! - Predicate evaluation with three-valued logic

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod column_type;
pub mod database;
pub mod defaults;
pub mod eval;
pub mod rows;
pub mod sequences;
pub mod snapshot;

pub use catalog::{Catalog, ColumnMeta, TableKey};
pub use column_type::ColumnType;
pub use database::Database;
pub use sequences::Sequences;
pub use snapshot::DatabaseSnapshot;
