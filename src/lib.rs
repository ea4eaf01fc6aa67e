//! geostrata - transactional spatial-feature provider
//!
//! geostrata exposes tables, views and subqueries of a relational geometry
//! store as feature sources: typed attribute fields, stable feature ids
//! synthesized from primary keys, lazy snapshot-isolated feature streams,
//! and transactional mutations that reconcile store default clauses with
//! client-side defaults and constraints.
//!
//! # Quick Start
//!
//! ```ignore
//! use geostrata::{Connection, Database, FeatureRequest, FeatureSource};
//!
//! let db = Database::new();
//! let conn = Connection::new(db);
//! let source = FeatureSource::open(&conn, "dbname='test' key='pk' table=\"qgis_test\".\"someData\" (geom)");
//! for feature in source.get_features(&FeatureRequest::new())? {
//!     println!("{:?}", feature?.attributes());
//! }
//! ```
//!
//! # Architecture
//!
//! All provider operations go through [`FeatureSource`] and [`VectorLayer`].
//! The in-memory [`Database`] stands behind the `Storage` trait; the
//! provider never touches it directly.

// Re-export the public API from geostrata-provider
pub use geostrata_provider::*;
pub use geostrata_storage::Database;
