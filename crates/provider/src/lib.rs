//! Transactional feature provider for geostrata
//!
//! This crate turns relations of the store into feature sources:
//! - DataSourceUri: parsed data source descriptors
//! - Type mapping and datum codecs between store columns and attribute values
//! - PrimaryKey: key resolution and feature id encoding
//! - FeatureSource: snapshot-isolated reads, aggregates, schema introspection
//!   and atomic mutations
//! - Expression / compiler: filter expressions and their store translation
//! - VectorLayer: client constraints, default values and edit sessions
//! - StyleStore: layer styles kept next to the data
//! - export_layer: create and fill a table from a field list

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod compiler;
pub mod config;
pub mod connection;
pub mod exporter;
pub mod expression;
pub mod iterator;
pub mod layer;
pub mod primary_key;
pub mod request;
pub mod source;
pub mod styles;
pub mod type_mapper;
pub mod uri;

mod mutation;
mod schema;

pub use compiler::{compile, Compiled};
pub use config::{DefaultsMode, ProviderConfig};
pub use connection::Connection;
pub use exporter::export_layer;
pub use expression::Expression;
pub use iterator::FeatureIterator;
pub use layer::{EditMode, LayerFeatures, VectorLayer};
pub use primary_key::{FidLookup, KeyKind, PrimaryKey};
pub use request::{FeatureRequest, RequestFilter};
pub use source::FeatureSource;
pub use styles::{NewStyle, StyleList, StyleStore};
pub use uri::DataSourceUri;
