//! Layer export
//!
//! Writes a field list and its features into a new table. The descriptor's
//! key columns become the primary key, in the order given. Without key
//! columns an existing `id` field is used, or an `id` serial column is
//! prepended.

use crate::codec;
use crate::connection::Connection;
use crate::type_mapper::store_type_for;
use crate::uri::DataSourceUri;
use geostrata_core::{ColumnDef, Datum, Error, Feature, Fields, RelationRef, Result, TableDef};
use std::sync::Arc;
use tracing::info;

const DEFAULT_KEY: &str = "id";

/// Create the table named by `uri` and copy `features` into it
///
/// Returns the number of features written. The table is created and filled
/// in one transaction of the store; features whose attribute count does not
/// match `fields` are refused.
///
/// # Errors
///
/// `InvalidOperation` when the table already exists or the descriptor names
/// a query, `NotFound` for key columns missing from `fields`, and the
/// store's error for rows it refuses.
pub fn export_layer(conn: &Arc<Connection>, uri: &DataSourceUri, fields: &Fields, features: &[Feature]) -> Result<usize> {
    let relation = uri.relation()?.clone();
    let (schema, name) = match &relation {
        RelationRef::Table { schema, name } => (schema.clone(), name.clone()),
        RelationRef::Query(_) => return Err(Error::invalid_operation("cannot export into a query")),
    };
    let storage = conn.storage();
    if storage.relation_exists(&relation) {
        return Err(Error::invalid_operation(format!("table {} already exists", relation)));
    }

    let mut key = uri.key_columns.clone();
    for column in &key {
        if fields.index_from_name(column).is_none() {
            return Err(Error::not_found(format!("key column \"{}\" is not a field", column)));
        }
    }

    let mut def = TableDef::new(schema, name);
    if key.is_empty() {
        if fields.index_from_name(DEFAULT_KEY).is_none() {
            def = def.column(ColumnDef::new(DEFAULT_KEY, "serial"));
        }
        key.push(DEFAULT_KEY.to_string());
    }
    for field in fields.iter() {
        def = def.column(ColumnDef::new(field.name.clone(), store_type_for(field)));
    }
    let srid = uri
        .srid
        .or_else(|| features.iter().find_map(|f| f.geometry().and_then(|g| g.srid)));
    if let Some(geometry_column) = &uri.geometry_column {
        def = def.column(ColumnDef::new(geometry_column.clone(), geometry_type(uri, srid)));
    }
    storage.create_table(&def.primary_key(key.iter().cloned()))?;

    let written = conn.transaction(|txn| {
        for feature in features {
            if feature.attributes().len() != fields.len() {
                return Err(Error::invalid_operation(format!(
                    "feature has {} attributes but {} fields were exported",
                    feature.attributes().len(),
                    fields.len()
                )));
            }
            let mut values: Vec<(String, Datum)> = Vec::with_capacity(fields.len() + 1);
            for (field, value) in fields.iter().zip(feature.attributes()) {
                if value.is_unset() {
                    continue;
                }
                values.push((field.name.clone(), codec::encode(field, value)?));
            }
            if let (Some(column), Some(geometry)) = (&uri.geometry_column, feature.geometry()) {
                let geometry = match (geometry.srid, srid) {
                    (None, Some(srid)) => geometry.clone().with_srid(srid),
                    _ => geometry.clone(),
                };
                values.push((column.clone(), Some(geometry.to_hex_ewkb())));
            }
            let row = storage.prepare_insert(&relation, &values)?;
            txn.insert(&relation, row)?;
        }
        Ok(features.len())
    })?;

    info!(
        target: "geostrata::provider",
        relation = %relation,
        features = written,
        key = ?key,
        "Layer exported"
    );
    Ok(written)
}

fn geometry_type(uri: &DataSourceUri, srid: Option<i32>) -> String {
    let kind = uri.geometry_type.as_deref().unwrap_or("GEOMETRY");
    match srid {
        Some(srid) => format!("geometry({},{})", kind, srid),
        None => format!("geometry({})", kind),
    }
}
