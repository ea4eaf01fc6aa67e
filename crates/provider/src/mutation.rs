//! Writes through a feature source
//!
//! Every public operation runs in a transaction of its own and either
//! applies completely or not at all. The `_in` variants write into a
//! caller-owned transaction instead, which is how layers in transaction
//! mode group several edits into one commit.
//!
//! On insert, a value is left out (so the store default applies) when it is
//! unset, when it is NULL in a key column, or when it is the exact default
//! clause text of its column.

use crate::codec;
use crate::source::{FeatureSource, Layout, SourceState};
use geostrata_concurrency::TransactionContext;
use geostrata_core::{Datum, Error, Feature, FeatureId, Geometry, Result, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

impl FeatureSource {
    // === Inserts ===

    /// Insert features; on success each feature carries its assigned id
    /// and the values the store stored, defaults included
    ///
    /// # Errors
    ///
    /// `InvalidOperation` for read-only sources or features built for
    /// another field list, `ConstraintViolation` when the store refuses a
    /// row. Nothing is inserted on error.
    pub fn add_features(&self, features: &mut [Feature]) -> Result<()> {
        let mut staged = features.to_vec();
        self.connection()
            .transaction(|txn| self.add_features_in(txn, &mut staged))?;
        info!(
            target: "geostrata::provider",
            relation = %self.state()?.relation,
            count = staged.len(),
            "Features added"
        );
        features.clone_from_slice(&staged);
        Ok(())
    }

    /// Insert features into `txn`
    ///
    /// # Errors
    ///
    /// As `add_features`; nothing is rolled back on error, that is up to
    /// the owner of `txn`.
    pub fn add_features_in(&self, txn: &mut TransactionContext, features: &mut [Feature]) -> Result<()> {
        let state = self.state()?;
        let layout = state.layout();
        ensure_writable(self, state, &layout)?;

        for feature in features.iter_mut() {
            let values = self.insert_values(state, &layout, feature)?;
            let row = self
                .connection()
                .storage()
                .prepare_insert(&state.relation, &values)?;
            let fid = state.key.fid_for_row(&row, 0);
            let mut attributes = Vec::with_capacity(layout.fields.len());
            for (field, column) in layout.fields.iter().zip(&layout.columns) {
                attributes.push(codec::decode(field, &row.values.get(*column).cloned().flatten())?);
            }
            txn.insert(&state.relation, row)?;
            *feature = Feature::from_parts(
                fid,
                Arc::clone(&layout.fields),
                attributes,
                feature.geometry().cloned(),
            )?;
        }
        Ok(())
    }

    fn insert_values(&self, state: &SourceState, layout: &Layout, feature: &Feature) -> Result<Vec<(String, Datum)>> {
        if feature.attributes().len() != layout.fields.len() {
            return Err(Error::invalid_operation(format!(
                "feature has {} attributes but {} has {} fields",
                feature.attributes().len(),
                state.relation,
                layout.fields.len()
            )));
        }
        let key_fields = state.key.attribute_indexes(&layout.info, &layout.fields);
        let mut values = Vec::with_capacity(layout.fields.len() + 1);
        for (index, (field, value)) in layout.fields.iter().zip(feature.attributes()).enumerate() {
            if value.is_unset() || (value.is_null() && key_fields.contains(&index)) {
                continue;
            }
            let column = &layout.info.columns[layout.columns[index]];
            if let (Value::String(text), Some(clause)) = (value, &column.default_expr) {
                if text == clause {
                    continue;
                }
            }
            values.push((column.name.clone(), codec::encode(field, value)?));
        }
        if let (Some(name), Some(geometry)) = (layout.geometry_name(), feature.geometry()) {
            values.push((name.to_string(), Some(self.geometry_hex(geometry))));
        }
        Ok(values)
    }

    fn geometry_hex(&self, geometry: &Geometry) -> String {
        match (geometry.srid, self.srid()) {
            (None, Some(srid)) => geometry.clone().with_srid(srid).to_hex_ewkb(),
            _ => geometry.to_hex_ewkb(),
        }
    }

    // === Deletes ===

    /// Delete features; ids that match nothing are ignored
    ///
    /// Returns the number of rows deleted.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` for read-only sources, `Conflict` when another
    /// transaction changed one of the rows first.
    pub fn delete_features(&self, fids: &[FeatureId]) -> Result<usize> {
        let deleted = self
            .connection()
            .transaction(|txn| self.delete_features_in(txn, fids))?;
        info!(
            target: "geostrata::provider",
            relation = %self.state()?.relation,
            count = deleted,
            "Features deleted"
        );
        Ok(deleted)
    }

    /// Delete features in `txn`
    ///
    /// # Errors
    ///
    /// As `delete_features`.
    pub fn delete_features_in(&self, txn: &mut TransactionContext, fids: &[FeatureId]) -> Result<usize> {
        let state = self.state()?;
        let layout = state.layout();
        ensure_writable(self, state, &layout)?;
        let mut deleted = 0;
        for fid in fids {
            for row in self.rows_for(state, &layout, txn, *fid)? {
                txn.delete(&state.relation, row.row_id)?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    // === Updates ===

    /// Change attribute values, keyed by feature id then field index
    ///
    /// Unset values are left alone.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown feature ids or field indexes, the store's
    /// constraint error when it refuses a value. Nothing changes on error.
    pub fn change_attribute_values(&self, changes: &BTreeMap<FeatureId, BTreeMap<usize, Value>>) -> Result<()> {
        self.connection()
            .transaction(|txn| self.change_attribute_values_in(txn, changes))?;
        info!(
            target: "geostrata::provider",
            relation = %self.state()?.relation,
            count = changes.len(),
            "Attribute values changed"
        );
        Ok(())
    }

    /// Change attribute values in `txn`
    ///
    /// # Errors
    ///
    /// As `change_attribute_values`.
    pub fn change_attribute_values_in(
        &self,
        txn: &mut TransactionContext,
        changes: &BTreeMap<FeatureId, BTreeMap<usize, Value>>,
    ) -> Result<()> {
        let state = self.state()?;
        let layout = state.layout();
        ensure_writable(self, state, &layout)?;
        for (fid, attributes) in changes {
            let mut encoded = Vec::with_capacity(attributes.len());
            for (index, value) in attributes {
                if value.is_unset() {
                    continue;
                }
                let (Some(field), Some(column)) = (layout.fields.at(*index as i64), layout.column_name(*index)) else {
                    return Err(Error::not_found(format!("field index {} out of range", index)));
                };
                encoded.push((column.to_string(), codec::encode(field, value)?));
            }
            self.update_rows(state, &layout, txn, *fid, &encoded)?;
        }
        Ok(())
    }

    /// Replace geometries; `None` clears a feature's geometry
    ///
    /// # Errors
    ///
    /// `InvalidOperation` when the source has no geometry column, `NotFound`
    /// for unknown feature ids. Nothing changes on error.
    pub fn change_geometry_values(&self, changes: &BTreeMap<FeatureId, Option<Geometry>>) -> Result<()> {
        self.connection()
            .transaction(|txn| self.change_geometry_values_in(txn, changes))?;
        info!(
            target: "geostrata::provider",
            relation = %self.state()?.relation,
            count = changes.len(),
            "Geometries changed"
        );
        Ok(())
    }

    /// Replace geometries in `txn`
    ///
    /// # Errors
    ///
    /// As `change_geometry_values`.
    pub fn change_geometry_values_in(
        &self,
        txn: &mut TransactionContext,
        changes: &BTreeMap<FeatureId, Option<Geometry>>,
    ) -> Result<()> {
        let state = self.state()?;
        let layout = state.layout();
        ensure_writable(self, state, &layout)?;
        if changes.is_empty() {
            return Ok(());
        }
        let column = layout
            .geometry_name()
            .ok_or_else(|| Error::invalid_operation(format!("{} has no geometry column", state.relation)))?
            .to_string();
        for (fid, geometry) in changes {
            let datum = geometry.as_ref().map(|g| self.geometry_hex(g));
            self.update_rows(state, &layout, txn, *fid, &[(column.clone(), datum)])?;
        }
        Ok(())
    }

    fn update_rows(
        &self,
        state: &SourceState,
        layout: &Layout,
        txn: &mut TransactionContext,
        fid: FeatureId,
        changes: &[(String, Datum)],
    ) -> Result<()> {
        let rows = self.rows_for(state, layout, txn, fid)?;
        if rows.is_empty() {
            return Err(Error::not_found(format!("feature {} not found in {}", fid, state.relation)));
        }
        for row in rows {
            let updated = self
                .connection()
                .storage()
                .prepare_update(&state.relation, &row, changes)?;
            txn.update(&state.relation, updated)?;
        }
        Ok(())
    }

    // === Schema changes ===

    /// Rename fields, keyed by field index
    ///
    /// Either every rename applies or none does. Renames are catalog
    /// changes and take effect immediately, outside any transaction.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` for an empty map, indexes out of range or names
    /// that collide with another field.
    pub fn rename_attributes(&self, renames: &BTreeMap<i64, String>) -> Result<()> {
        let state = self.state()?;
        if renames.is_empty() {
            return Err(Error::invalid_operation("no fields to rename"));
        }
        let layout = state.layout();
        let mut fields = (*layout.fields).clone();
        let mut pairs = Vec::with_capacity(renames.len());
        for (index, name) in renames {
            let position = usize::try_from(*index)
                .ok()
                .filter(|i| *i < fields.len())
                .ok_or_else(|| Error::invalid_operation(format!("field index {} out of range", index)))?;
            if !fields.rename(position, name) || layout.geometry_name() == Some(name.as_str()) {
                return Err(Error::invalid_operation(format!("field \"{}\" already exists", name)));
            }
            match layout.column_name(position) {
                Some(old) if old != name => pairs.push((old.to_string(), name.clone())),
                _ => {}
            }
        }
        if pairs.is_empty() {
            return Ok(());
        }

        self.connection().storage().rename_columns(&state.relation, &pairs)?;
        self.reload_layout()?;
        info!(
            target: "geostrata::provider",
            relation = %state.relation,
            renames = ?pairs,
            "Fields renamed"
        );
        Ok(())
    }
}

fn ensure_writable(source: &FeatureSource, state: &SourceState, layout: &Layout) -> Result<()> {
    if !layout.info.writable {
        return Err(Error::invalid_operation(format!("{} is read-only", state.relation)));
    }
    if !source.is_writable() {
        return Err(Error::invalid_operation(format!(
            "{} has no key columns and cannot be edited",
            state.relation
        )));
    }
    Ok(())
}
