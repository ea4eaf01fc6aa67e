//! Client-level vector layer
//!
//! A `VectorLayer` wraps a `FeatureSource` with what lives on the client:
//! extra field constraints, default value expressions, the defaults mode
//! and an edit session.
//!
//! ## Edit sessions
//!
//! ```text
//! Idle ──start_editing──▶ Editing ──commit_changes──▶ Idle
//!                            └──────rollback─────────▶ Idle
//! ```
//!
//! In `Buffered` mode edits collect in a client buffer and are written in
//! one store transaction on commit; reads overlay the buffer on the store.
//! In `Transaction` mode every edit goes straight into one open store
//! transaction; reads see that transaction as of the moment they start and
//! never block later edits.

use crate::config::DefaultsMode;
use crate::expression::{compare_values, Expression};
use crate::iterator::FeatureIterator;
use crate::request::{FeatureRequest, RequestFilter};
use crate::source::FeatureSource;
use geostrata_concurrency::TransactionContext;
use geostrata_core::{
    Constraint, ConstraintOrigin, Error, Feature, FeatureId, FieldConstraints, Fields, Geometry, Result, Value,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How an edit session writes to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditMode {
    /// Edits are buffered on the client until commit
    Buffered,
    /// Edits go straight into one open store transaction
    Transaction,
}

/// Client edit buffer of a `Buffered` session
#[derive(Debug, Default)]
struct EditBuffer {
    added: BTreeMap<FeatureId, Feature>,
    deleted: BTreeSet<FeatureId>,
    changed_attributes: BTreeMap<FeatureId, BTreeMap<usize, Value>>,
    changed_geometries: BTreeMap<FeatureId, Option<Geometry>>,
    last_temporary: i64,
}

impl EditBuffer {
    fn next_temporary(&mut self) -> FeatureId {
        self.last_temporary -= 1;
        FeatureId(self.last_temporary)
    }

    fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.deleted.is_empty()
            && self.changed_attributes.is_empty()
            && self.changed_geometries.is_empty()
    }

    /// Apply buffered changes to a committed feature; `None` when deleted
    fn overlay(&self, mut feature: Feature) -> Option<Feature> {
        if self.deleted.contains(&feature.id()) {
            return None;
        }
        if let Some(changes) = self.changed_attributes.get(&feature.id()) {
            for (index, value) in changes {
                feature.set_attribute(*index, value.clone());
            }
        }
        if let Some(geometry) = self.changed_geometries.get(&feature.id()) {
            feature.set_geometry(geometry.clone());
        }
        Some(feature)
    }
}

enum EditState {
    Idle,
    Buffered(EditBuffer),
    Transaction(TransactionContext),
}

impl EditState {
    fn mode(&self) -> Option<EditMode> {
        match self {
            EditState::Idle => None,
            EditState::Buffered(_) => Some(EditMode::Buffered),
            EditState::Transaction(_) => Some(EditMode::Transaction),
        }
    }
}

/// Features read through a layer
pub enum LayerFeatures {
    /// Straight from the store (or the session's transaction)
    Store(FeatureIterator),
    /// Committed features with the edit buffer applied
    Overlay(std::vec::IntoIter<Feature>),
}

impl Iterator for LayerFeatures {
    type Item = Result<Feature>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            LayerFeatures::Store(it) => it.next(),
            LayerFeatures::Overlay(it) => it.next().map(Ok),
        }
    }
}

/// A feature source with client-side constraints, defaults and editing
pub struct VectorLayer {
    source: Arc<FeatureSource>,
    client_constraints: RwLock<BTreeMap<usize, FieldConstraints>>,
    default_expressions: RwLock<BTreeMap<usize, Expression>>,
    defaults_mode: RwLock<DefaultsMode>,
    state: Mutex<EditState>,
}

impl VectorLayer {
    /// Layer over `source`, starting in the connection's defaults mode
    pub fn new(source: FeatureSource) -> Self {
        let mode = source.configured_defaults_mode();
        VectorLayer {
            source: Arc::new(source),
            client_constraints: RwLock::new(BTreeMap::new()),
            default_expressions: RwLock::new(BTreeMap::new()),
            defaults_mode: RwLock::new(mode),
            state: Mutex::new(EditState::Idle),
        }
    }

    /// The underlying source
    pub fn source(&self) -> &Arc<FeatureSource> {
        &self.source
    }

    /// Current defaults mode
    pub fn defaults_mode(&self) -> DefaultsMode {
        *self.defaults_mode.read()
    }

    /// Switch between deferred and evaluated defaults
    pub fn set_defaults_mode(&self, mode: DefaultsMode) {
        *self.defaults_mode.write() = mode;
    }

    // === Fields and constraints ===

    /// Source fields with client constraints merged in
    pub fn fields(&self) -> Arc<Fields> {
        let source_fields = self.source.fields();
        let client = self.client_constraints.read();
        if client.is_empty() {
            return source_fields;
        }
        let mut fields = (*source_fields).clone();
        for (index, constraints) in client.iter() {
            if let Some(field) = fields.at_mut(*index) {
                field.constraints.merge(constraints);
            }
        }
        Arc::new(fields)
    }

    /// Constraints of a field, store and client
    pub fn field_constraints(&self, index: usize) -> FieldConstraints {
        self.fields()
            .at(index as i64)
            .map(|f| f.constraints.clone())
            .unwrap_or_default()
    }

    /// Add a client constraint to a field; store constraints are unaffected
    pub fn set_field_constraint(&self, index: usize, constraint: Constraint) {
        self.client_constraints
            .write()
            .entry(index)
            .or_default()
            .set_constraint(constraint, ConstraintOrigin::Client);
    }

    /// Remove a client constraint; a store constraint of the same kind stays
    pub fn remove_field_constraint(&self, index: usize, constraint: Constraint) {
        let mut client = self.client_constraints.write();
        if let Some(constraints) = client.get_mut(&index) {
            constraints.remove_client_constraint(constraint);
            if constraints.is_empty() {
                client.remove(&index);
            }
        }
    }

    // === Defaults and validation ===

    /// Set (or clear with `None`) the default value expression of a field
    ///
    /// # Errors
    ///
    /// `Parse` for malformed expressions, `NotFound` for an index out of
    /// range.
    pub fn set_default_value_expression(&self, index: usize, expression: Option<&str>) -> Result<()> {
        if index >= self.source.fields().len() {
            return Err(Error::not_found(format!("field {} does not exist", index)));
        }
        let mut expressions = self.default_expressions.write();
        match expression {
            Some(text) => {
                expressions.insert(index, Expression::parse(text)?);
            }
            None => {
                expressions.remove(&index);
            }
        }
        Ok(())
    }

    /// Build a new feature
    ///
    /// Each attribute takes the first of: the client default expression,
    /// the store default clause (deferred mode only), the supplied value.
    /// Values of unique fields that already exist are adjusted to a free
    /// value, except store clauses. Everything else stays unset.
    ///
    /// # Errors
    ///
    /// Evaluation errors of default expressions, read errors of the
    /// uniqueness lookups.
    pub fn create_feature(&self, attributes: &BTreeMap<usize, Value>) -> Result<Feature> {
        let fields = self.fields();
        let mode = self.defaults_mode();
        let mut feature = Feature::new(self.source.fields());
        let expressions = self.default_expressions.read().clone();

        for (index, field) in fields.iter().enumerate() {
            let mut check_unique = true;
            let value = if let Some(expression) = expressions.get(&index) {
                expression.evaluate(&feature)?
            } else if let Some(clause) = self.source.default_value_clause(index as i64, mode) {
                check_unique = false;
                Value::String(clause)
            } else if let Some(value) = attributes.get(&index) {
                value.clone()
            } else {
                Value::Unset
            };

            let value = if check_unique
                && !value.is_null()
                && !value.is_unset()
                && field.constraints.contains(Constraint::Unique)
                && self.value_exists(index, &value)?
            {
                self.unique_value(index, &value)?
            } else {
                value
            };
            feature.set_attribute(index, value);
        }
        debug!(
            target: "geostrata::provider",
            attributes = ?feature.attributes(),
            "Feature created"
        );
        Ok(feature)
    }

    /// True when some feature (committed or buffered) has `value` at `index`
    ///
    /// # Errors
    ///
    /// Read errors of the source.
    pub fn value_exists(&self, index: usize, value: &Value) -> Result<bool> {
        Ok(self.values_at(index, None)?.iter().any(|v| v.loosely_equals(value)))
    }

    /// Check a feature's attribute against its constraints
    ///
    /// Returns whether the value is valid and the reasons it is not. A value
    /// the store will supply (per `skip_constraint_check`) passes.
    ///
    /// # Errors
    ///
    /// Read errors of the uniqueness lookup.
    pub fn validate_attribute(&self, feature: &Feature, index: usize) -> Result<(bool, Vec<String>)> {
        let constraints = self.field_constraints(index);
        let mode = self.defaults_mode();
        let value = feature.attribute(index).cloned().unwrap_or(Value::Unset);
        let mut errors = Vec::new();

        if constraints.contains(Constraint::NotNull)
            && (value.is_null() || value.is_unset())
            && !self
                .source
                .skip_constraint_check(index as i64, Constraint::NotNull, &value, mode)
        {
            errors.push("value is NULL".to_string());
        }
        if constraints.contains(Constraint::Unique)
            && !value.is_null()
            && !value.is_unset()
            && !self
                .source
                .skip_constraint_check(index as i64, Constraint::Unique, &value, mode)
            && self
                .values_at(index, Some(feature.id()))?
                .iter()
                .any(|v| v.loosely_equals(&value))
        {
            errors.push("value is not unique".to_string());
        }
        Ok((errors.is_empty(), errors))
    }

    /// Every value at `index`, optionally skipping one feature
    fn values_at(&self, index: usize, except: Option<FeatureId>) -> Result<Vec<Value>> {
        let request = FeatureRequest::new().with_subset(vec![index]).no_geometry();
        let mut values = Vec::new();
        for feature in self.get_features(&request)? {
            let feature = feature?;
            if Some(feature.id()) == except {
                continue;
            }
            if let Some(value) = feature.attribute(index) {
                values.push(value.clone());
            }
        }
        Ok(values)
    }

    /// A value at `index` that does not exist yet, derived from `seed`
    fn unique_value(&self, index: usize, seed: &Value) -> Result<Value> {
        let existing = self.values_at(index, None)?;
        match seed {
            Value::Int(_) | Value::LongLong(_) => {
                let max = existing.iter().filter_map(Value::as_i64).max().unwrap_or(0);
                Ok(match seed {
                    Value::Int(_) => i32::try_from(max + 1).map(Value::Int).unwrap_or(Value::LongLong(max + 1)),
                    _ => Value::LongLong(max + 1),
                })
            }
            Value::Double(_) => {
                let max = existing
                    .iter()
                    .filter_map(Value::as_f64)
                    .fold(0.0_f64, f64::max);
                Ok(Value::Double(max.floor() + 1.0))
            }
            Value::String(text) => {
                let taken = |candidate: &str| {
                    existing
                        .iter()
                        .any(|v| matches!(v, Value::String(s) if s == candidate))
                };
                let mut n = 1;
                loop {
                    let candidate = format!("{}_{}", text, n);
                    if !taken(&candidate) {
                        return Ok(Value::String(candidate));
                    }
                    n += 1;
                }
            }
            other => Ok(other.clone()),
        }
    }

    // === Reads ===

    /// Features as this layer sees them, edits included
    ///
    /// # Errors
    ///
    /// As `FeatureSource::get_features`.
    pub fn get_features(&self, request: &FeatureRequest) -> Result<LayerFeatures> {
        let state = self.state.lock();
        match &*state {
            EditState::Idle => Ok(LayerFeatures::Store(self.source.get_features(request)?)),
            EditState::Transaction(txn) => Ok(LayerFeatures::Store(self.source.get_features_in(txn, request)?)),
            EditState::Buffered(buffer) => self.overlay_features(buffer, request).map(LayerFeatures::Overlay),
        }
    }

    /// One feature by id, edits included
    ///
    /// # Errors
    ///
    /// As `get_features`.
    pub fn get_feature(&self, fid: FeatureId) -> Result<Option<Feature>> {
        self.get_features(&FeatureRequest::new().with_fid(fid))?
            .next()
            .transpose()
    }

    fn overlay_features(&self, buffer: &EditBuffer, request: &FeatureRequest) -> Result<std::vec::IntoIter<Feature>> {
        let base = match request.filter() {
            RequestFilter::Fid(fid) => FeatureRequest::new().with_fid(*fid),
            RequestFilter::Fids(fids) => FeatureRequest::new().with_fids(fids.iter().copied()),
            RequestFilter::None | RequestFilter::Expression(_) => FeatureRequest::new(),
        };
        let wanted = |fid: &FeatureId| match request.filter() {
            RequestFilter::Fid(f) => f == fid,
            RequestFilter::Fids(fids) => fids.contains(fid),
            RequestFilter::None | RequestFilter::Expression(_) => true,
        };

        let mut features = Vec::new();
        for feature in self.source.get_features(&base)? {
            if let Some(feature) = buffer.overlay(feature?) {
                features.push(feature);
            }
        }
        features.extend(buffer.added.values().filter(|f| wanted(&f.id())).cloned());

        let mut selected = Vec::new();
        for mut feature in features {
            if let RequestFilter::Expression(expression) = request.filter() {
                if !expression.matches(&feature)? {
                    continue;
                }
            }
            if let Some(rect) = request.rect() {
                let hit = feature
                    .geometry()
                    .and_then(Geometry::envelope)
                    .map_or(false, |e| e.intersects(rect));
                if !hit {
                    continue;
                }
            }
            if let Some(subset) = request.subset() {
                for index in 0..feature.attributes().len() {
                    if !subset.contains(&index) {
                        feature.set_attribute(index, Value::Unset);
                    }
                }
            }
            if request.skips_geometry() {
                feature.set_geometry(None);
            }
            selected.push(feature);
            if request.limit().map_or(false, |limit| selected.len() >= limit) {
                break;
            }
        }
        Ok(selected.into_iter())
    }

    /// Smallest value of a field, edits included
    ///
    /// # Errors
    ///
    /// As `get_features`.
    pub fn minimum_value(&self, index: usize) -> Result<Value> {
        self.extreme(index, std::cmp::Ordering::Less)
    }

    /// Largest value of a field, edits included
    ///
    /// # Errors
    ///
    /// As `get_features`.
    pub fn maximum_value(&self, index: usize) -> Result<Value> {
        self.extreme(index, std::cmp::Ordering::Greater)
    }

    fn extreme(&self, index: usize, wanted: std::cmp::Ordering) -> Result<Value> {
        if self.state.lock().mode().is_none() {
            return match wanted {
                std::cmp::Ordering::Less => self.source.min_value(index),
                _ => self.source.max_value(index),
            };
        }
        let mut best = Value::Null;
        for value in self.values_at(index, None)? {
            if value.is_null() || value.is_unset() {
                continue;
            }
            if best.is_null() || compare_values(&value, &best) == Some(wanted) {
                best = value;
            }
        }
        Ok(best)
    }

    // === Edit session ===

    /// Start an edit session
    ///
    /// # Errors
    ///
    /// `InvalidOperation` when a session is already open or the source
    /// cannot be written, `InvalidSource` for an invalid source.
    pub fn start_editing(&self, mode: EditMode) -> Result<()> {
        self.source.state()?;
        if !self.source.is_writable() {
            return Err(Error::invalid_operation("layer is read-only"));
        }
        let mut state = self.state.lock();
        if state.mode().is_some() {
            return Err(Error::invalid_operation("layer is already being edited"));
        }
        *state = match mode {
            EditMode::Buffered => EditState::Buffered(EditBuffer::default()),
            EditMode::Transaction => EditState::Transaction(self.source.connection().begin()),
        };
        debug!(target: "geostrata::txn", ?mode, "Edit session started");
        Ok(())
    }

    /// True while an edit session is open
    pub fn is_editing(&self) -> bool {
        self.state.lock().mode().is_some()
    }

    /// Mode of the open edit session
    pub fn edit_mode(&self) -> Option<EditMode> {
        self.state.lock().mode()
    }

    /// Add a feature and return its id (temporary in buffered mode)
    ///
    /// # Errors
    ///
    /// `InvalidOperation` outside an edit session or for a feature built for
    /// another field list; in transaction mode, the store's error.
    pub fn add_feature(&self, mut feature: Feature) -> Result<FeatureId> {
        let mut state = self.state.lock();
        match &mut *state {
            EditState::Idle => Err(not_editing()),
            EditState::Buffered(buffer) => {
                let fields = self.source.fields();
                if feature.attributes().len() != fields.len() {
                    return Err(Error::invalid_operation(format!(
                        "feature has {} attributes but the layer has {} fields",
                        feature.attributes().len(),
                        fields.len()
                    )));
                }
                let fid = buffer.next_temporary();
                feature.set_id(fid);
                buffer.added.insert(fid, feature);
                Ok(fid)
            }
            EditState::Transaction(txn) => {
                let mut staged = [feature];
                self.source.add_features_in(txn, &mut staged)?;
                Ok(staged[0].id())
            }
        }
    }

    /// Delete a feature; returns whether it existed
    ///
    /// # Errors
    ///
    /// `InvalidOperation` outside an edit session; in transaction mode, the
    /// store's error.
    pub fn delete_feature(&self, fid: FeatureId) -> Result<bool> {
        let mut state = self.state.lock();
        match &mut *state {
            EditState::Idle => Err(not_editing()),
            EditState::Buffered(buffer) => {
                if fid.is_temporary() {
                    return Ok(buffer.added.remove(&fid).is_some());
                }
                buffer.changed_attributes.remove(&fid);
                buffer.changed_geometries.remove(&fid);
                Ok(buffer.deleted.insert(fid))
            }
            EditState::Transaction(txn) => Ok(self.source.delete_features_in(txn, &[fid])? > 0),
        }
    }

    /// Change one attribute of a feature
    ///
    /// # Errors
    ///
    /// `InvalidOperation` outside an edit session, `NotFound` for an index
    /// out of range or an unknown temporary id; in transaction mode, the
    /// store's error.
    pub fn change_attribute_value(&self, fid: FeatureId, index: usize, value: Value) -> Result<()> {
        if index >= self.source.fields().len() {
            return Err(Error::not_found(format!("field {} does not exist", index)));
        }
        let mut state = self.state.lock();
        match &mut *state {
            EditState::Idle => Err(not_editing()),
            EditState::Buffered(buffer) => {
                if fid.is_temporary() {
                    let feature = buffer
                        .added
                        .get_mut(&fid)
                        .ok_or_else(|| Error::not_found(format!("feature {} not found", fid)))?;
                    feature.set_attribute(index, value);
                } else {
                    buffer.changed_attributes.entry(fid).or_default().insert(index, value);
                }
                Ok(())
            }
            EditState::Transaction(txn) => {
                let changes = BTreeMap::from([(fid, BTreeMap::from([(index, value)]))]);
                self.source.change_attribute_values_in(txn, &changes)
            }
        }
    }

    /// Replace (or clear) the geometry of a feature
    ///
    /// # Errors
    ///
    /// As `change_attribute_value`.
    pub fn change_geometry(&self, fid: FeatureId, geometry: Option<Geometry>) -> Result<()> {
        let mut state = self.state.lock();
        match &mut *state {
            EditState::Idle => Err(not_editing()),
            EditState::Buffered(buffer) => {
                if fid.is_temporary() {
                    let feature = buffer
                        .added
                        .get_mut(&fid)
                        .ok_or_else(|| Error::not_found(format!("feature {} not found", fid)))?;
                    feature.set_geometry(geometry);
                } else {
                    buffer.changed_geometries.insert(fid, geometry);
                }
                Ok(())
            }
            EditState::Transaction(txn) => {
                let changes = BTreeMap::from([(fid, geometry)]);
                self.source.change_geometry_values_in(txn, &changes)
            }
        }
    }

    /// Write the session's edits and close it
    ///
    /// A buffered session that fails to commit stays open with its buffer
    /// intact. A transaction session is closed either way.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` outside an edit session, or the store's error.
    pub fn commit_changes(&self) -> Result<()> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, EditState::Idle) {
            EditState::Idle => Err(not_editing()),
            EditState::Buffered(buffer) => {
                if buffer.is_empty() {
                    return Ok(());
                }
                match self.flush(&buffer) {
                    Ok(added) => {
                        info!(
                            target: "geostrata::txn",
                            added,
                            deleted = buffer.deleted.len(),
                            changed = buffer.changed_attributes.len() + buffer.changed_geometries.len(),
                            "Edits committed"
                        );
                        Ok(())
                    }
                    Err(e) => {
                        warn!(target: "geostrata::txn", error = %e, "Commit of buffered edits failed");
                        *state = EditState::Buffered(buffer);
                        Err(e)
                    }
                }
            }
            EditState::Transaction(mut txn) => {
                let version = self.source.connection().commit(&mut txn)?;
                info!(target: "geostrata::txn", version, "Edit transaction committed");
                Ok(())
            }
        }
    }

    fn flush(&self, buffer: &EditBuffer) -> Result<usize> {
        let mut added: Vec<Feature> = buffer.added.values().cloned().collect();
        self.source.connection().transaction(|txn| {
            let deleted: Vec<FeatureId> = buffer.deleted.iter().copied().collect();
            self.source.delete_features_in(txn, &deleted)?;
            self.source
                .change_attribute_values_in(txn, &buffer.changed_attributes)?;
            if !buffer.changed_geometries.is_empty() {
                self.source
                    .change_geometry_values_in(txn, &buffer.changed_geometries)?;
            }
            self.source.add_features_in(txn, &mut added)
        })?;
        Ok(added.len())
    }

    /// Discard the session's edits and close it
    ///
    /// # Errors
    ///
    /// `InvalidOperation` outside an edit session.
    pub fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, EditState::Idle) {
            EditState::Idle => Err(not_editing()),
            EditState::Buffered(buffer) => {
                warn!(
                    target: "geostrata::txn",
                    added = buffer.added.len(),
                    deleted = buffer.deleted.len(),
                    "Buffered edits discarded"
                );
                Ok(())
            }
            EditState::Transaction(mut txn) => {
                if txn.is_active() {
                    self.source.connection().rollback(&mut txn, "edit session rolled back")?;
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for VectorLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorLayer")
            .field("relation", &self.source.relation())
            .field("defaults_mode", &self.defaults_mode())
            .field("edit_mode", &self.edit_mode())
            .finish()
    }
}

fn not_editing() -> Error {
    Error::invalid_operation("layer is not being edited")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use geostrata_core::{ColumnDef, RelationRef, Storage, TableDef};
    use geostrata_storage::Database;

    const CLAUSE: &str = "nextval('qgis_test.\"someData_pk_seq\"'::regclass)";
    const URI: &str = "key='pk' table=\"qgis_test\".\"someData\" sql=";

    fn connection() -> Arc<Connection> {
        let db = Database::new();
        db.create_schema("qgis_test");
        db.create_table(
            &TableDef::new("qgis_test", "someData")
                .column(ColumnDef::new("pk", "serial"))
                .column(ColumnDef::new("cnt", "int4"))
                .column(ColumnDef::new("name", "text").default_expr("'qgis'::text"))
                .column(ColumnDef::new("name2", "text").default_expr("'qgis'::text"))
                .column(ColumnDef::new("num_char", "text"))
                .column(ColumnDef::new("comment", "text"))
                .primary_key(["pk"]),
        )
        .unwrap();
        let rel = RelationRef::table("qgis_test", "someData");
        for (pk, cnt, name) in [(1, 100, "Orange"), (2, 200, "Apple"), (3, 300, "Pear"), (4, 400, "Honey")] {
            db.insert(
                &rel,
                &[
                    ("pk", Some(pk.to_string())),
                    ("cnt", Some(cnt.to_string())),
                    ("name", Some(name.to_string())),
                ],
            )
            .unwrap();
        }
        Connection::new(db)
    }

    fn layer() -> VectorLayer {
        VectorLayer::new(FeatureSource::open(&connection(), URI))
    }

    fn pks(layer: &VectorLayer) -> Vec<Value> {
        layer
            .get_features(&FeatureRequest::new())
            .unwrap()
            .map(|f| f.unwrap().attribute(0).cloned().unwrap())
            .collect()
    }

    #[test]
    fn test_create_feature_priorities() {
        let layer = layer();
        let supplied = BTreeMap::from([(1, Value::Int(5)), (3, Value::String("map".into()))]);
        let feature = layer.create_feature(&supplied).unwrap();
        assert_eq!(
            feature.attributes(),
            &[
                Value::String(CLAUSE.into()),
                Value::Int(5),
                Value::String("'qgis'::text".into()),
                Value::String("'qgis'::text".into()),
                Value::Unset,
                Value::Unset,
            ]
        );

        layer.set_default_value_expression(3, Some("'mappy'")).unwrap();
        let feature = layer.create_feature(&supplied).unwrap();
        assert_eq!(feature.attribute(3), Some(&Value::String("mappy".into())));
    }

    #[test]
    fn test_create_feature_adjusts_unique_values() {
        let layer = layer();
        layer.set_field_constraint(1, Constraint::Unique);
        layer.set_field_constraint(4, Constraint::Unique);
        let supplied = BTreeMap::from([(1, Value::Int(100)), (4, Value::String("x".into()))]);
        let feature = layer.create_feature(&supplied).unwrap();
        assert_eq!(feature.attribute(1), Some(&Value::Int(401)));
        assert_eq!(feature.attribute(4), Some(&Value::String("x".into())));

        layer.set_default_value_expression(4, Some("'Apple'")).unwrap();
        layer.set_field_constraint(2, Constraint::Unique);
        layer.set_default_value_expression(2, Some("'Apple'")).unwrap();
        let feature = layer.create_feature(&BTreeMap::new()).unwrap();
        assert_eq!(feature.attribute(2), Some(&Value::String("Apple_1".into())));
    }

    #[test]
    fn test_client_constraints_are_additive() {
        let layer = layer();
        assert_eq!(
            layer.field_constraints(0).origin(Constraint::Unique),
            Some(ConstraintOrigin::Store)
        );
        layer.set_field_constraint(0, Constraint::Unique);
        assert_eq!(
            layer.field_constraints(0).origin(Constraint::Unique),
            Some(ConstraintOrigin::Store)
        );
        layer.remove_field_constraint(0, Constraint::Unique);
        assert!(layer.field_constraints(0).contains(Constraint::Unique));

        layer.set_field_constraint(1, Constraint::NotNull);
        assert_eq!(
            layer.fields().at(1).unwrap().constraints.origin(Constraint::NotNull),
            Some(ConstraintOrigin::Client)
        );
        layer.remove_field_constraint(1, Constraint::NotNull);
        assert!(layer.field_constraints(1).is_empty());
        assert!(layer.source().fields().at(1).unwrap().constraints.is_empty());
    }

    #[test]
    fn test_value_exists_and_validation_with_buffer() {
        let layer = layer();
        assert!(layer.value_exists(0, &Value::Int(4)).unwrap());
        assert!(!layer.value_exists(0, &Value::Int(5)).unwrap());

        layer.start_editing(EditMode::Buffered).unwrap();
        let feature = layer.create_feature(&BTreeMap::new()).unwrap();
        let fid = layer.add_feature(feature.clone()).unwrap();
        assert!(fid.is_temporary());
        assert!(layer.value_exists(0, &Value::String(CLAUSE.into())).unwrap());
        let mut feature = feature;
        feature.set_id(fid);
        assert_eq!(layer.validate_attribute(&feature, 0).unwrap(), (true, vec![]));

        let mut duplicate = feature.clone();
        duplicate.set_id(FeatureId::NULL);
        duplicate.set_attribute(0, Value::Int(2));
        let (valid, errors) = layer.validate_attribute(&duplicate, 0).unwrap();
        assert!(!valid);
        assert_eq!(errors, vec!["value is not unique".to_string()]);

        duplicate.set_attribute(0, Value::Null);
        let (valid, errors) = layer.validate_attribute(&duplicate, 0).unwrap();
        assert!(!valid);
        assert_eq!(errors, vec!["value is NULL".to_string()]);
        layer.rollback().unwrap();
    }

    #[test]
    fn test_buffered_session_commit() {
        let layer = layer();
        assert!(layer.add_feature(Feature::new(layer.source().fields())).is_err());
        layer.start_editing(EditMode::Buffered).unwrap();
        assert!(layer.start_editing(EditMode::Transaction).is_err());

        let feature = layer.create_feature(&BTreeMap::from([(1, Value::Int(-200))])).unwrap();
        layer.add_feature(feature).unwrap();
        layer.delete_feature(FeatureId(1)).unwrap();
        layer.change_attribute_value(FeatureId(2), 1, Value::Int(222)).unwrap();

        assert_eq!(pks(&layer), vec![Value::Int(2), Value::Int(3), Value::Int(4), Value::String(CLAUSE.into())]);
        assert_eq!(layer.source().feature_count().unwrap(), 4);
        assert_eq!(layer.maximum_value(1).unwrap(), Value::Int(400));
        assert_eq!(layer.minimum_value(1).unwrap(), Value::Int(-200));

        layer.commit_changes().unwrap();
        assert!(!layer.is_editing());
        assert_eq!(pks(&layer), vec![Value::Int(2), Value::Int(3), Value::Int(4), Value::Int(5)]);
        let changed = layer.get_feature(FeatureId(2)).unwrap().unwrap();
        assert_eq!(changed.attribute(1), Some(&Value::Int(222)));
    }

    #[test]
    fn test_buffered_add_without_geometry_column() {
        let layer = layer();
        assert!(layer.source().geometry_column().is_none());
        layer.start_editing(EditMode::Buffered).unwrap();
        let feature = layer.create_feature(&BTreeMap::from([(1, Value::Int(500))])).unwrap();
        layer.add_feature(feature).unwrap();
        layer.commit_changes().unwrap();

        assert_eq!(layer.source().feature_count().unwrap(), 5);
        assert_eq!(layer.maximum_value(1).unwrap(), Value::Int(500));
    }

    #[test]
    fn test_buffered_session_rollback() {
        let layer = layer();
        layer.start_editing(EditMode::Buffered).unwrap();
        layer.delete_feature(FeatureId(3)).unwrap();
        assert_eq!(pks(&layer).len(), 3);
        layer.rollback().unwrap();
        assert_eq!(pks(&layer).len(), 4);
        assert!(layer.rollback().is_err());
    }

    #[test]
    fn test_buffered_filters_apply_to_edits() {
        let layer = layer();
        layer.start_editing(EditMode::Buffered).unwrap();
        layer.change_attribute_value(FeatureId(1), 1, Value::Int(1000)).unwrap();
        let request = FeatureRequest::new().with_filter_expression("\"cnt\" > 350").unwrap();
        let ids: Vec<FeatureId> = layer
            .get_features(&request)
            .unwrap()
            .map(|f| f.unwrap().id())
            .collect();
        assert_eq!(ids, vec![FeatureId(1), FeatureId(4)]);
    }

    #[test]
    fn test_transaction_session_nested_insert() {
        let layer = layer();
        layer.start_editing(EditMode::Transaction).unwrap();
        let mut seen = 0;
        for feature in layer.get_features(&FeatureRequest::new()).unwrap() {
            feature.unwrap();
            seen += 1;
            if seen == 1 {
                let mut new = Feature::new(layer.source().fields());
                new.set_attribute(0, Value::Null);
                new.set_attribute(1, Value::Int(7));
                let fid = layer.add_feature(new).unwrap();
                assert_eq!(fid, FeatureId(5));
            }
        }
        assert_eq!(seen, 4);
        assert_eq!(pks(&layer).len(), 5);
        assert_eq!(layer.source().feature_count().unwrap(), 4);

        layer.commit_changes().unwrap();
        assert_eq!(layer.source().feature_count().unwrap(), 5);
    }

    #[test]
    fn test_transaction_session_rollback() {
        let layer = layer();
        layer.start_editing(EditMode::Transaction).unwrap();
        layer.delete_feature(FeatureId(2)).unwrap();
        assert_eq!(pks(&layer).len(), 3);
        layer.rollback().unwrap();
        assert_eq!(pks(&layer).len(), 4);
        assert_eq!(layer.source().connection().metrics().aborted, 1);
    }
}
