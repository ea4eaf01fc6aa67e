//! Feature sources
//!
//! A `FeatureSource` is one relation of a store seen through a data source
//! descriptor: its field list, its key and geometry column, and the
//! optional `sql=` filter that restricts it. Opening never fails; a source
//! that cannot be used records why, and every operation on it then returns
//! `InvalidSource`.
//!
//! Reads (`get_features`, the aggregates) each take a fresh snapshot.
//! The `_in` variants read through a caller-supplied transaction and see
//! its uncommitted writes. Mutations live in `mutation`, schema queries in
//! `schema`.

use crate::compiler::{self, Compiled};
use crate::connection::Connection;
use crate::expression::{compare_values, Expression};
use crate::iterator::{FeatureIterator, ScanPlan};
use crate::primary_key::{FidLookup, KeyKind, PrimaryKey};
use crate::request::{FeatureRequest, RequestFilter};
use crate::type_mapper;
use crate::uri::DataSourceUri;
use geostrata_concurrency::TransactionContext;
use geostrata_core::{
    Constraint, ConstraintOrigin, Error, Feature, FeatureId, Fields, Predicate, Rect, RelationInfo, RelationRef,
    Result, Storage, TypeKind, Value,
};
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Field list of a source and where each field lives in the relation
#[derive(Debug)]
pub(crate) struct Layout {
    pub info: RelationInfo,
    pub fields: Arc<Fields>,
    /// Relation column index of each field
    pub columns: Vec<usize>,
    /// Relation column index of the geometry column
    pub geometry: Option<usize>,
}

impl Layout {
    pub(crate) fn load(storage: &dyn Storage, relation: &RelationRef, uri: &DataSourceUri) -> Result<Self> {
        let info = storage.describe(relation).map_err(|e| match e {
            Error::NotFound(msg) => Error::invalid_source(msg),
            other => other,
        })?;

        let geometry = match &uri.geometry_column {
            Some(name) => {
                let index = info.column_index(name).ok_or_else(|| {
                    Error::invalid_source(format!("geometry column \"{}\" does not exist in {}", name, relation))
                })?;
                if !matches!(info.columns[index].kind, TypeKind::Geometry { .. }) {
                    return Err(Error::invalid_source(format!(
                        "column \"{}\" of {} is not a geometry column",
                        name, relation
                    )));
                }
                Some(index)
            }
            None => None,
        };

        let mut fields = Vec::with_capacity(info.columns.len());
        let mut columns = Vec::with_capacity(info.columns.len());
        for (index, column) in info.columns.iter().enumerate() {
            if Some(index) == geometry {
                continue;
            }
            let Some(mut field) = type_mapper::map_column(column) else {
                continue;
            };
            if info.is_column_unique(index) {
                field.constraints.set_constraint(Constraint::Unique, ConstraintOrigin::Store);
            }
            fields.push(field);
            columns.push(index);
        }

        Ok(Layout {
            info,
            fields: Arc::new(Fields::from_vec(fields)),
            columns,
            geometry,
        })
    }

    /// Relation column name of a field
    pub(crate) fn column_name(&self, field: usize) -> Option<&str> {
        self.columns
            .get(field)
            .and_then(|c| self.info.columns.get(*c))
            .map(|c| c.name.as_str())
    }

    pub(crate) fn geometry_name(&self) -> Option<&str> {
        self.geometry
            .and_then(|c| self.info.columns.get(c))
            .map(|c| c.name.as_str())
    }
}

/// State of a source that opened successfully
#[derive(Debug)]
pub(crate) struct SourceState {
    pub relation: RelationRef,
    pub layout: RwLock<Arc<Layout>>,
    pub key: Arc<PrimaryKey>,
    /// `sql=` filter of the descriptor
    pub filter: Option<Expression>,
}

impl SourceState {
    pub(crate) fn layout(&self) -> Arc<Layout> {
        Arc::clone(&self.layout.read())
    }
}

/// One relation of a store, opened through a data source descriptor
#[derive(Debug)]
pub struct FeatureSource {
    conn: Arc<Connection>,
    uri: DataSourceUri,
    state: std::result::Result<SourceState, String>,
}

impl FeatureSource {
    /// Open a source from descriptor text
    ///
    /// Always returns a source; check `is_valid()` and `error()`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let source = FeatureSource::open(&conn, "key='pk' srid=4326 table=\"qgis_test\".\"someData\" (geom)");
    /// assert!(source.is_valid());
    /// ```
    pub fn open(conn: &Arc<Connection>, uri: &str) -> Self {
        match DataSourceUri::parse(uri) {
            Ok(parsed) => Self::open_uri(conn, parsed),
            Err(e) => {
                warn!(target: "geostrata::provider", uri, error = %e, "Invalid data source");
                FeatureSource {
                    conn: Arc::clone(conn),
                    uri: DataSourceUri::default(),
                    state: Err(e.to_string()),
                }
            }
        }
    }

    /// Open a source from a parsed descriptor
    pub fn open_uri(conn: &Arc<Connection>, uri: DataSourceUri) -> Self {
        let state = Self::load(conn.storage(), &uri).map_err(|e| {
            warn!(target: "geostrata::provider", uri = %uri, error = %e, "Invalid data source");
            e.to_string()
        });
        if let Ok(state) = &state {
            debug!(
                target: "geostrata::provider",
                relation = %state.relation,
                fields = state.layout.read().fields.len(),
                key = ?state.key.kind(),
                "Source opened"
            );
        }
        FeatureSource {
            conn: Arc::clone(conn),
            uri,
            state,
        }
    }

    fn load(storage: &dyn Storage, uri: &DataSourceUri) -> Result<SourceState> {
        let relation = uri.relation()?.clone();
        let layout = Layout::load(storage, &relation, uri)?;
        let key = PrimaryKey::resolve(&layout.info, uri, storage)?;
        let filter = match uri.sql.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                let expression = Expression::parse(text).map_err(|e| Error::invalid_source(e.to_string()))?;
                for column in expression.referenced_columns() {
                    if layout.fields.lookup_field(&column).is_none() {
                        return Err(Error::invalid_source(format!(
                            "filter references unknown field \"{}\"",
                            column
                        )));
                    }
                }
                Some(expression)
            }
            _ => None,
        };
        Ok(SourceState {
            relation,
            layout: RwLock::new(Arc::new(layout)),
            key: Arc::new(key),
            filter,
        })
    }

    pub(crate) fn state(&self) -> Result<&SourceState> {
        self.state
            .as_ref()
            .map_err(|msg| Error::invalid_source(msg.clone()))
    }

    // === Properties ===

    /// True when the source opened successfully
    pub fn is_valid(&self) -> bool {
        self.state.is_ok()
    }

    /// Why the source is invalid
    pub fn error(&self) -> Option<&str> {
        self.state.as_ref().err().map(String::as_str)
    }

    /// The connection this source reads through
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Descriptor the source was opened with
    pub fn uri(&self) -> &DataSourceUri {
        &self.uri
    }

    /// Relation read by this source
    pub fn relation(&self) -> Option<&RelationRef> {
        self.state.as_ref().ok().map(|s| &s.relation)
    }

    /// Current field list; empty for an invalid source
    pub fn fields(&self) -> Arc<Fields> {
        match &self.state {
            Ok(state) => Arc::clone(&state.layout.read().fields),
            Err(_) => Arc::new(Fields::new()),
        }
    }

    /// How feature ids are derived
    pub fn key_kind(&self) -> Option<KeyKind> {
        self.state.as_ref().ok().map(|s| s.key.kind())
    }

    /// Name of the geometry column, if the source has one
    pub fn geometry_column(&self) -> Option<String> {
        let state = self.state.as_ref().ok()?;
        let layout = state.layout.read();
        layout.geometry_name().map(str::to_string)
    }

    /// Spatial reference of the geometries
    pub fn srid(&self) -> Option<i32> {
        self.uri.srid.or_else(|| {
            let state = self.state.as_ref().ok()?;
            let layout = state.layout.read();
            match layout.geometry.map(|c| &layout.info.columns[c].kind) {
                Some(TypeKind::Geometry { srid, .. }) => *srid,
                _ => None,
            }
        })
    }

    /// True when the store accepts writes to this relation
    pub fn is_writable(&self) -> bool {
        self.state.as_ref().map_or(false, |s| {
            s.layout.read().info.writable && s.key.kind() != KeyKind::Keyless
        })
    }

    /// Field indexes of the key columns, in key order
    ///
    /// # Errors
    ///
    /// `InvalidSource` for an invalid source.
    pub fn primary_key_attributes(&self) -> Result<Vec<usize>> {
        let state = self.state()?;
        let layout = state.layout();
        Ok(state.key.attribute_indexes(&layout.info, &layout.fields))
    }

    // === Reads ===

    /// Features matching a request, from a fresh snapshot
    ///
    /// # Errors
    ///
    /// `InvalidSource` for an invalid source, `NotFound` when the filter
    /// expression references an unknown field.
    pub fn get_features(&self, request: &FeatureRequest) -> Result<FeatureIterator> {
        let state = self.state()?;
        let plan = self.plan(state, request)?;
        let snapshot = self.conn.storage().snapshot();
        Ok(FeatureIterator::deferred(Arc::clone(&self.conn), plan, snapshot))
    }

    /// Features matching a request as `txn` sees them
    ///
    /// # Errors
    ///
    /// As `get_features`; also `TransactionNotActive` when `txn` finished.
    pub fn get_features_in(&self, txn: &TransactionContext, request: &FeatureRequest) -> Result<FeatureIterator> {
        let state = self.state()?;
        txn.ensure_active()?;
        let plan = self.plan(state, request)?;
        let relation = &state.relation;
        let rows = plan.fetch(
            &|p| txn.scan(relation, p),
            &|p, rows| txn.snapshot().filter(relation, p, rows),
        );
        Ok(FeatureIterator::materialized(Arc::clone(&self.conn), plan, rows))
    }

    /// One feature by id
    ///
    /// # Errors
    ///
    /// `InvalidSource` for an invalid source, or a decoding error.
    pub fn get_feature(&self, fid: FeatureId) -> Result<Option<Feature>> {
        self.get_features(&FeatureRequest::new().with_fid(fid))?
            .next()
            .transpose()
    }

    fn plan(&self, state: &SourceState, request: &FeatureRequest) -> Result<ScanPlan> {
        let layout = state.layout();
        let fields = &layout.fields;
        let config = self.conn.config();
        let compile_enabled = request.compile().unwrap_or(config.compile_expressions);

        let mut client_checks = Vec::new();
        let mut base = None;
        if let Some(filter) = &state.filter {
            let compiled = compiler::compile(filter, fields);
            base = compiled.predicate().cloned();
            if compiled.needs_client_check() {
                client_checks.push(filter.clone());
            }
        }

        let mut narrowing = Vec::new();
        let mut fids = None;
        match request.filter() {
            RequestFilter::None => {}
            RequestFilter::Expression(expression) => {
                for column in expression.referenced_columns() {
                    if fields.lookup_field(&column).is_none() {
                        return Err(Error::not_found(format!("field \"{}\" not found", column)));
                    }
                }
                let compiled = if compile_enabled {
                    compiler::compile(expression, fields)
                } else {
                    Compiled::None
                };
                debug!(
                    target: "geostrata::provider",
                    expression = expression.text(),
                    compiled = ?compiled,
                    "Filter compiled"
                );
                if let Some(p) = compiled.predicate() {
                    narrowing.push(p.clone());
                }
                if compiled.needs_client_check() {
                    client_checks.push(expression.clone());
                }
            }
            RequestFilter::Fid(fid) => {
                let set: BTreeSet<FeatureId> = [*fid].into_iter().collect();
                if let Some(p) = fid_predicate(&state.key, &layout.info, &set) {
                    narrowing.push(p);
                }
                fids = Some(set);
            }
            RequestFilter::Fids(set) => {
                if let Some(p) = fid_predicate(&state.key, &layout.info, set) {
                    narrowing.push(p);
                }
                fids = Some(set.clone());
            }
        }

        if let (Some(rect), Some(column)) = (request.rect(), layout.geometry_name()) {
            narrowing.push(Predicate::BboxIntersects {
                column: column.to_string(),
                rect: *rect,
            });
        }

        let decode = match request.subset() {
            None => (0..fields.len()).collect(),
            Some(subset) => {
                let mut wanted: BTreeSet<usize> = subset.iter().copied().filter(|i| *i < fields.len()).collect();
                for check in &client_checks {
                    wanted.extend(check.referenced_columns().iter().filter_map(|c| fields.lookup_field(c)));
                }
                wanted.into_iter().collect()
            }
        };

        Ok(ScanPlan {
            relation: state.relation.clone(),
            layout: Arc::clone(&layout),
            key: Arc::clone(&state.key),
            numbered: state.key.kind() == KeyKind::Keyless,
            base,
            narrowing: (!narrowing.is_empty()).then(|| Predicate::and(narrowing)),
            client_checks,
            fids,
            decode,
            keep: request.subset().map(|s| s.to_vec()),
            geometry: !request.skips_geometry() && layout.geometry.is_some(),
            srid: self.srid(),
            limit: request.limit(),
            fetch_size: config.fetch_size,
        })
    }

    // === Aggregates ===

    /// Number of features in the source
    ///
    /// # Errors
    ///
    /// `InvalidSource` for an invalid source.
    pub fn feature_count(&self) -> Result<usize> {
        let request = FeatureRequest::new().with_subset(Vec::new()).no_geometry();
        let mut count = 0;
        for feature in self.get_features(&request)? {
            feature?;
            count += 1;
        }
        Ok(count)
    }

    /// Bounding box of every geometry, `None` when there is none
    ///
    /// # Errors
    ///
    /// `InvalidSource` for an invalid source.
    pub fn extent(&self) -> Result<Option<Rect>> {
        let request = FeatureRequest::new().with_subset(Vec::new());
        let mut extent: Option<Rect> = None;
        for feature in self.get_features(&request)? {
            if let Some(envelope) = feature?.geometry().and_then(|g| g.envelope()) {
                extent = Some(match extent {
                    Some(e) => e.combine(&envelope),
                    None => envelope,
                });
            }
        }
        Ok(extent)
    }

    /// Distinct values of a field, NULL first then ascending, at most
    /// `limit` of them
    ///
    /// # Errors
    ///
    /// `InvalidSource` for an invalid source, `NotFound` for an index out
    /// of range.
    pub fn unique_values(&self, index: usize, limit: Option<usize>) -> Result<Vec<Value>> {
        let mut seen = FxHashSet::default();
        let mut values = Vec::new();
        for value in self.field_values(index)? {
            let value = value?;
            if seen.insert(format!("{}:{}", value.type_name(), value)) {
                values.push(value);
            }
        }
        values.sort_by(|a, b| match (a.is_empty(), b.is_empty()) {
            (true, true) => std::cmp::Ordering::Equal,
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            (false, false) => compare_values(a, b).unwrap_or(std::cmp::Ordering::Equal),
        });
        if let Some(limit) = limit {
            values.truncate(limit);
        }
        Ok(values)
    }

    /// Smallest non-null value of a field
    ///
    /// # Errors
    ///
    /// As `unique_values`.
    pub fn min_value(&self, index: usize) -> Result<Value> {
        self.extreme_value(index, std::cmp::Ordering::Less)
    }

    /// Largest non-null value of a field
    ///
    /// # Errors
    ///
    /// As `unique_values`.
    pub fn max_value(&self, index: usize) -> Result<Value> {
        self.extreme_value(index, std::cmp::Ordering::Greater)
    }

    fn extreme_value(&self, index: usize, wanted: std::cmp::Ordering) -> Result<Value> {
        let mut best: Option<Value> = None;
        for value in self.field_values(index)? {
            let value = value?;
            if value.is_empty() {
                continue;
            }
            best = match best {
                Some(current) if compare_values(&value, &current) != Some(wanted) => Some(current),
                _ => Some(value),
            };
        }
        Ok(best.unwrap_or(Value::Null))
    }

    fn field_values(&self, index: usize) -> Result<impl Iterator<Item = Result<Value>>> {
        if index >= self.fields().len() {
            return Err(Error::not_found(format!("field index {} out of range", index)));
        }
        let request = FeatureRequest::new().with_subset(vec![index]).no_geometry();
        Ok(self
            .get_features(&request)?
            .map(move |f| f.map(|f| f.attribute(index).cloned().unwrap_or(Value::Null))))
    }

    // === Mutation support ===

    /// Rows of a feature as `txn` sees them
    pub(crate) fn rows_for(
        &self,
        state: &SourceState,
        layout: &Layout,
        txn: &TransactionContext,
        fid: FeatureId,
    ) -> Result<Vec<geostrata_core::StoredRow>> {
        match state.key.lookup(fid, &layout.info) {
            FidLookup::Predicate(p) => Ok(txn
                .scan(&state.relation, Some(&p))?
                .into_iter()
                .filter(|row| state.key.fid_for_row(row, 0) == fid)
                .collect()),
            FidLookup::Ordinal(_) => Err(Error::invalid_operation(format!(
                "{} has no key columns and cannot be edited",
                state.relation
            ))),
            FidLookup::Missing => Ok(Vec::new()),
        }
    }

    pub(crate) fn reload_layout(&self) -> Result<()> {
        let state = self.state()?;
        let layout = Layout::load(self.conn.storage(), &state.relation, &self.uri)?;
        *state.layout.write() = Arc::new(layout);
        Ok(())
    }
}

/// Store predicate selecting a set of feature ids, when every id maps to
/// key values
fn fid_predicate(key: &PrimaryKey, info: &RelationInfo, fids: &BTreeSet<FeatureId>) -> Option<Predicate> {
    let mut terms = Vec::with_capacity(fids.len());
    for fid in fids {
        match key.lookup(*fid, info) {
            FidLookup::Predicate(p) => terms.push(p),
            FidLookup::Missing => {}
            FidLookup::Ordinal(_) => return None,
        }
    }
    match terms.len() {
        0 => None,
        1 => terms.pop(),
        _ => Some(Predicate::Or(terms)),
    }
}
