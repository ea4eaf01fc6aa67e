//! Database: the in-memory relational geometry store
//!
//! This module implements the Storage trait using:
//! - a `Catalog` of schemas, tables, views, query relations and user types
//! - per-table MVCC version chains (`TableRows`)
//! - `parking_lot::RwLock` for the catalog and row map
//! - `AtomicU64` for the commit version and physical row ids
//! - a commit `Mutex` serializing validate → check → apply
//!
//! # Lock order
//!
//! catalog before rows, always. The commit lock is taken before both.
//! Snapshot scans hold the read locks only while materializing rows, so an
//! open cursor never blocks a writer.
//!
//! # Inheritance
//!
//! A child table starts with its parent's columns. Scanning the parent
//! includes child rows projected to the parent's columns. Unique and
//! primary-key constraints are enforced per physical table only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::{debug, info};

use geostrata_core::predicate::Predicate;
use geostrata_core::{
    ConstraintKind, DatabaseId, Datum, Error, RelationInfo, RelationRef, Result, RowId,
    RowWrite, SnapshotView, Storage, StoredRow, TableDef, WriteBatch,
};

use crate::catalog::{Catalog, ColumnMeta, Entry, QueryBody, QueryMeta, TableKey, TableMeta, ViewMeta};
use crate::column_type::ColumnType;
use crate::defaults;
use crate::eval::RowLayout;
use crate::rows::TableRows;
use crate::sequences::Sequences;
use crate::snapshot::DatabaseSnapshot;

/// State shared by a database and its snapshots
#[derive(Debug)]
pub(crate) struct Shared {
    id: DatabaseId,
    catalog: RwLock<Catalog>,
    rows: RwLock<FxHashMap<TableKey, TableRows>>,
    version: AtomicU64,
    next_row_id: AtomicU64,
    sequences: Sequences,
    commit_lock: Mutex<()>,
}

/// In-memory relational geometry store
///
/// Cloning is cheap and yields another handle to the same store.
///
/// # Example
///
/// ```ignore
/// let db = Database::new();
/// db.create_schema("qgis_test");
/// db.create_table(&TableDef::new("qgis_test", "bikes")
///     .column(ColumnDef::new("pk", "serial"))
///     .primary_key(["pk"]))?;
/// db.insert(&RelationRef::table("qgis_test", "bikes"), &[])?;
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    inner: Arc<Shared>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

fn key_of(relation: &RelationRef) -> Result<TableKey> {
    match relation {
        RelationRef::Table { schema, name } => Ok((schema.clone(), name.clone())),
        RelationRef::Query(_) => Err(Error::invalid_operation("query relations are read-only")),
    }
}

fn type_error(relation: &RelationRef, column: &str, message: String) -> Error {
    Error::constraint(
        ConstraintKind::Type,
        relation.to_string(),
        format!("column \"{}\": {}", column, message),
    )
}

fn not_null_error(relation: &RelationRef, column: &str) -> Error {
    Error::constraint(
        ConstraintKind::NotNull,
        relation.to_string(),
        format!("null value in column \"{}\" violates not-null constraint", column),
    )
}

fn owned_layout(columns: &[ColumnMeta]) -> Vec<(String, ColumnType)> {
    columns.iter().map(|c| (c.name.clone(), c.ty.clone())).collect()
}

fn layout(columns: &[(String, ColumnType)]) -> RowLayout<'_> {
    RowLayout::new(columns.iter().map(|(n, t)| (n.as_str(), t)).collect())
}

/// Writable column list of a relation, with the physical column index
/// each one maps to
struct WriteTarget {
    base: TableKey,
    columns: Vec<(usize, ColumnMeta)>,
    base_width: usize,
}

impl Shared {
    pub(crate) fn id(&self) -> DatabaseId {
        self.id
    }

    pub(crate) fn current_version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Rows of a table family visible at `version`, truncated to `width`
    /// columns, in row id order
    fn family_rows(
        catalog: &Catalog,
        rows: &FxHashMap<TableKey, TableRows>,
        key: &TableKey,
        width: usize,
        version: u64,
    ) -> Vec<StoredRow> {
        let mut out: Vec<StoredRow> = Vec::new();
        for member in catalog.family(key) {
            if let Some(table) = rows.get(&member) {
                out.extend(table.visible(version).map(|(row_id, values)| StoredRow {
                    row_id,
                    values: values.iter().take(width).cloned().collect(),
                }));
            }
        }
        out.sort_by_key(|r| r.row_id);
        out
    }

    fn filter_rows(
        rows: Vec<StoredRow>,
        predicate: Option<&Predicate>,
        columns: &[(String, ColumnType)],
    ) -> Result<Vec<StoredRow>> {
        let Some(predicate) = predicate else {
            return Ok(rows);
        };
        let layout = layout(columns);
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            if layout.matches(predicate, &row.values)? {
                out.push(row);
            }
        }
        Ok(out)
    }

    /// Materialize a relation's rows at `version`
    pub(crate) fn scan_at(
        &self,
        version: u64,
        relation: &RelationRef,
        predicate: Option<&Predicate>,
    ) -> Result<Vec<StoredRow>> {
        let catalog = self.catalog.read();
        let rows = self.rows.read();
        match catalog.entry(relation)? {
            Entry::Table(key, meta) => {
                let raw = Self::family_rows(&catalog, &rows, key, meta.columns.len(), version);
                Self::filter_rows(raw, predicate, &owned_layout(&meta.columns))
            }
            Entry::View(view) => {
                let base = catalog
                    .table(&view.base)
                    .ok_or_else(|| Error::storage(format!("view base \"{}\" is missing", view.base.1)))?;
                let raw = Self::family_rows(&catalog, &rows, &view.base, base.columns.len(), version);
                let projected = raw
                    .into_iter()
                    .map(|r| StoredRow {
                        row_id: r.row_id,
                        values: view.columns.iter().map(|(i, _)| r.values[*i].clone()).collect(),
                    })
                    .collect();
                let columns: Vec<(String, ColumnType)> = view
                    .columns
                    .iter()
                    .map(|(i, name)| (name.clone(), base.columns[*i].ty.clone()))
                    .collect();
                Self::filter_rows(projected, predicate, &columns)
            }
            Entry::Query(query) => {
                let produced = match &query.body {
                    QueryBody::Values(values) => values
                        .iter()
                        .enumerate()
                        .map(|(i, v)| StoredRow {
                            row_id: RowId(i as u64 + 1),
                            values: v.clone(),
                        })
                        .collect(),
                    QueryBody::Select {
                        base,
                        columns,
                        filter,
                    } => {
                        let meta = catalog.table(base).ok_or_else(|| {
                            Error::storage(format!("query base \"{}\" is missing", base.1))
                        })?;
                        let raw = Self::family_rows(&catalog, &rows, base, meta.columns.len(), version);
                        let raw = Self::filter_rows(raw, filter.as_ref(), &owned_layout(&meta.columns))?;
                        raw.into_iter()
                            .map(|r| StoredRow {
                                row_id: r.row_id,
                                values: columns.iter().map(|i| r.values[*i].clone()).collect(),
                            })
                            .collect()
                    }
                };
                Self::filter_rows(produced, predicate, &owned_layout(&query.columns))
            }
        }
    }

    /// Evaluate `predicate` over rows that are not in the store yet
    pub(crate) fn filter_staged(
        &self,
        relation: &RelationRef,
        predicate: &Predicate,
        rows: Vec<StoredRow>,
    ) -> Result<Vec<StoredRow>> {
        let catalog = self.catalog.read();
        let columns = match catalog.entry(relation)? {
            Entry::Table(_, meta) => owned_layout(&meta.columns),
            Entry::View(view) => {
                let base = catalog
                    .table(&view.base)
                    .ok_or_else(|| Error::storage(format!("view base \"{}\" is missing", view.base.1)))?;
                view.columns
                    .iter()
                    .map(|(i, name)| (name.clone(), base.columns[*i].ty.clone()))
                    .collect()
            }
            Entry::Query(query) => owned_layout(&query.columns),
        };
        Self::filter_rows(rows, Some(predicate), &columns)
    }

    /// Commit version of a row at `version`, `None` when absent or deleted
    pub(crate) fn row_version_at(
        &self,
        version: u64,
        relation: &RelationRef,
        row_id: RowId,
    ) -> Result<Option<u64>> {
        let catalog = self.catalog.read();
        let rows = self.rows.read();
        let base = match catalog.entry(relation)? {
            Entry::Table(key, _) => key.clone(),
            Entry::View(view) => view.base.clone(),
            Entry::Query(_) => return Ok(None),
        };
        for member in catalog.family(&base) {
            if let Some(v) = rows
                .get(&member)
                .and_then(|t| t.chain(row_id))
                .and_then(|c| c.at_version(version))
            {
                return Ok(v.values.as_ref().map(|_| v.version));
            }
        }
        Ok(None)
    }

    fn write_target(catalog: &Catalog, relation: &RelationRef) -> Result<WriteTarget> {
        match catalog.entry(relation)? {
            Entry::Table(key, meta) => Ok(WriteTarget {
                base: key.clone(),
                columns: meta.columns.iter().cloned().enumerate().collect(),
                base_width: meta.columns.len(),
            }),
            Entry::View(view) => {
                let base = catalog
                    .table(&view.base)
                    .ok_or_else(|| Error::storage(format!("view base \"{}\" is missing", view.base.1)))?;
                Ok(WriteTarget {
                    base: view.base.clone(),
                    columns: view
                        .columns
                        .iter()
                        .map(|(i, name)| {
                            let mut col = base.columns[*i].clone();
                            col.name = name.clone();
                            (*i, col)
                        })
                        .collect(),
                    base_width: base.columns.len(),
                })
            }
            Entry::Query(_) => Err(Error::invalid_operation(format!(
                "cannot modify query relation {}",
                relation
            ))),
        }
    }

    fn evaluate_column_default(&self, relation: &RelationRef, column: &ColumnMeta) -> Result<Datum> {
        match &column.default_expr {
            None => Ok(None),
            Some(expr) => match defaults::evaluate(expr, &column.ty, &self.sequences)? {
                None => Ok(None),
                Some(text) => column
                    .ty
                    .coerce(&text)
                    .map(Some)
                    .map_err(|m| type_error(relation, &column.name, m)),
            },
        }
    }

    fn coerce_value(relation: &RelationRef, column: &ColumnMeta, value: &Datum) -> Result<Datum> {
        match value {
            None => Ok(None),
            Some(text) => column
                .ty
                .coerce(text)
                .map(Some)
                .map_err(|m| type_error(relation, &column.name, m)),
        }
    }

    fn prepare_insert(&self, relation: &RelationRef, values: &[(String, Datum)]) -> Result<StoredRow> {
        let target = {
            let catalog = self.catalog.read();
            Self::write_target(&catalog, relation)?
        };
        let mut provided: Vec<Option<&Datum>> = vec![None; target.columns.len()];
        for (name, value) in values {
            let idx = target
                .columns
                .iter()
                .position(|(_, c)| &c.name == name)
                .ok_or_else(|| {
                    Error::not_found(format!(
                        "column \"{}\" of relation {} does not exist",
                        name, relation
                    ))
                })?;
            if provided[idx].is_some() {
                return Err(Error::invalid_operation(format!(
                    "column \"{}\" specified more than once",
                    name
                )));
            }
            provided[idx] = Some(value);
        }

        let mut out = Vec::with_capacity(target.columns.len());
        for ((_, column), value) in target.columns.iter().zip(provided) {
            let datum = match value {
                Some(v) => Self::coerce_value(relation, column, v)?,
                None => self.evaluate_column_default(relation, column)?,
            };
            if datum.is_none() && column.effective_not_null() {
                return Err(not_null_error(relation, &column.name));
            }
            out.push(datum);
        }
        Ok(StoredRow {
            row_id: RowId(self.next_row_id.fetch_add(1, Ordering::Relaxed)),
            values: out,
        })
    }

    fn prepare_update(
        &self,
        relation: &RelationRef,
        current: &StoredRow,
        changes: &[(String, Datum)],
    ) -> Result<StoredRow> {
        let target = {
            let catalog = self.catalog.read();
            Self::write_target(&catalog, relation)?
        };
        if current.values.len() != target.columns.len() {
            return Err(Error::invalid_operation(format!(
                "row has {} values, relation {} has {} columns",
                current.values.len(),
                relation,
                target.columns.len()
            )));
        }
        let mut values = current.values.clone();
        for (name, value) in changes {
            let (idx, (_, column)) = target
                .columns
                .iter()
                .enumerate()
                .find(|(_, (_, c))| &c.name == name)
                .ok_or_else(|| {
                    Error::not_found(format!(
                        "column \"{}\" of relation {} does not exist",
                        name, relation
                    ))
                })?;
            let datum = Self::coerce_value(relation, column, value)?;
            if datum.is_none() && column.effective_not_null() {
                return Err(not_null_error(relation, &column.name));
            }
            values[idx] = datum;
        }
        Ok(StoredRow {
            row_id: current.row_id,
            values,
        })
    }

    fn commit(
        self: &Arc<Self>,
        batch: &WriteBatch,
        validate: &dyn Fn(&dyn SnapshotView) -> Result<()>,
    ) -> Result<u64> {
        let _commit = self.commit_lock.lock();
        let base_version = self.current_version();
        {
            let latest = DatabaseSnapshot::new(base_version, Arc::clone(self));
            validate(&latest)?;
        }
        if batch.is_empty() {
            return Ok(base_version);
        }

        let catalog = self.catalog.read();
        let mut rows = self.rows.write();

        // row id → (physical table, new state); later writes win
        let mut pending: FxHashMap<RowId, (TableKey, Option<Vec<Datum>>)> = FxHashMap::default();
        let mut order: Vec<RowId> = Vec::new();

        for write in batch.iter() {
            let relation = write.relation();
            let target = Self::write_target(&catalog, relation)?;
            let family = catalog.family(&target.base);
            let locate = |pending: &FxHashMap<RowId, (TableKey, Option<Vec<Datum>>)>,
                          row_id: RowId|
             -> Result<(TableKey, Vec<Datum>)> {
                if let Some((member, state)) = pending.get(&row_id) {
                    return state
                        .clone()
                        .map(|v| (member.clone(), v))
                        .ok_or_else(|| Error::not_found(format!("row {} was deleted", row_id.0)));
                }
                for member in &family {
                    if let Some(values) = rows
                        .get(member)
                        .and_then(|t| t.chain(row_id))
                        .and_then(|c| c.latest())
                        .and_then(|v| v.values.as_ref())
                    {
                        return Ok((member.clone(), values.as_ref().clone()));
                    }
                }
                Err(Error::not_found(format!(
                    "row {} of relation {} does not exist",
                    row_id.0, relation
                )))
            };

            match write {
                RowWrite::Insert { row, .. } => {
                    if row.values.len() != target.columns.len() {
                        return Err(Error::invalid_operation(format!(
                            "insert into {} has {} values for {} columns",
                            relation,
                            row.values.len(),
                            target.columns.len()
                        )));
                    }
                    let mut physical: Vec<Option<Datum>> = vec![None; target.base_width];
                    for ((idx, _), value) in target.columns.iter().zip(&row.values) {
                        physical[*idx] = Some(value.clone());
                    }
                    // columns hidden by a view take their defaults
                    let base_meta = catalog
                        .table(&target.base)
                        .ok_or_else(|| Error::storage("write target vanished"))?;
                    let mut values = Vec::with_capacity(target.base_width);
                    for (i, slot) in physical.into_iter().enumerate() {
                        let datum = match slot {
                            Some(v) => v,
                            None => {
                                let column = &base_meta.columns[i];
                                let d = self.evaluate_column_default(relation, column)?;
                                if d.is_none() && column.effective_not_null() {
                                    return Err(not_null_error(relation, &column.name));
                                }
                                d
                            }
                        };
                        values.push(datum);
                    }
                    if !pending.contains_key(&row.row_id) {
                        order.push(row.row_id);
                    }
                    pending.insert(row.row_id, (target.base.clone(), Some(values)));
                }
                RowWrite::Update { row, .. } => {
                    let (member, mut values) = locate(&pending, row.row_id)?;
                    for ((idx, _), value) in target.columns.iter().zip(&row.values) {
                        values[*idx] = value.clone();
                    }
                    if !pending.contains_key(&row.row_id) {
                        order.push(row.row_id);
                    }
                    pending.insert(row.row_id, (member, Some(values)));
                }
                RowWrite::Delete { row_id, .. } => {
                    let (member, _) = locate(&pending, *row_id)?;
                    if !pending.contains_key(row_id) {
                        order.push(*row_id);
                    }
                    pending.insert(*row_id, (member, None));
                }
            }
        }

        // unique and primary-key checks per touched physical table
        let touched: FxHashSet<&TableKey> = pending.values().map(|(k, _)| k).collect();
        for key in touched {
            let meta = catalog
                .table(key)
                .ok_or_else(|| Error::storage(format!("table \"{}\" vanished", key.1)))?;
            let overlay = || {
                let committed = rows
                    .get(key)
                    .into_iter()
                    .flat_map(|t| t.latest())
                    .filter(|(id, _)| !pending.contains_key(id))
                    .map(|(_, v)| v.as_slice());
                let staged = pending
                    .values()
                    .filter(|(k, _)| k == key)
                    .filter_map(|(_, v)| v.as_deref());
                committed.chain(staged)
            };
            let mut constraints: Vec<(String, &[usize])> = Vec::new();
            if !meta.primary_key.is_empty() {
                constraints.push((format!("{}_pkey", key.1), meta.primary_key.as_slice()));
            }
            for set in &meta.unique_sets {
                let cols: Vec<&str> = set.iter().map(|i| meta.columns[*i].name.as_str()).collect();
                constraints.push((format!("{}_{}_key", key.1, cols.join("_")), set.as_slice()));
            }
            for (name, set) in constraints {
                let mut seen: FxHashSet<SmallVec<[&str; 2]>> = FxHashSet::default();
                for values in overlay() {
                    let tuple: Option<SmallVec<[&str; 2]>> =
                        set.iter().map(|i| values[*i].as_deref()).collect();
                    if let Some(tuple) = tuple {
                        if !seen.insert(tuple) {
                            return Err(Error::constraint(
                                ConstraintKind::Unique,
                                format!("{}.{}", key.0, key.1),
                                format!("duplicate key value violates unique constraint \"{}\"", name),
                            ));
                        }
                    }
                }
            }
        }

        let version = base_version + 1;
        for row_id in order {
            if let Some((key, values)) = pending.remove(&row_id) {
                rows.entry(key).or_default().write(row_id, version, values);
            }
        }
        self.version.store(version, Ordering::Release);
        info!(target: "geostrata::storage", version, writes = batch.len(), "Commit applied");
        Ok(version)
    }

}

impl Database {
    /// Create an empty database with the `public` schema
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Shared {
                id: DatabaseId::new(),
                catalog: RwLock::new(Catalog::new()),
                rows: RwLock::new(FxHashMap::default()),
                version: AtomicU64::new(0),
                next_row_id: AtomicU64::new(1),
                sequences: Sequences::new(),
                commit_lock: Mutex::new(()),
            }),
        }
    }

    /// Create a schema (no-op when it exists)
    pub fn create_schema(&self, name: &str) {
        self.inner.catalog.write().create_schema(name);
        debug!(target: "geostrata::storage", schema = name, "Schema created");
    }

    /// Create a domain over a declared base type
    pub fn create_domain(&self, schema: &str, name: &str, base: &str, not_null: bool) -> Result<()> {
        let mut catalog = self.inner.catalog.write();
        let lookup = |s: &str, n: &str| catalog.lookup_type(s, n);
        let base = ColumnType::parse_declared(base, &lookup)?;
        let display = if schema == "public" {
            name.to_string()
        } else {
            format!("{}.{}", schema, name)
        };
        catalog.add_type(
            schema,
            name,
            ColumnType::Domain {
                name: display,
                base: Box::new(base.ty),
                not_null,
            },
        )
    }

    /// Create an enumerated type
    pub fn create_enum(&self, schema: &str, name: &str, labels: &[&str]) -> Result<()> {
        let display = if schema == "public" {
            name.to_string()
        } else {
            format!("{}.{}", schema, name)
        };
        self.inner.catalog.write().add_type(
            schema,
            name,
            ColumnType::Enum {
                name: display,
                labels: labels.iter().map(|l| l.to_string()).collect(),
            },
        )
    }

    /// Create an updatable view exposing `(base column, exposed name)`
    /// pairs; an empty list exposes every base column unchanged
    pub fn create_view(
        &self,
        schema: &str,
        name: &str,
        base: &RelationRef,
        columns: &[(&str, &str)],
    ) -> Result<()> {
        let base_key = key_of(base)?;
        let mut catalog = self.inner.catalog.write();
        let meta = catalog
            .table(&base_key)
            .ok_or_else(|| Error::not_found(format!("relation {} does not exist", base)))?;
        let mapped = if columns.is_empty() {
            meta.columns
                .iter()
                .enumerate()
                .map(|(i, c)| (i, c.name.clone()))
                .collect()
        } else {
            columns
                .iter()
                .map(|(col, exposed)| {
                    meta.columns
                        .iter()
                        .position(|c| c.name == *col)
                        .map(|i| (i, exposed.to_string()))
                        .ok_or_else(|| Error::not_found(format!("column \"{}\" does not exist", col)))
                })
                .collect::<Result<Vec<_>>>()?
        };
        catalog.insert_view(
            (schema.to_string(), name.to_string()),
            ViewMeta {
                base: base_key,
                columns: mapped,
            },
        )?;
        info!(target: "geostrata::storage", schema, view = name, "View created");
        Ok(())
    }

    /// Register a query relation with a fixed result set; `columns` are
    /// (name, declared type)
    pub fn register_query(&self, sql: &str, columns: &[(&str, &str)], rows: Vec<Vec<Datum>>) -> Result<()> {
        let mut catalog = self.inner.catalog.write();
        let metas = columns
            .iter()
            .map(|(name, decl)| {
                let lookup = |s: &str, n: &str| catalog.lookup_type(s, n);
                ColumnType::parse_declared(decl, &lookup).map(|d| ColumnMeta::new(*name, d.ty))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut coerced = Vec::with_capacity(rows.len());
        let relation = RelationRef::query(sql);
        for row in rows {
            if row.len() != metas.len() {
                return Err(Error::invalid_operation("query row width does not match its columns"));
            }
            coerced.push(
                metas
                    .iter()
                    .zip(&row)
                    .map(|(c, v)| Shared::coerce_value(&relation, c, v))
                    .collect::<Result<Vec<_>>>()?,
            );
        }
        catalog.insert_query(
            geostrata_core::relation::normalize_query(sql),
            QueryMeta {
                columns: metas,
                body: QueryBody::Values(coerced),
            },
        );
        Ok(())
    }

    /// Register a query relation reading `(base column, alias)` pairs of a
    /// table, optionally filtered
    pub fn register_select(
        &self,
        sql: &str,
        base: &RelationRef,
        columns: &[(&str, &str)],
        filter: Option<Predicate>,
    ) -> Result<()> {
        let base_key = key_of(base)?;
        let mut catalog = self.inner.catalog.write();
        let meta = catalog
            .table(&base_key)
            .ok_or_else(|| Error::not_found(format!("relation {} does not exist", base)))?;
        let mut indexes = Vec::with_capacity(columns.len());
        let mut metas = Vec::with_capacity(columns.len());
        for (col, alias) in columns {
            let i = meta
                .columns
                .iter()
                .position(|c| c.name == *col)
                .ok_or_else(|| Error::not_found(format!("column \"{}\" does not exist", col)))?;
            indexes.push(i);
            metas.push(ColumnMeta::new(*alias, meta.columns[i].ty.clone()));
        }
        catalog.insert_query(
            geostrata_core::relation::normalize_query(sql),
            QueryMeta {
                columns: metas,
                body: QueryBody::Select {
                    base: base_key,
                    columns: indexes,
                    filter,
                },
            },
        );
        Ok(())
    }

    /// Drop a table (inheriting tables must be dropped first) and the
    /// views over it
    pub fn drop_table(&self, relation: &RelationRef) -> Result<()> {
        let key = key_of(relation)?;
        let mut catalog = self.inner.catalog.write();
        let mut rows = self.inner.rows.write();
        catalog.remove_table(&key)?;
        rows.remove(&key);
        info!(target: "geostrata::storage", relation = %relation, "Table dropped");
        Ok(())
    }

    /// Insert one row outside any transaction
    ///
    /// Serial sequences are moved past explicitly supplied values, the way
    /// a bulk loader resets them after loading.
    pub fn insert(&self, relation: &RelationRef, values: &[(&str, Datum)]) -> Result<RowId> {
        let owned: Vec<(String, Datum)> = values
            .iter()
            .map(|(n, v)| (n.to_string(), v.clone()))
            .collect();
        let row = self.inner.prepare_insert(relation, &owned)?;
        let row_id = row.row_id;
        let mut batch = WriteBatch::new();
        batch.push(RowWrite::Insert {
            relation: relation.clone(),
            row,
        });
        self.commit(&batch, &|_| Ok(()))?;

        let catalog = self.inner.catalog.read();
        let target = Shared::write_target(&catalog, relation)?;
        for (name, value) in values {
            let column = target.columns.iter().find(|(_, c)| &c.name == name);
            if let (Some((_, column)), Some(Ok(n))) =
                (column, value.as_deref().map(|v| v.trim().parse::<i64>()))
            {
                if let Some((schema, seq)) = column.default_expr.as_deref().and_then(defaults::sequence_of) {
                    self.inner.sequences.advance_past(&schema, &seq, n);
                }
            }
        }
        Ok(row_id)
    }

    /// Drop row versions no snapshot at or above `min_version` can see
    pub fn vacuum(&self, min_version: u64) {
        let mut rows = self.inner.rows.write();
        for table in rows.values_mut() {
            table.gc(min_version);
        }
        debug!(target: "geostrata::storage", min_version, "Vacuum finished");
    }

    /// Open a snapshot at the current version
    pub fn snapshot_view(&self) -> DatabaseSnapshot {
        let version = self.inner.current_version();
        DatabaseSnapshot::new(version, Arc::clone(&self.inner))
    }

    fn build_table(&self, catalog: &Catalog, def: &TableDef) -> Result<TableMeta> {
        let lookup = |s: &str, n: &str| catalog.lookup_type(s, n);
        let parent_key = def.inherits.clone();
        let mut columns: Vec<ColumnMeta> = match &parent_key {
            Some(parent) => catalog
                .table(parent)
                .ok_or_else(|| Error::not_found(format!("relation \"{}\" does not exist", parent.1)))?
                .columns
                .clone(),
            None => Vec::new(),
        };
        let inherited = columns.len();

        for col in &def.columns {
            if columns[..inherited].iter().any(|c| c.name == col.name) {
                continue;
            }
            if columns.iter().any(|c| c.name == col.name) {
                return Err(Error::invalid_operation(format!(
                    "column \"{}\" specified more than once",
                    col.name
                )));
            }
            let declared = ColumnType::parse_declared(&col.type_name, &lookup)?;
            let mut meta = ColumnMeta::new(col.name.clone(), declared.ty);
            meta.not_null = col.not_null;
            meta.default_expr = col.default_expr.clone();
            if declared.serial {
                let seq = format!("{}_{}_seq", def.name, col.name);
                self.inner.sequences.create(&def.schema, &seq, 1);
                meta.default_expr = Some(defaults::nextval_clause(&def.schema, &seq));
                meta.not_null = true;
            }
            columns.push(meta);
        }

        let index_of = |name: &str| {
            columns
                .iter()
                .position(|c| c.name == name)
                .ok_or_else(|| Error::not_found(format!("column \"{}\" does not exist", name)))
        };
        let primary_key = def
            .primary_key
            .iter()
            .map(|n| index_of(n))
            .collect::<Result<Vec<_>>>()?;
        let mut unique_sets = def
            .unique
            .iter()
            .map(|set| set.iter().map(|n| index_of(n)).collect::<Result<Vec<_>>>())
            .collect::<Result<Vec<_>>>()?;
        for col in def.columns.iter().filter(|c| c.unique) {
            unique_sets.push(vec![index_of(&col.name)?]);
        }
        for i in &primary_key {
            columns[*i].not_null = true;
        }
        Ok(TableMeta {
            columns,
            primary_key,
            unique_sets,
            parent: parent_key,
            children: Vec::new(),
        })
    }
}

impl Storage for Database {
    fn database_id(&self) -> DatabaseId {
        self.inner.id()
    }

    fn current_version(&self) -> u64 {
        self.inner.current_version()
    }

    fn relation_exists(&self, relation: &RelationRef) -> bool {
        self.inner.catalog.read().exists(relation)
    }

    fn describe(&self, relation: &RelationRef) -> Result<RelationInfo> {
        self.inner.catalog.read().describe(relation)
    }

    fn snapshot(&self) -> Box<dyn SnapshotView> {
        Box::new(self.snapshot_view())
    }

    fn prepare_insert(&self, relation: &RelationRef, values: &[(String, Datum)]) -> Result<StoredRow> {
        self.inner.prepare_insert(relation, values)
    }

    fn prepare_update(
        &self,
        relation: &RelationRef,
        current: &StoredRow,
        changes: &[(String, Datum)],
    ) -> Result<StoredRow> {
        self.inner.prepare_update(relation, current, changes)
    }

    fn commit(
        &self,
        batch: &WriteBatch,
        validate: &dyn Fn(&dyn SnapshotView) -> Result<()>,
    ) -> Result<u64> {
        self.inner.commit(batch, validate)
    }

    fn evaluate_default(&self, relation: &RelationRef, column: &str) -> Result<Datum> {
        let target = {
            let catalog = self.inner.catalog.read();
            Shared::write_target(&catalog, relation)?
        };
        let (_, meta) = target
            .columns
            .iter()
            .find(|(_, c)| c.name == column)
            .ok_or_else(|| Error::not_found(format!("column \"{}\" does not exist", column)))?;
        self.inner.evaluate_column_default(relation, meta)
    }

    fn count_distinct(&self, relation: &RelationRef, columns: &[String]) -> Result<(usize, usize)> {
        let info = self.describe(relation)?;
        let indexes = columns
            .iter()
            .map(|c| {
                info.column_index(c)
                    .ok_or_else(|| Error::not_found(format!("column \"{}\" does not exist", c)))
            })
            .collect::<Result<Vec<_>>>()?;
        let rows = self
            .inner
            .scan_at(self.inner.current_version(), relation, None)?;
        let mut distinct: FxHashSet<Vec<&str>> = FxHashSet::default();
        for row in &rows {
            let tuple: Option<Vec<&str>> = indexes.iter().map(|i| row.values[*i].as_deref()).collect();
            if let Some(tuple) = tuple {
                distinct.insert(tuple);
            }
        }
        Ok((rows.len(), distinct.len()))
    }

    fn rename_columns(&self, relation: &RelationRef, renames: &[(String, String)]) -> Result<()> {
        self.inner.catalog.write().rename_columns(relation, renames)?;
        info!(target: "geostrata::storage", relation = %relation, count = renames.len(), "Columns renamed");
        Ok(())
    }

    fn create_table(&self, def: &TableDef) -> Result<()> {
        let key = (def.schema.clone(), def.name.clone());
        let mut catalog = self.inner.catalog.write();
        catalog.create_schema(&def.schema);
        let meta = self.build_table(&catalog, def)?;
        catalog.insert_table(key.clone(), meta)?;
        self.inner.rows.write().insert(key, TableRows::new());
        info!(target: "geostrata::storage", schema = %def.schema, table = %def.name, "Table created");
        Ok(())
    }
}
