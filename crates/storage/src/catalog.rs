//! System catalog: schemas, tables, views, query relations and user types
//!
//! The catalog is plain data guarded by the database's catalog lock. Row
//! data lives separately (see `rows`), keyed by the same `TableKey`.

use crate::column_type::ColumnType;
use geostrata_core::predicate::Predicate;
use geostrata_core::{
    ColumnInfo, Datum, Error, RelationInfo, RelationKind, RelationRef, Result, TypeKind,
};
use rustc_hash::{FxHashMap, FxHashSet};

/// (schema, name)
pub type TableKey = (String, String);

/// One column of a table or query
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    /// Column name
    pub name: String,
    /// Column type
    pub ty: ColumnType,
    /// Column-level NOT NULL
    pub not_null: bool,
    /// Default clause text
    pub default_expr: Option<String>,
}

impl ColumnMeta {
    /// Column with no constraint and no default
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            not_null: false,
            default_expr: None,
        }
    }

    /// NOT NULL from the column or from its domain
    pub fn effective_not_null(&self) -> bool {
        self.not_null || self.ty.domain_not_null()
    }

    /// Report as the store-neutral column description
    pub fn info(&self) -> ColumnInfo {
        ColumnInfo {
            name: self.name.clone(),
            type_name: self.ty.type_name(),
            formatted_type: self.ty.formatted(),
            kind: type_kind(&self.ty),
            not_null: self.effective_not_null(),
            default_expr: self.default_expr.clone(),
        }
    }
}

fn type_kind(ty: &ColumnType) -> TypeKind {
    match ty {
        ColumnType::Domain { base, .. } => TypeKind::Domain {
            base_type_name: base.base().type_name(),
            base_formatted: base.base().formatted(),
        },
        ColumnType::Array(elem) => TypeKind::Array {
            element: elem.type_name(),
        },
        ColumnType::Enum { labels, .. } => TypeKind::Enum(labels.clone()),
        ColumnType::Geometry {
            geometry_type,
            srid,
        } => TypeKind::Geometry {
            srid: *srid,
            geometry_type: geometry_type.clone(),
        },
        _ => TypeKind::Base,
    }
}

/// Base table
#[derive(Debug, Clone, PartialEq)]
pub struct TableMeta {
    /// Columns; a child table starts with its parent's columns
    pub columns: Vec<ColumnMeta>,
    /// Primary key column indexes
    pub primary_key: Vec<usize>,
    /// Unique constraint column index sets
    pub unique_sets: Vec<Vec<usize>>,
    /// Table this one inherits from
    pub parent: Option<TableKey>,
    /// Tables inheriting from this one
    pub children: Vec<TableKey>,
}

/// Updatable single-table view
#[derive(Debug, Clone, PartialEq)]
pub struct ViewMeta {
    /// Underlying table
    pub base: TableKey,
    /// (base column index, exposed name)
    pub columns: Vec<(usize, String)>,
}

/// Where a query relation's rows come from
#[derive(Debug, Clone, PartialEq)]
pub enum QueryBody {
    /// Fixed result set
    Values(Vec<Vec<Datum>>),
    /// Projection of a table, optionally filtered
    Select {
        /// Table read
        base: TableKey,
        /// Base column index per output column
        columns: Vec<usize>,
        /// Row filter
        filter: Option<Predicate>,
    },
}

/// Read-only query relation
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMeta {
    /// Output columns
    pub columns: Vec<ColumnMeta>,
    /// Row source
    pub body: QueryBody,
}

/// A resolved relation
#[derive(Debug, Clone, Copy)]
pub enum Entry<'a> {
    /// Base table
    Table(&'a TableKey, &'a TableMeta),
    /// View over a table
    View(&'a ViewMeta),
    /// Query relation
    Query(&'a QueryMeta),
}

/// The catalog
#[derive(Debug, Clone)]
pub struct Catalog {
    schemas: FxHashSet<String>,
    tables: FxHashMap<TableKey, TableMeta>,
    views: FxHashMap<TableKey, ViewMeta>,
    queries: FxHashMap<String, QueryMeta>,
    types: FxHashMap<TableKey, ColumnType>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

fn key_of(relation: &RelationRef) -> Option<TableKey> {
    match relation {
        RelationRef::Table { schema, name } => Some((schema.clone(), name.clone())),
        RelationRef::Query(_) => None,
    }
}

impl Catalog {
    /// Catalog with the `public` schema
    pub fn new() -> Self {
        let mut schemas = FxHashSet::default();
        schemas.insert("public".to_string());
        Self {
            schemas,
            tables: FxHashMap::default(),
            views: FxHashMap::default(),
            queries: FxHashMap::default(),
            types: FxHashMap::default(),
        }
    }

    /// Create a schema; existing schemas are left alone
    pub fn create_schema(&mut self, name: &str) {
        self.schemas.insert(name.to_string());
    }

    /// Check whether a schema exists
    pub fn has_schema(&self, name: &str) -> bool {
        self.schemas.contains(name)
    }

    /// Resolve a user-defined type
    pub fn lookup_type(&self, schema: &str, name: &str) -> Option<ColumnType> {
        self.types
            .get(&(schema.to_string(), name.to_string()))
            .cloned()
    }

    /// Register a domain or enum type
    pub fn add_type(&mut self, schema: &str, name: &str, ty: ColumnType) -> Result<()> {
        self.ensure_schema(schema)?;
        let key = (schema.to_string(), name.to_string());
        if self.types.contains_key(&key) {
            return Err(Error::invalid_operation(format!(
                "type \"{}\" already exists",
                name
            )));
        }
        self.types.insert(key, ty);
        Ok(())
    }

    fn ensure_schema(&self, schema: &str) -> Result<()> {
        if self.has_schema(schema) {
            Ok(())
        } else {
            Err(Error::not_found(format!(
                "schema \"{}\" does not exist",
                schema
            )))
        }
    }

    fn ensure_free(&self, key: &TableKey) -> Result<()> {
        self.ensure_schema(&key.0)?;
        if self.tables.contains_key(key) || self.views.contains_key(key) {
            return Err(Error::invalid_operation(format!(
                "relation \"{}\" already exists",
                key.1
            )));
        }
        Ok(())
    }

    /// Add a table; links it to its parent
    pub fn insert_table(&mut self, key: TableKey, meta: TableMeta) -> Result<()> {
        self.ensure_free(&key)?;
        if let Some(parent) = &meta.parent {
            let parent_meta = self.tables.get_mut(parent).ok_or_else(|| {
                Error::not_found(format!("relation \"{}\" does not exist", parent.1))
            })?;
            parent_meta.children.push(key.clone());
        }
        self.tables.insert(key, meta);
        Ok(())
    }

    /// Add a view
    pub fn insert_view(&mut self, key: TableKey, meta: ViewMeta) -> Result<()> {
        self.ensure_free(&key)?;
        if !self.tables.contains_key(&meta.base) {
            return Err(Error::not_found(format!(
                "relation \"{}\" does not exist",
                meta.base.1
            )));
        }
        self.views.insert(key, meta);
        Ok(())
    }

    /// Register a query relation under its normalized SQL text
    pub fn insert_query(&mut self, sql: String, meta: QueryMeta) {
        self.queries.insert(sql, meta);
    }

    /// Remove a table and its views; children must be dropped first
    pub fn remove_table(&mut self, key: &TableKey) -> Result<TableMeta> {
        let meta = self
            .tables
            .get(key)
            .ok_or_else(|| Error::not_found(format!("relation \"{}\" does not exist", key.1)))?;
        if !meta.children.is_empty() {
            return Err(Error::invalid_operation(format!(
                "other objects depend on table \"{}\"",
                key.1
            )));
        }
        let meta = self.tables.remove(key).ok_or_else(|| Error::not_found(key.1.clone()))?;
        if let Some(parent) = &meta.parent {
            if let Some(p) = self.tables.get_mut(parent) {
                p.children.retain(|c| c != key);
            }
        }
        self.views.retain(|_, v| &v.base != key);
        Ok(meta)
    }

    /// Table by key
    pub fn table(&self, key: &TableKey) -> Option<&TableMeta> {
        self.tables.get(key)
    }

    /// Check whether a relation exists
    pub fn exists(&self, relation: &RelationRef) -> bool {
        self.entry(relation).is_ok()
    }

    /// Resolve a relation
    pub fn entry(&self, relation: &RelationRef) -> Result<Entry<'_>> {
        let missing = || Error::not_found(format!("relation {} does not exist", relation));
        match relation {
            RelationRef::Query(sql) => self.queries.get(sql).map(Entry::Query).ok_or_else(missing),
            RelationRef::Table { schema, name } => {
                let key = (schema.clone(), name.clone());
                if let Some((k, t)) = self.tables.get_key_value(&key) {
                    return Ok(Entry::Table(k, t));
                }
                self.views.get(&key).map(Entry::View).ok_or_else(missing)
            }
        }
    }

    /// The table and its descendants, depth first
    pub fn family(&self, key: &TableKey) -> Vec<TableKey> {
        let mut out = vec![key.clone()];
        let mut i = 0;
        while i < out.len() {
            if let Some(meta) = self.tables.get(&out[i]) {
                out.extend(meta.children.iter().cloned());
            }
            i += 1;
        }
        out
    }

    /// Describe a relation
    pub fn describe(&self, relation: &RelationRef) -> Result<RelationInfo> {
        match self.entry(relation)? {
            Entry::Table(_, meta) => Ok(RelationInfo {
                relation: relation.clone(),
                columns: meta.columns.iter().map(ColumnMeta::info).collect(),
                primary_key: meta.primary_key.clone(),
                unique_sets: meta.unique_sets.clone(),
                kind: RelationKind::Table,
                has_subclass: !meta.children.is_empty(),
                writable: true,
            }),
            Entry::View(view) => {
                let base = self.table(&view.base).ok_or_else(|| {
                    Error::storage(format!("view base \"{}\" is missing", view.base.1))
                })?;
                let columns = view
                    .columns
                    .iter()
                    .filter_map(|(idx, name)| {
                        base.columns.get(*idx).map(|c| ColumnInfo {
                            name: name.clone(),
                            not_null: false,
                            ..c.info()
                        })
                    })
                    .collect();
                Ok(RelationInfo {
                    relation: relation.clone(),
                    columns,
                    primary_key: Vec::new(),
                    unique_sets: Vec::new(),
                    kind: RelationKind::View,
                    has_subclass: false,
                    writable: true,
                })
            }
            Entry::Query(query) => Ok(RelationInfo {
                relation: relation.clone(),
                columns: query
                    .columns
                    .iter()
                    .map(|c| ColumnInfo {
                        not_null: false,
                        default_expr: None,
                        ..c.info()
                    })
                    .collect(),
                primary_key: Vec::new(),
                unique_sets: Vec::new(),
                kind: RelationKind::Query,
                has_subclass: false,
                writable: false,
            }),
        }
    }

    /// Rename columns of a table (propagating to inheriting tables) or a
    /// view; all renames apply or none do
    pub fn rename_columns(
        &mut self,
        relation: &RelationRef,
        renames: &[(String, String)],
    ) -> Result<()> {
        if renames.is_empty() {
            return Err(Error::invalid_operation("no columns to rename"));
        }
        let key = key_of(relation)
            .ok_or_else(|| Error::invalid_operation("query relations are read-only"))?;

        if let Some(view) = self.views.get(&key) {
            let mut names: Vec<String> = view.columns.iter().map(|(_, n)| n.clone()).collect();
            apply_renames(&mut names, renames)?;
            if let Some(view) = self.views.get_mut(&key) {
                for (slot, name) in view.columns.iter_mut().zip(names) {
                    slot.1 = name;
                }
            }
            return Ok(());
        }

        let table = self
            .tables
            .get(&key)
            .ok_or_else(|| Error::not_found(format!("relation {} does not exist", relation)))?;
        let mut names: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
        let inherited = names.len();
        apply_renames(&mut names, renames)?;

        // validate every inheriting table before touching anything
        let family = self.family(&key);
        let mut planned = Vec::with_capacity(family.len());
        for member in &family {
            let meta = self
                .tables
                .get(member)
                .ok_or_else(|| Error::storage(format!("missing table \"{}\"", member.1)))?;
            let mut member_names: Vec<String> =
                meta.columns.iter().map(|c| c.name.clone()).collect();
            member_names[..inherited].clone_from_slice(&names);
            let mut seen = FxHashSet::default();
            if let Some(dup) = member_names.iter().find(|n| !seen.insert(n.as_str())) {
                return Err(Error::invalid_operation(format!(
                    "column \"{}\" of relation \"{}\" already exists",
                    dup, member.1
                )));
            }
            planned.push((member.clone(), member_names));
        }
        for (member, member_names) in planned {
            if let Some(meta) = self.tables.get_mut(&member) {
                for (col, name) in meta.columns.iter_mut().zip(member_names) {
                    col.name = name;
                }
            }
        }
        Ok(())
    }
}

fn apply_renames(names: &mut [String], renames: &[(String, String)]) -> Result<()> {
    for (from, to) in renames {
        if to.is_empty() {
            return Err(Error::invalid_operation("column name cannot be empty"));
        }
        let idx = names
            .iter()
            .position(|n| n == from)
            .ok_or_else(|| Error::not_found(format!("column \"{}\" does not exist", from)))?;
        if names.iter().any(|n| n == to) {
            return Err(Error::invalid_operation(format!(
                "column \"{}\" already exists",
                to
            )));
        }
        names[idx] = to.clone();
    }
    Ok(())
}
