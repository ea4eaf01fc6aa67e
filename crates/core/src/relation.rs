//! Relation metadata
//!
//! These types describe what a store exposes about a table, view or query
//! relation: column types as the store names them, constraints and
//! defaults. Row values travel in the store's text protocol as `Datum`s and
//! are decoded by the provider.

use crate::types::RowId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One value in text protocol form; `None` is SQL NULL
pub type Datum = Option<String>;

/// Reference to a relation in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RelationRef {
    /// Schema-qualified table or view
    Table {
        /// Schema name
        schema: String,
        /// Relation name
        name: String,
    },
    /// Read-only subquery, identified by its normalized SQL text
    Query(String),
}

impl RelationRef {
    /// Reference a table or view
    pub fn table(schema: impl Into<String>, name: impl Into<String>) -> Self {
        RelationRef::Table {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Reference a subquery; surrounding parentheses and whitespace are
    /// not significant
    pub fn query(sql: &str) -> Self {
        RelationRef::Query(normalize_query(sql))
    }

    /// True for subquery relations
    pub fn is_query(&self) -> bool {
        matches!(self, RelationRef::Query(_))
    }

    /// Schema name for tables, `None` for queries
    pub fn schema(&self) -> Option<&str> {
        match self {
            RelationRef::Table { schema, .. } => Some(schema),
            RelationRef::Query(_) => None,
        }
    }

    /// Relation name for tables, `None` for queries
    pub fn name(&self) -> Option<&str> {
        match self {
            RelationRef::Table { name, .. } => Some(name),
            RelationRef::Query(_) => None,
        }
    }
}

impl fmt::Display for RelationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationRef::Table { schema, name } => {
                write!(f, "{}.{}", quote_ident(schema), quote_ident(name))
            }
            RelationRef::Query(sql) => write!(f, "({})", sql),
        }
    }
}

/// Collapse whitespace and strip one level of enclosing parentheses
pub fn normalize_query(sql: &str) -> String {
    let mut s = sql.trim();
    if s.starts_with('(') && s.ends_with(')') {
        s = s[1..s.len() - 1].trim();
    }
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Quote an identifier with double quotes, doubling embedded quotes
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal with single quotes, doubling embedded quotes
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// How a column type is built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeKind {
    /// Built-in scalar type
    Base,
    /// User-defined domain over a base type
    Domain {
        /// Internal name of the base type (`varchar`, `int4`, ...)
        base_type_name: String,
        /// Formatted base type (`character varying(6)`)
        base_formatted: String,
    },
    /// Array of a base type
    Array {
        /// Internal name of the element type
        element: String,
    },
    /// Enumerated type with its labels in declaration order
    Enum(Vec<String>),
    /// Geometry column
    Geometry {
        /// Declared spatial reference, if any
        srid: Option<i32>,
        /// Declared geometry type (`POINT`, `GEOMETRY`, ...)
        geometry_type: String,
    },
}

/// Column description as reported by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Internal type name (`int4`, `_text`, `hstore`, or the schema-qualified
    /// name of a domain)
    pub type_name: String,
    /// Formatted type with modifiers (`character varying(6)`, `numeric(10,4)`)
    pub formatted_type: String,
    /// Type construction
    pub kind: TypeKind,
    /// NOT NULL constraint
    pub not_null: bool,
    /// Default clause text, if any
    pub default_expr: Option<String>,
}

/// Kind of relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    /// Base table
    Table,
    /// View
    View,
    /// Subquery
    Query,
}

/// Full description of a relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationInfo {
    /// The relation described
    pub relation: RelationRef,
    /// Columns in order
    pub columns: Vec<ColumnInfo>,
    /// Column indexes of the primary key (empty when none)
    pub primary_key: Vec<usize>,
    /// Column index sets of unique constraints other than the primary key
    pub unique_sets: Vec<Vec<usize>>,
    /// Table, view or query
    pub kind: RelationKind,
    /// Other tables inherit from this one
    pub has_subclass: bool,
    /// Inserts/updates/deletes are accepted
    pub writable: bool,
}

impl RelationInfo {
    /// Index of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Column by name
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// True when `columns` exactly matches the primary key or a unique set
    pub fn is_unique_key(&self, columns: &[usize]) -> bool {
        let mut wanted = columns.to_vec();
        wanted.sort_unstable();
        let matches = |set: &[usize]| {
            let mut s = set.to_vec();
            s.sort_unstable();
            !s.is_empty() && s == wanted
        };
        matches(&self.primary_key) || self.unique_sets.iter().any(|u| matches(u))
    }

    /// True when the single column is covered by a one-column unique set or
    /// is the whole primary key
    pub fn is_column_unique(&self, column: usize) -> bool {
        self.is_unique_key(&[column])
    }

    /// Name of the geometry column, if the relation has one
    pub fn geometry_column(&self) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| matches!(c.kind, TypeKind::Geometry { .. }))
    }
}

/// One row as returned by a scan: values in `RelationInfo::columns` order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    /// Physical row identity
    pub row_id: RowId,
    /// Column values
    pub values: Vec<Datum>,
}

/// Column definition for table creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Declared type (`varchar(6)`, `int8`, `text[]`, `geometry(Point,4326)`,
    /// `serial`, or a domain name)
    pub type_name: String,
    /// NOT NULL
    pub not_null: bool,
    /// Single-column UNIQUE
    pub unique: bool,
    /// Default clause text
    pub default_expr: Option<String>,
}

impl ColumnDef {
    /// Nullable column without default
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        ColumnDef {
            name: name.into(),
            type_name: type_name.into(),
            not_null: false,
            unique: false,
            default_expr: None,
        }
    }

    /// Builder: NOT NULL
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Builder: UNIQUE
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Builder: DEFAULT clause
    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        self.default_expr = Some(expr.into());
        self
    }
}

/// Table definition for table creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    /// Schema name
    pub schema: String,
    /// Table name
    pub name: String,
    /// Columns in order (inherited columns are prepended automatically)
    pub columns: Vec<ColumnDef>,
    /// Primary key column names
    pub primary_key: Vec<String>,
    /// Multi-column unique constraints
    pub unique: Vec<Vec<String>>,
    /// Parent table (schema, name)
    pub inherits: Option<(String, String)>,
}

impl TableDef {
    /// Empty definition
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        TableDef {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            unique: Vec::new(),
            inherits: None,
        }
    }

    /// Builder: add a column
    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Builder: set the primary key
    pub fn primary_key<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: add a multi-column unique constraint
    pub fn unique<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.unique.push(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Builder: inherit from a parent table
    pub fn inherits(mut self, schema: impl Into<String>, name: impl Into<String>) -> Self {
        self.inherits = Some((schema.into(), name.into()));
        self
    }

    /// Reference to the table being defined
    pub fn relation(&self) -> RelationRef {
        RelationRef::table(self.schema.clone(), self.name.clone())
    }
}
