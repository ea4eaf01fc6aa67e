//! Layer styles stored next to the data
//!
//! Styles live in one table of the store (`public.layer_styles` unless
//! configured otherwise), keyed by a serial id and tagged with the catalog,
//! schema, table and geometry column of the layer they belong to. The table
//! is created by the first save.
//!
//! A missing table is not an error for listing: the list reports a count of
//! -1 and a message, which callers can tell apart from an empty table.

use crate::connection::Connection;
use crate::uri::DataSourceUri;
use chrono::Utc;
use geostrata_core::{
    ColumnDef, Datum, Error, Literal, Predicate, RelationRef, Result, StoredRow, TableDef,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

const COLUMNS: [&str; 13] = [
    "id",
    "f_table_catalog",
    "f_table_schema",
    "f_table_name",
    "f_geometry_column",
    "stylename",
    "styleqml",
    "stylesld",
    "useasdefault",
    "description",
    "owner",
    "ui",
    "update_time",
];

/// Result of listing styles
///
/// `related_count` is the number of leading entries that belong to the
/// layer asked about, or -1 when the style table does not exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleList {
    /// Styles of the layer itself; -1 when styles are unavailable
    pub related_count: i32,
    /// Style ids, related styles first
    pub ids: Vec<String>,
    /// Style names, parallel to `ids`
    pub names: Vec<String>,
    /// Style descriptions, parallel to `ids`
    pub descriptions: Vec<String>,
    /// Why listing failed; empty on success
    pub error: String,
}

/// A style to save
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewStyle {
    /// Name, unique per layer
    pub name: String,
    /// Free text description
    pub description: String,
    /// Style document
    pub qml: String,
    /// Optional SLD rendition
    pub sld: String,
    /// Optional form definition
    pub ui: String,
    /// Make this the layer's default style
    pub use_as_default: bool,
}

/// Which layer a style belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
struct LayerTag {
    catalog: String,
    schema: String,
    table: String,
    geometry: String,
}

impl LayerTag {
    fn of(uri: &DataSourceUri) -> Result<Self> {
        match uri.relation()? {
            RelationRef::Table { schema, name } => Ok(LayerTag {
                catalog: uri.dbname.clone().unwrap_or_default(),
                schema: schema.clone(),
                table: name.clone(),
                geometry: uri.geometry_column.clone().unwrap_or_default(),
            }),
            RelationRef::Query(_) => Err(Error::invalid_operation("styles can only be stored for tables")),
        }
    }

    fn predicate(&self) -> Predicate {
        Predicate::and(vec![
            Predicate::eq("f_table_catalog", Literal::Text(self.catalog.clone())),
            Predicate::eq("f_table_schema", Literal::Text(self.schema.clone())),
            Predicate::eq("f_table_name", Literal::Text(self.table.clone())),
            Predicate::eq("f_geometry_column", Literal::Text(self.geometry.clone())),
        ])
    }

    fn matches(&self, row: &StyleRow) -> bool {
        row.catalog == self.catalog
            && row.schema == self.schema
            && row.table == self.table
            && row.geometry == self.geometry
    }
}

/// One decoded row of the style table
#[derive(Debug, Clone)]
struct StyleRow {
    id: i64,
    catalog: String,
    schema: String,
    table: String,
    geometry: String,
    name: String,
    qml: String,
    use_as_default: bool,
    description: String,
    update_time: String,
    stored: StoredRow,
}

impl StyleRow {
    fn decode(row: StoredRow) -> Result<Self> {
        let text = |i: usize| row.values.get(i).cloned().flatten().unwrap_or_default();
        let id = text(0)
            .parse::<i64>()
            .map_err(|_| Error::storage("style row without a numeric id"))?;
        Ok(StyleRow {
            id,
            catalog: text(1),
            schema: text(2),
            table: text(3),
            geometry: text(4),
            name: text(5),
            qml: text(6),
            use_as_default: text(8) == "t",
            description: text(9),
            update_time: text(12),
            stored: row,
        })
    }
}

/// Style storage of one connection
#[derive(Debug, Clone)]
pub struct StyleStore {
    conn: Arc<Connection>,
    table: RelationRef,
}

impl StyleStore {
    /// Style store using the connection's configured table
    pub fn new(conn: &Arc<Connection>) -> Self {
        let (schema, name) = conn.config().style_table_ref();
        StyleStore {
            conn: Arc::clone(conn),
            table: RelationRef::table(schema, name),
        }
    }

    /// The style table
    pub fn table(&self) -> &RelationRef {
        &self.table
    }

    fn missing_table(&self) -> Error {
        Error::not_found(format!("style table {} does not exist", self.table))
    }

    fn rows(&self, predicate: Option<&Predicate>) -> Result<Vec<StyleRow>> {
        if !self.conn.storage().relation_exists(&self.table) {
            return Err(self.missing_table());
        }
        self.conn
            .storage()
            .snapshot()
            .scan(&self.table, predicate)?
            .into_iter()
            .map(StyleRow::decode)
            .collect()
    }

    /// Styles of every layer, the layer's own first
    pub fn list_styles(&self, layer: &DataSourceUri) -> StyleList {
        let listed = LayerTag::of(layer).and_then(|tag| Ok((tag, self.rows(None)?)));
        let (tag, rows) = match listed {
            Ok(listed) => listed,
            Err(e) => {
                warn!(target: "geostrata::styles", error = %e, "Styles unavailable");
                return StyleList {
                    related_count: -1,
                    error: e.to_string(),
                    ..StyleList::default()
                };
            }
        };

        let (mut related, mut others): (Vec<StyleRow>, Vec<StyleRow>) = rows.into_iter().partition(|r| tag.matches(r));
        related.sort_by(|a, b| {
            b.use_as_default
                .cmp(&a.use_as_default)
                .then_with(|| b.update_time.cmp(&a.update_time))
                .then_with(|| a.id.cmp(&b.id))
        });
        others.sort_by(|a, b| b.update_time.cmp(&a.update_time).then_with(|| a.id.cmp(&b.id)));

        let mut list = StyleList {
            related_count: related.len() as i32,
            ..StyleList::default()
        };
        for row in related.into_iter().chain(others) {
            list.ids.push(row.id.to_string());
            list.names.push(row.name);
            list.descriptions.push(row.description);
        }
        debug!(
            target: "geostrata::styles",
            related = list.related_count,
            total = list.ids.len(),
            "Styles listed"
        );
        list
    }

    /// Style document by id
    ///
    /// # Errors
    ///
    /// `NotFound` when the table is missing, the id is not numeric, or no
    /// style has that id.
    pub fn get_style(&self, id: &str) -> Result<String> {
        let numeric = parse_id(id)?;
        self.rows(Some(&Predicate::eq("id", Literal::Int(numeric))))?
            .into_iter()
            .next()
            .map(|row| row.qml)
            .ok_or_else(|| Error::not_found(format!("style {} not found", id)))
    }

    /// Save a style for a layer and return its id
    ///
    /// A style with the same name on the same layer is overwritten. Saving
    /// a default style clears the default flag of the layer's other styles.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` for query layers, or the store's error.
    pub fn save_style(&self, layer: &DataSourceUri, style: &NewStyle) -> Result<i64> {
        let tag = LayerTag::of(layer)?;
        self.ensure_table()?;
        let storage = self.conn.storage();
        let now = Utc::now().naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string();
        let text = |s: &str| -> Datum { Some(s.to_string()) };
        let values: Vec<(String, Datum)> = vec![
            ("f_table_catalog".into(), text(&tag.catalog)),
            ("f_table_schema".into(), text(&tag.schema)),
            ("f_table_name".into(), text(&tag.table)),
            ("f_geometry_column".into(), text(&tag.geometry)),
            ("stylename".into(), text(&style.name)),
            ("styleqml".into(), text(&style.qml)),
            ("stylesld".into(), text(&style.sld)),
            ("useasdefault".into(), text(if style.use_as_default { "t" } else { "f" })),
            ("description".into(), text(&style.description)),
            ("ui".into(), (!style.ui.is_empty()).then(|| style.ui.clone())),
            ("update_time".into(), Some(now)),
        ];

        let id = self.conn.transaction(|txn| {
            let mut saved = None;
            for row in txn.scan(&self.table, Some(&tag.predicate()))? {
                let row = StyleRow::decode(row)?;
                if row.name == style.name {
                    let updated = storage.prepare_update(&self.table, &row.stored, &values)?;
                    txn.update(&self.table, updated)?;
                    saved = Some(row.id);
                } else if style.use_as_default && row.use_as_default {
                    let updated = storage.prepare_update(
                        &self.table,
                        &row.stored,
                        &[("useasdefault".to_string(), text("f"))],
                    )?;
                    txn.update(&self.table, updated)?;
                }
            }
            match saved {
                Some(id) => Ok(id),
                None => {
                    let row = StyleRow::decode(storage.prepare_insert(&self.table, &values)?)?;
                    let id = row.id;
                    txn.insert(&self.table, row.stored)?;
                    Ok(id)
                }
            }
        })?;
        info!(
            target: "geostrata::styles",
            id,
            name = %style.name,
            table = %tag.table,
            default = style.use_as_default,
            "Style saved"
        );
        Ok(id)
    }

    /// Delete a style; unknown ids are not an error
    ///
    /// # Errors
    ///
    /// `NotFound` when the table is missing or the id is not numeric.
    pub fn delete_style(&self, id: &str) -> Result<()> {
        let numeric = parse_id(id)?;
        if !self.conn.storage().relation_exists(&self.table) {
            return Err(self.missing_table());
        }
        let deleted = self.conn.transaction(|txn| {
            let rows = txn.scan(&self.table, Some(&Predicate::eq("id", Literal::Int(numeric))))?;
            for row in &rows {
                txn.delete(&self.table, row.row_id)?;
            }
            Ok(rows.len())
        })?;
        info!(target: "geostrata::styles", id = numeric, deleted, "Style deleted");
        Ok(())
    }

    /// Default style document of a layer, if one is marked
    ///
    /// # Errors
    ///
    /// `NotFound` when the table is missing, `InvalidOperation` for query
    /// layers.
    pub fn load_default_style(&self, layer: &DataSourceUri) -> Result<Option<String>> {
        let tag = LayerTag::of(layer)?;
        let mut rows = self.rows(Some(&tag.predicate()))?;
        rows.retain(|r| r.use_as_default);
        rows.sort_by(|a, b| b.update_time.cmp(&a.update_time));
        Ok(rows.into_iter().next().map(|r| r.qml))
    }

    fn ensure_table(&self) -> Result<()> {
        let storage = self.conn.storage();
        if storage.relation_exists(&self.table) {
            return Ok(());
        }
        let (schema, name) = match &self.table {
            RelationRef::Table { schema, name } => (schema.clone(), name.clone()),
            RelationRef::Query(_) => return Err(Error::invalid_operation("style table must be a table")),
        };
        let types = [
            "serial",
            "varchar",
            "varchar",
            "varchar",
            "varchar",
            "text",
            "text",
            "text",
            "bool",
            "text",
            "varchar(63)",
            "text",
            "timestamp",
        ];
        let mut def = TableDef::new(schema, name);
        for (name, type_name) in COLUMNS.iter().zip(types) {
            let column = ColumnDef::new(*name, type_name);
            def = def.column(if *name == "update_time" {
                column.default_expr("now()")
            } else {
                column
            });
        }
        storage.create_table(&def.primary_key(["id"]))?;
        info!(target: "geostrata::styles", table = %self.table, "Style table created");
        Ok(())
    }
}

fn parse_id(id: &str) -> Result<i64> {
    id.trim()
        .parse::<i64>()
        .map_err(|_| Error::not_found(format!("style id \"{}\" is not a number", id)))
}
