//! Source descriptors
//!
//! A descriptor is a whitespace-separated list of `key=value` pairs naming
//! the connection, the relation and how to key it:
//!
//! ```text
//! dbname='qgis_test' sslmode=disable key='pk' srid=4326 type=POINT
//!     table="qgis_test"."someData" (geom) sql=
//! ```
//!
//! Values may be single- or double-quoted with backslash escapes. `table`
//! takes a schema-qualified name or a parenthesized subquery, optionally
//! followed by the geometry column in parentheses. `sql=` consumes the rest
//! of the descriptor.

use geostrata_core::{Error, RelationRef, Result};
use std::collections::BTreeMap;
use std::fmt;

/// Parsed source descriptor
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataSourceUri {
    /// Database name
    pub dbname: Option<String>,
    /// Host name
    pub host: Option<String>,
    /// Port
    pub port: Option<String>,
    /// User name
    pub user: Option<String>,
    /// Password
    pub password: Option<String>,
    /// SSL mode
    pub sslmode: Option<String>,
    /// Service name
    pub service: Option<String>,
    /// Declared key columns, in declaration order
    pub key_columns: Vec<String>,
    /// Declared spatial reference
    pub srid: Option<i32>,
    /// Declared geometry type (upper case)
    pub geometry_type: Option<String>,
    /// Skip key uniqueness verification
    pub estimated_metadata: bool,
    /// Table or subquery; `None` until a `table=` pair is parsed
    pub relation: Option<RelationRef>,
    /// Geometry column named after the table
    pub geometry_column: Option<String>,
    /// Subset filter expression
    pub sql: Option<String>,
    /// Pairs with keys this parser does not interpret
    pub params: BTreeMap<String, String>,
}

impl DataSourceUri {
    /// Parse a descriptor
    ///
    /// # Errors
    ///
    /// `InvalidSource` for unterminated quotes, pairs without `=`, invalid
    /// `srid` values, malformed key lists or a missing `table`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut uri = DataSourceUri::default();
        let mut cursor = Cursor::new(text);

        loop {
            cursor.skip_whitespace();
            if cursor.at_end() {
                break;
            }
            let key = cursor.read_key()?;
            match key.as_str() {
                "sql" => {
                    let rest = cursor.rest().trim();
                    if !rest.is_empty() {
                        uri.sql = Some(rest.to_string());
                    }
                    break;
                }
                "table" => {
                    uri.relation = Some(cursor.read_table()?);
                    cursor.skip_whitespace();
                    if cursor.peek() == Some('(') {
                        uri.geometry_column = Some(cursor.read_geometry_column()?);
                    }
                }
                _ => {
                    let value = cursor.read_value()?;
                    uri.assign(&key, value)?;
                }
            }
        }

        if uri.relation.is_none() {
            return Err(Error::invalid_source(format!(
                "descriptor names no table: {}",
                text
            )));
        }
        Ok(uri)
    }

    fn assign(&mut self, key: &str, value: String) -> Result<()> {
        match key {
            "dbname" => self.dbname = Some(value),
            "host" => self.host = Some(value),
            "port" => self.port = Some(value),
            "user" => self.user = Some(value),
            "password" => self.password = Some(value),
            "sslmode" => self.sslmode = Some(value),
            "service" => self.service = Some(value),
            "key" => self.key_columns = parse_key_list(&value)?,
            "srid" => {
                let srid = value
                    .trim()
                    .parse::<i32>()
                    .map_err(|_| Error::invalid_source(format!("invalid srid '{}'", value)))?;
                self.srid = Some(srid);
            }
            "type" => self.geometry_type = Some(value.to_ascii_uppercase()),
            "estimatedmetadata" => {
                self.estimated_metadata = matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "t")
            }
            _ => {
                self.params.insert(key.to_string(), value);
            }
        }
        Ok(())
    }

    /// Relation the descriptor names
    ///
    /// # Errors
    ///
    /// `InvalidSource` when the descriptor was built without a table.
    pub fn relation(&self) -> Result<&RelationRef> {
        self.relation
            .as_ref()
            .ok_or_else(|| Error::invalid_source("descriptor names no table"))
    }

    /// Builder: descriptor for a table
    pub fn for_table(schema: &str, name: &str, geometry_column: Option<&str>) -> Self {
        DataSourceUri {
            relation: Some(RelationRef::table(schema, name)),
            geometry_column: geometry_column.map(str::to_string),
            ..Default::default()
        }
    }

    /// Builder: set the key columns
    pub fn with_key<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.key_columns = columns.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Display for DataSourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        let plain = [
            ("dbname", &self.dbname),
            ("host", &self.host),
            ("port", &self.port),
            ("user", &self.user),
            ("password", &self.password),
            ("sslmode", &self.sslmode),
            ("service", &self.service),
        ];
        for (key, value) in plain {
            if let Some(v) = value {
                parts.push(format!("{}={}", key, quote_value(v)));
            }
        }
        for (key, value) in &self.params {
            parts.push(format!("{}={}", key, quote_value(value)));
        }
        if !self.key_columns.is_empty() {
            let keys: Vec<String> = self
                .key_columns
                .iter()
                .map(|k| format!("\"{}\"", k.replace('"', "\"\"")))
                .collect();
            parts.push(format!("key={}", quote_value(&keys.join(","))));
        }
        if self.estimated_metadata {
            parts.push("estimatedmetadata=true".to_string());
        }
        if let Some(srid) = self.srid {
            parts.push(format!("srid={}", srid));
        }
        if let Some(t) = &self.geometry_type {
            parts.push(format!("type={}", t));
        }
        match &self.relation {
            Some(RelationRef::Table { schema, name }) => {
                parts.push(format!("table={}.{}", quote_name(schema), quote_name(name)))
            }
            Some(RelationRef::Query(sql)) => {
                parts.push(format!("table=\"({})\"", sql.replace('\\', "\\\\").replace('"', "\\\"")))
            }
            None => {}
        }
        if let Some(geom) = &self.geometry_column {
            parts.push(format!("({})", geom));
        }
        parts.push(format!("sql={}", self.sql.as_deref().unwrap_or("")));
        write!(f, "{}", parts.join(" "))
    }
}

fn quote_value(v: &str) -> String {
    format!("'{}'", v.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn quote_name(v: &str) -> String {
    format!("\"{}\"", v.replace('"', "\"\""))
}

/// Split `"key1","key2"` or `pk` into column names
fn parse_key_list(text: &str) -> Result<Vec<String>> {
    let mut columns = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= chars.len() {
            break;
        }
        let mut name = String::new();
        if chars[i] == '"' {
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(Error::invalid_source(format!("unterminated key column in '{}'", text))),
                    Some('"') if chars.get(i + 1) == Some(&'"') => {
                        name.push('"');
                        i += 2;
                    }
                    Some('"') => {
                        i += 1;
                        break;
                    }
                    Some(c) => {
                        name.push(*c);
                        i += 1;
                    }
                }
            }
        } else {
            while i < chars.len() && chars[i] != ',' {
                name.push(chars[i]);
                i += 1;
            }
            name = name.trim().to_string();
        }
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        match chars.get(i) {
            None => {}
            Some(',') => i += 1,
            Some(c) => {
                return Err(Error::invalid_source(format!(
                    "unexpected '{}' in key list '{}'",
                    c, text
                )))
            }
        }
        if name.is_empty() {
            return Err(Error::invalid_source(format!("empty key column in '{}'", text)));
        }
        columns.push(name);
    }
    Ok(columns)
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Cursor { text, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn read_key(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '=' {
                let key = self.text[start..self.pos].to_string();
                self.bump();
                return Ok(key);
            }
            if c.is_whitespace() {
                break;
            }
            self.bump();
        }
        Err(Error::invalid_source(format!(
            "expected key=value at '{}'",
            &self.text[start..]
        )))
    }

    /// Quoted (`'..'` or `".."`, backslash escapes) or bare value
    fn read_value(&mut self) -> Result<String> {
        match self.peek() {
            Some(q @ ('\'' | '"')) => {
                self.bump();
                self.read_quoted(q)
            }
            _ => {
                let start = self.pos;
                while self.peek().is_some_and(|c| !c.is_whitespace()) {
                    self.bump();
                }
                Ok(self.text[start..self.pos].to_string())
            }
        }
    }

    fn read_quoted(&mut self, quote: char) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(Error::invalid_source(format!("unterminated quoted value in '{}'", self.text))),
                Some('\\') => match self.bump() {
                    Some(c) => out.push(c),
                    None => return Err(Error::invalid_source("dangling escape in descriptor")),
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
            }
        }
    }

    /// `"schema"."name"`, `"schema".name`, `schema.name`, `name` or
    /// `"(SELECT ...)"`
    fn read_table(&mut self) -> Result<RelationRef> {
        let first = self.read_name_part()?;
        if self.peek() == Some('.') {
            self.bump();
            let second = self.read_name_part()?;
            return Ok(RelationRef::table(first, second));
        }
        if first.trim_start().starts_with('(') {
            return Ok(RelationRef::query(&first));
        }
        Ok(RelationRef::table("public", first))
    }

    fn read_name_part(&mut self) -> Result<String> {
        match self.peek() {
            Some('"') => {
                self.bump();
                let mut out = String::new();
                loop {
                    match self.bump() {
                        None => return Err(Error::invalid_source("unterminated table name")),
                        Some('\\') => match self.bump() {
                            Some(c) => out.push(c),
                            None => return Err(Error::invalid_source("dangling escape in table name")),
                        },
                        Some('"') if self.peek() == Some('"') => {
                            self.bump();
                            out.push('"');
                        }
                        Some('"') => return Ok(out),
                        Some(c) => out.push(c),
                    }
                }
            }
            _ => {
                let start = self.pos;
                while self.peek().is_some_and(|c| !c.is_whitespace() && c != '.') {
                    self.bump();
                }
                if start == self.pos {
                    return Err(Error::invalid_source("empty table name"));
                }
                Ok(self.text[start..self.pos].to_string())
            }
        }
    }

    fn read_geometry_column(&mut self) -> Result<String> {
        self.bump();
        let start = self.pos;
        while let Some(c) = self.bump() {
            if c == ')' {
                let name = self.text[start..self.pos - 1].trim();
                return Ok(name.trim_matches('"').to_string());
            }
        }
        Err(Error::invalid_source("unterminated geometry column"))
    }
}
