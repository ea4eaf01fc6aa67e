//! Column type system of the store
//!
//! Declared types (`varchar(6)`, `numeric(10,4)`, `text[]`,
//! `geometry(Point,4326)`, domain names, ...) are parsed once at table
//! creation. Every value written to a column goes through `coerce`, which
//! validates it and normalizes it to the type's canonical text output, so
//! scans always return canonical datums.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use geostrata_core::geometry::Geometry;
use geostrata_core::literal;
use geostrata_core::predicate::Literal;
use geostrata_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A column type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// 16-bit integer
    Int2,
    /// 32-bit integer
    Int4,
    /// 64-bit integer
    Int8,
    /// Single precision float
    Float4,
    /// Double precision float
    Float8,
    /// Arbitrary precision number
    Numeric {
        /// Total digits
        precision: Option<u32>,
        /// Digits after the decimal point
        scale: Option<u32>,
    },
    /// Boolean
    Bool,
    /// Unbounded text
    Text,
    /// Variable length text with optional limit
    Varchar(Option<u32>),
    /// Blank-padded fixed length text
    Bpchar(u32),
    /// Calendar date
    Date,
    /// Time of day
    Time,
    /// Timestamp without zone
    Timestamp,
    /// Timestamp with zone (stored as UTC)
    Timestamptz,
    /// Key/value map
    Hstore,
    /// JSON text
    Json,
    /// Normalized JSON
    Jsonb,
    /// Geometry stored as hex EWKB
    Geometry {
        /// Declared type constraint (`GEOMETRY` means any)
        geometry_type: String,
        /// Declared spatial reference
        srid: Option<i32>,
    },
    /// One-dimensional array
    Array(Box<ColumnType>),
    /// User-defined domain
    Domain {
        /// Display name (`schema.name`, or `name` in `public`)
        name: String,
        /// Underlying type
        base: Box<ColumnType>,
        /// Domain-level NOT NULL
        not_null: bool,
    },
    /// Enumerated type
    Enum {
        /// Display name
        name: String,
        /// Labels in sort order
        labels: Vec<String>,
    },
}

/// Result of parsing a declared column type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredType {
    /// Resolved type
    pub ty: ColumnType,
    /// Declared as `serial`/`bigserial`/`smallserial`
    pub serial: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Numeric,
    Bool,
    Temporal,
    Other,
}

const BASIC_GEOMETRY_TYPES: &[&str] = &[
    "POINT",
    "LINESTRING",
    "POLYGON",
    "MULTIPOINT",
    "MULTILINESTRING",
    "MULTIPOLYGON",
    "GEOMETRYCOLLECTION",
];

impl ColumnType {
    /// Parse a declared type; `lookup(schema, name)` resolves user types
    pub fn parse_declared(
        decl: &str,
        lookup: &dyn Fn(&str, &str) -> Option<ColumnType>,
    ) -> Result<DeclaredType> {
        let s = decl.trim();
        if let Some(elem) = s.strip_suffix("[]") {
            let inner = Self::parse_declared(elem, lookup)?;
            if matches!(inner.ty, ColumnType::Array(_)) || inner.serial {
                return Err(Error::invalid_operation(format!("unsupported array type {}", decl)));
            }
            return Ok(DeclaredType {
                ty: ColumnType::Array(Box::new(inner.ty)),
                serial: false,
            });
        }

        let (name, mods) = match s.find('(') {
            Some(open) if s.ends_with(')') => (
                s[..open].trim(),
                s[open + 1..s.len() - 1]
                    .split(',')
                    .map(|m| m.trim().to_string())
                    .collect::<Vec<_>>(),
            ),
            _ => (s, Vec::new()),
        };
        let lower = name.to_ascii_lowercase();
        let lower = lower.strip_prefix("public.").unwrap_or(&lower).to_string();
        let modifier = |i: usize| -> Result<Option<u32>> {
            match mods.get(i) {
                None => Ok(None),
                Some(m) => m
                    .parse::<u32>()
                    .map(Some)
                    .map_err(|_| Error::parse(format!("invalid type modifier '{}'", m))),
            }
        };

        let mut serial = false;
        let ty = match lower.as_str() {
            "smallint" | "int2" => ColumnType::Int2,
            "integer" | "int" | "int4" => ColumnType::Int4,
            "bigint" | "int8" => ColumnType::Int8,
            "smallserial" | "serial2" => {
                serial = true;
                ColumnType::Int2
            }
            "serial" | "serial4" => {
                serial = true;
                ColumnType::Int4
            }
            "bigserial" | "serial8" => {
                serial = true;
                ColumnType::Int8
            }
            "real" | "float4" => ColumnType::Float4,
            "double precision" | "float8" | "float" => ColumnType::Float8,
            "numeric" | "decimal" => ColumnType::Numeric {
                precision: modifier(0)?,
                scale: if mods.is_empty() { None } else { Some(modifier(1)?.unwrap_or(0)) },
            },
            "boolean" | "bool" => ColumnType::Bool,
            "text" => ColumnType::Text,
            "varchar" | "character varying" => ColumnType::Varchar(modifier(0)?),
            "char" | "character" | "bpchar" | "\"char\"" => ColumnType::Bpchar(modifier(0)?.unwrap_or(1)),
            "date" => ColumnType::Date,
            "time" | "time without time zone" => ColumnType::Time,
            "timestamp" | "timestamp without time zone" => ColumnType::Timestamp,
            "timestamptz" | "timestamp with time zone" => ColumnType::Timestamptz,
            "hstore" => ColumnType::Hstore,
            "json" => ColumnType::Json,
            "jsonb" => ColumnType::Jsonb,
            "geometry" => ColumnType::Geometry {
                geometry_type: mods
                    .first()
                    .map(|m| m.to_ascii_uppercase())
                    .unwrap_or_else(|| "GEOMETRY".to_string()),
                srid: match mods.get(1) {
                    Some(m) => Some(
                        m.parse::<i32>()
                            .map_err(|_| Error::parse(format!("invalid SRID '{}'", m)))?,
                    ),
                    None => None,
                },
            },
            _ => {
                let (schema, rel) = split_qualified(name);
                return lookup(&schema, &rel)
                    .map(|ty| DeclaredType { ty, serial: false })
                    .ok_or_else(|| Error::not_found(format!("type \"{}\" does not exist", name)));
            }
        };
        Ok(DeclaredType { ty, serial })
    }

    /// Internal type name as a catalog would report it
    pub fn type_name(&self) -> String {
        match self {
            ColumnType::Int2 => "int2".into(),
            ColumnType::Int4 => "int4".into(),
            ColumnType::Int8 => "int8".into(),
            ColumnType::Float4 => "float4".into(),
            ColumnType::Float8 => "float8".into(),
            ColumnType::Numeric { .. } => "numeric".into(),
            ColumnType::Bool => "bool".into(),
            ColumnType::Text => "text".into(),
            ColumnType::Varchar(_) => "varchar".into(),
            ColumnType::Bpchar(_) => "bpchar".into(),
            ColumnType::Date => "date".into(),
            ColumnType::Time => "time".into(),
            ColumnType::Timestamp => "timestamp".into(),
            ColumnType::Timestamptz => "timestamptz".into(),
            ColumnType::Hstore => "hstore".into(),
            ColumnType::Json => "json".into(),
            ColumnType::Jsonb => "jsonb".into(),
            ColumnType::Geometry { .. } => "geometry".into(),
            ColumnType::Array(elem) => format!("_{}", elem.type_name()),
            ColumnType::Domain { name, .. } | ColumnType::Enum { name, .. } => name.clone(),
        }
    }

    /// Formatted type including modifiers
    pub fn formatted(&self) -> String {
        match self {
            ColumnType::Int2 => "smallint".into(),
            ColumnType::Int4 => "integer".into(),
            ColumnType::Int8 => "bigint".into(),
            ColumnType::Float4 => "real".into(),
            ColumnType::Float8 => "double precision".into(),
            ColumnType::Numeric {
                precision: Some(p),
                scale,
            } => format!("numeric({},{})", p, scale.unwrap_or(0)),
            ColumnType::Numeric { .. } => "numeric".into(),
            ColumnType::Bool => "boolean".into(),
            ColumnType::Text => "text".into(),
            ColumnType::Varchar(Some(n)) => format!("character varying({})", n),
            ColumnType::Varchar(None) => "character varying".into(),
            ColumnType::Bpchar(n) => format!("character({})", n),
            ColumnType::Date => "date".into(),
            ColumnType::Time => "time without time zone".into(),
            ColumnType::Timestamp => "timestamp without time zone".into(),
            ColumnType::Timestamptz => "timestamp with time zone".into(),
            ColumnType::Hstore => "hstore".into(),
            ColumnType::Json => "json".into(),
            ColumnType::Jsonb => "jsonb".into(),
            ColumnType::Geometry {
                geometry_type,
                srid,
            } => match srid {
                Some(srid) => format!("geometry({},{})", camel_geometry_type(geometry_type), srid),
                None if geometry_type != "GEOMETRY" => {
                    format!("geometry({})", camel_geometry_type(geometry_type))
                }
                None => "geometry".into(),
            },
            ColumnType::Array(elem) => format!("{}[]", elem.formatted()),
            ColumnType::Domain { name, .. } | ColumnType::Enum { name, .. } => name.clone(),
        }
    }

    /// Underlying type with domains stripped
    pub fn base(&self) -> &ColumnType {
        match self {
            ColumnType::Domain { base, .. } => base.base(),
            other => other,
        }
    }

    /// Domain-level NOT NULL
    pub fn domain_not_null(&self) -> bool {
        match self {
            ColumnType::Domain { not_null, base, .. } => *not_null || base.domain_not_null(),
            _ => false,
        }
    }

    fn category(&self) -> Category {
        match self.base() {
            ColumnType::Int2
            | ColumnType::Int4
            | ColumnType::Int8
            | ColumnType::Float4
            | ColumnType::Float8
            | ColumnType::Numeric { .. } => Category::Numeric,
            ColumnType::Bool => Category::Bool,
            ColumnType::Date | ColumnType::Time | ColumnType::Timestamp | ColumnType::Timestamptz => {
                Category::Temporal
            }
            _ => Category::Other,
        }
    }

    /// Validate a text value and return its canonical form
    ///
    /// The error string is the store's message for the failure.
    pub fn coerce(&self, text: &str) -> std::result::Result<String, String> {
        let invalid = |what: &str| format!("invalid input syntax for type {}: \"{}\"", what, text);
        match self {
            ColumnType::Int2 => text
                .trim()
                .parse::<i16>()
                .map(|v| v.to_string())
                .map_err(|_| invalid("smallint")),
            ColumnType::Int4 => text
                .trim()
                .parse::<i32>()
                .map(|v| v.to_string())
                .map_err(|_| invalid("integer")),
            ColumnType::Int8 => text
                .trim()
                .parse::<i64>()
                .map(|v| v.to_string())
                .map_err(|_| invalid("bigint")),
            ColumnType::Float4 => text
                .trim()
                .parse::<f32>()
                .map(|v| format_float(v as f64, format!("{}", v)))
                .map_err(|_| invalid("real")),
            ColumnType::Float8 => text
                .trim()
                .parse::<f64>()
                .map(|v| format_float(v, format!("{}", v)))
                .map_err(|_| invalid("double precision")),
            ColumnType::Numeric { precision, scale } => {
                let t = text.trim();
                let v = t.parse::<f64>().map_err(|_| invalid("numeric"))?;
                match scale {
                    Some(scale) => {
                        let out = format!("{:.*}", *scale as usize, v);
                        if let Some(p) = precision {
                            let int_digits = out
                                .trim_start_matches('-')
                                .split('.')
                                .next()
                                .map(|d| d.trim_start_matches('0').len())
                                .unwrap_or(0);
                            if int_digits > p.saturating_sub(*scale) as usize {
                                return Err("numeric field overflow".to_string());
                            }
                        }
                        Ok(out)
                    }
                    None => Ok(t.to_string()),
                }
            }
            ColumnType::Bool => match text.trim().to_ascii_lowercase().as_str() {
                "t" | "true" | "y" | "yes" | "on" | "1" => Ok("t".into()),
                "f" | "false" | "n" | "no" | "off" | "0" => Ok("f".into()),
                _ => Err(invalid("boolean")),
            },
            ColumnType::Text => Ok(text.to_string()),
            ColumnType::Varchar(limit) => {
                if let Some(n) = limit {
                    if text.chars().count() > *n as usize {
                        return Err(format!("value too long for type character varying({})", n));
                    }
                }
                Ok(text.to_string())
            }
            ColumnType::Bpchar(n) => {
                let trimmed = text.trim_end_matches(' ');
                let len = trimmed.chars().count();
                if len > *n as usize {
                    return Err(format!("value too long for type character({})", n));
                }
                Ok(format!("{}{}", trimmed, " ".repeat(*n as usize - len)))
            }
            ColumnType::Date => parse_date(text)
                .map(|d| d.format("%Y-%m-%d").to_string())
                .ok_or_else(|| invalid("date")),
            ColumnType::Time => parse_time(text)
                .map(|t| t.format("%H:%M:%S%.f").to_string())
                .ok_or_else(|| invalid("time")),
            ColumnType::Timestamp => parse_timestamp(text)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S%.f").to_string())
                .ok_or_else(|| invalid("timestamp")),
            ColumnType::Timestamptz => parse_timestamptz(text)
                .map(|t| format!("{}+00", t.format("%Y-%m-%d %H:%M:%S%.f")))
                .ok_or_else(|| invalid("timestamp with time zone")),
            ColumnType::Hstore => literal::parse_hstore(text)
                .map(|pairs| literal::format_hstore(&pairs))
                .map_err(|e| e.to_string()),
            ColumnType::Json => serde_json::from_str::<serde_json::Value>(text)
                .map(|_| text.to_string())
                .map_err(|_| invalid("json")),
            ColumnType::Jsonb => serde_json::from_str::<serde_json::Value>(text)
                .map(|v| v.to_string())
                .map_err(|_| invalid("json")),
            ColumnType::Geometry {
                geometry_type,
                srid,
            } => coerce_geometry(text, geometry_type, *srid),
            ColumnType::Array(elem) => {
                let items = literal::parse_array(text).map_err(|e| e.to_string())?;
                let coerced = items
                    .into_iter()
                    .map(|item| item.map(|s| elem.coerce(&s)).transpose())
                    .collect::<std::result::Result<Vec<_>, String>>()?;
                Ok(literal::format_array(&coerced))
            }
            ColumnType::Domain { base, .. } => base.coerce(text),
            ColumnType::Enum { name, labels } => {
                if labels.iter().any(|l| l == text) {
                    Ok(text.to_string())
                } else {
                    Err(format!("invalid input value for enum {}: \"{}\"", name, text))
                }
            }
        }
    }

    /// Order two canonical datums of this type
    pub fn compare(&self, a: &str, b: &str) -> Option<Ordering> {
        match self.category() {
            Category::Numeric => compare_numbers(a, b),
            _ => match self.base() {
                ColumnType::Enum { labels, .. } => {
                    let pa = labels.iter().position(|l| l == a)?;
                    let pb = labels.iter().position(|l| l == b)?;
                    Some(pa.cmp(&pb))
                }
                ColumnType::Bpchar(_) => Some(a.trim_end().cmp(b.trim_end())),
                _ => Some(a.cmp(b)),
            },
        }
    }

    /// Order a canonical datum of this type against a literal
    pub fn compare_literal(&self, datum: &str, lit: &Literal) -> Option<Ordering> {
        match (self.category(), lit) {
            (Category::Numeric, Literal::Int(i)) => compare_numbers(datum, &i.to_string()),
            (Category::Numeric, Literal::Float(f)) => datum.trim().parse::<f64>().ok()?.partial_cmp(f),
            (Category::Numeric, Literal::Text(s)) => compare_numbers(datum, s),
            (Category::Numeric, Literal::Bool(_)) => None,
            (Category::Bool, Literal::Bool(b)) => Some((datum == "t").cmp(b)),
            (Category::Bool, Literal::Text(s)) => {
                let other = self.coerce(s).ok()?;
                Some(datum.cmp(other.as_str()))
            }
            (Category::Bool, _) => None,
            (Category::Temporal, Literal::Text(s)) => {
                let other = self.coerce(s).ok()?;
                Some(datum.cmp(other.as_str()))
            }
            (Category::Temporal, _) => None,
            (Category::Other, Literal::Text(s)) => self.compare(datum, s),
            (Category::Other, other) => self.compare(datum, &other.to_string()),
        }
    }
}

fn format_float(v: f64, display: String) -> String {
    if v.is_nan() {
        "NaN".into()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity".into() } else { "-Infinity".into() }
    } else {
        display
    }
}

fn compare_numbers(a: &str, b: &str) -> Option<Ordering> {
    let (a, b) = (a.trim(), b.trim());
    if let (Ok(x), Ok(y)) = (a.parse::<i64>(), b.parse::<i64>()) {
        return Some(x.cmp(&y));
    }
    a.parse::<f64>().ok()?.partial_cmp(&b.parse::<f64>().ok()?)
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    let t = text.trim();
    NaiveTime::parse_from_str(t, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
        .ok()
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let t = text.trim().replacen('T', " ", 1);
    NaiveDateTime::parse_from_str(&t, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&t, "%Y-%m-%d %H:%M"))
        .ok()
        .or_else(|| parse_date(&t).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

fn parse_timestamptz(text: &str) -> Option<NaiveDateTime> {
    let t = text.trim().replacen('T', " ", 1);
    DateTime::parse_from_str(&t, "%Y-%m-%d %H:%M:%S%.f%#z")
        .map(|dt| dt.naive_utc())
        .ok()
        .or_else(|| parse_timestamp(&t))
}

fn coerce_geometry(
    text: &str,
    geometry_type: &str,
    srid: Option<i32>,
) -> std::result::Result<String, String> {
    let mut geometry = Geometry::from_hex_ewkb(text.trim()).map_err(|e| e.to_string())?;
    if BASIC_GEOMETRY_TYPES.contains(&geometry_type) {
        let actual = geometry.shape.type_name().to_ascii_uppercase();
        if actual != geometry_type {
            return Err(format!(
                "Geometry type ({}) does not match column type ({})",
                geometry.shape.type_name(),
                camel_geometry_type(geometry_type)
            ));
        }
    }
    match (srid, geometry.srid) {
        (Some(column), Some(value)) if value != 0 && value != column => Err(format!(
            "Geometry SRID ({}) does not match column SRID ({})",
            value, column
        )),
        (Some(column), None) | (Some(column), Some(0)) => {
            geometry.srid = Some(column);
            Ok(geometry.to_hex_ewkb())
        }
        _ => Ok(text.trim().to_ascii_uppercase()),
    }
}

fn camel_geometry_type(upper: &str) -> String {
    match upper {
        "POINT" => "Point",
        "LINESTRING" => "LineString",
        "POLYGON" => "Polygon",
        "MULTIPOINT" => "MultiPoint",
        "MULTILINESTRING" => "MultiLineString",
        "MULTIPOLYGON" => "MultiPolygon",
        "GEOMETRYCOLLECTION" => "GeometryCollection",
        "GEOMETRY" => "Geometry",
        other => other,
    }
    .to_string()
}

/// Split `schema.name` (either part optionally double-quoted); the schema
/// defaults to `public`
pub fn split_qualified(name: &str) -> (String, String) {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = name.trim().chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            '.' if !quoted => parts.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    parts.push(current);
    if parts.len() >= 2 {
        let rel = parts.pop().unwrap_or_default();
        let schema = parts.pop().unwrap_or_default();
        (schema, rel)
    } else {
        ("public".to_string(), parts.pop().unwrap_or_default())
    }
}

/// Quote an identifier only when a catalog would (anything other than
/// lower-case letters, digits and underscores)
pub fn quote_ident_if_needed(ident: &str) -> String {
    let plain = !ident.is_empty()
        && ident
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !ident.starts_with(|c: char| c.is_ascii_digit());
    if plain {
        ident.to_string()
    } else {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}
