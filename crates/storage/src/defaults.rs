//! Column default clause evaluation
//!
//! Supported clause forms:
//! - `NULL` (optionally cast)
//! - `nextval('schema."seq"'::regclass)`
//! - `'literal'::type` and bare `'literal'`
//! - numbers (optionally parenthesized and cast), `true` / `false`
//! - `now()`, `CURRENT_TIMESTAMP`, `CURRENT_DATE`, `CURRENT_TIME`
//!
//! The result is uncoerced text; the caller coerces it to the column type.

use crate::column_type::{split_qualified, ColumnType};
use crate::sequences::Sequences;
use chrono::Utc;
use geostrata_core::{Datum, Error, Result};

/// Evaluate a default clause for a column of type `ty`
pub fn evaluate(expr: &str, ty: &ColumnType, sequences: &Sequences) -> Result<Datum> {
    let trimmed = expr.trim();
    let lower = trimmed.to_ascii_lowercase();

    if lower == "null" || lower.starts_with("null::") {
        return Ok(None);
    }
    if lower.starts_with("nextval(") {
        let (seq, _) = read_quoted(&trimmed[trimmed.find('\'').unwrap_or(trimmed.len())..])
            .ok_or_else(|| Error::parse(format!("malformed nextval clause: {}", expr)))?;
        let (schema, name) = split_qualified(&seq);
        return sequences.next(&schema, &name).map(|v| Some(v.to_string()));
    }
    if trimmed.starts_with('\'') {
        let (text, _) = read_quoted(trimmed)
            .ok_or_else(|| Error::parse(format!("unterminated literal in default: {}", expr)))?;
        return Ok(Some(text));
    }
    match lower.as_str() {
        "true" => return Ok(Some("t".into())),
        "false" => return Ok(Some("f".into())),
        "now()" | "current_timestamp" | "transaction_timestamp()" | "localtimestamp" => {
            return Ok(Some(now_for(ty)));
        }
        "current_date" => return Ok(Some(Utc::now().format("%Y-%m-%d").to_string())),
        "current_time" | "localtime" => {
            return Ok(Some(Utc::now().format("%H:%M:%S%.f").to_string()))
        }
        _ => {}
    }

    let number = strip_cast(trimmed)
        .trim_start_matches('(')
        .trim_end_matches(')')
        .trim();
    if number.parse::<f64>().is_ok() {
        return Ok(Some(number.to_string()));
    }
    Err(Error::invalid_operation(format!(
        "unsupported default expression: {}",
        expr
    )))
}

fn now_for(ty: &ColumnType) -> String {
    let now = Utc::now();
    match ty.base() {
        ColumnType::Date => now.format("%Y-%m-%d").to_string(),
        ColumnType::Time => now.format("%H:%M:%S%.f").to_string(),
        ColumnType::Timestamptz => format!("{}+00", now.format("%Y-%m-%d %H:%M:%S%.f")),
        _ => now.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
    }
}

fn strip_cast(expr: &str) -> &str {
    match expr.rfind("::") {
        Some(pos) if !expr[pos..].contains('\'') => &expr[..pos],
        _ => expr,
    }
}

/// Read a single-quoted literal (`''` escapes a quote); returns the text and
/// the byte offset after the closing quote
fn read_quoted(s: &str) -> Option<(String, usize)> {
    let mut chars = s.char_indices().peekable();
    match chars.next() {
        Some((_, '\'')) => {}
        _ => return None,
    }
    let mut out = String::new();
    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            if matches!(chars.peek(), Some((_, '\''))) {
                out.push('\'');
                chars.next();
            } else {
                return Some((out, i + 1));
            }
        } else {
            out.push(c);
        }
    }
    None
}

/// Sequence a `nextval(..)` clause draws from
pub fn sequence_of(expr: &str) -> Option<(String, String)> {
    let trimmed = expr.trim();
    if !trimmed.to_ascii_lowercase().starts_with("nextval(") {
        return None;
    }
    let (seq, _) = read_quoted(&trimmed[trimmed.find('\'')?..])?;
    Some(split_qualified(&seq))
}

/// Render a serial column's default clause for sequence `schema.name`
pub fn nextval_clause(schema: &str, name: &str) -> String {
    use crate::column_type::quote_ident_if_needed;
    let qualified = if schema == "public" {
        quote_ident_if_needed(name)
    } else {
        format!(
            "{}.{}",
            quote_ident_if_needed(schema),
            quote_ident_if_needed(name)
        )
    };
    format!("nextval('{}'::regclass)", qualified.replace('\'', "''"))
}
