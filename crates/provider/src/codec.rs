//! Text-protocol datum codecs
//!
//! `decode` turns a store datum into a `Value` of the field's mapped type;
//! `encode` is its inverse for writes. hstore, json and array literals go
//! through the literal codecs in `geostrata_core::literal` so quotes and
//! backslashes survive a round trip.

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use geostrata_core::literal::{format_array, format_hstore, parse_array, parse_hstore};
use geostrata_core::{Datum, Error, Field, FieldType, Result, Value};
use std::collections::BTreeMap;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

fn is_json(field: &Field) -> bool {
    matches!(field.type_name.as_str(), "json" | "jsonb")
}

/// Decode a datum for `field`
///
/// # Errors
///
/// `Parse` when the text does not match the field's type.
pub fn decode(field: &Field, datum: &Datum) -> Result<Value> {
    let text = match datum {
        None => return Ok(Value::Null),
        Some(t) => t,
    };
    match field.field_type {
        FieldType::Map if is_json(field) => decode_json(text),
        FieldType::Map => {
            // NULL hstore values have no representation in a string map
            let map = parse_hstore(text)?
                .into_iter()
                .filter_map(|(k, v)| v.map(|v| (k, v)))
                .collect::<BTreeMap<_, _>>();
            Ok(Value::Map(map))
        }
        FieldType::StringList => Ok(Value::List(
            parse_array(text)?
                .into_iter()
                .map(|e| e.map_or(Value::Null, Value::String))
                .collect(),
        )),
        FieldType::List => {
            let element = field.sub_type.unwrap_or(FieldType::String);
            parse_array(text)?
                .into_iter()
                .map(|e| match e {
                    None => Ok(Value::Null),
                    Some(s) => decode_scalar(element, &s),
                })
                .collect::<Result<Vec<_>>>()
                .map(Value::List)
        }
        other => decode_scalar(other, text),
    }
}

fn decode_scalar(field_type: FieldType, text: &str) -> Result<Value> {
    let bad = |what: &str| Error::parse(format!("invalid {} value '{}'", what, text));
    match field_type {
        FieldType::Bool => match text {
            "t" | "true" => Ok(Value::Bool(true)),
            "f" | "false" => Ok(Value::Bool(false)),
            _ => Err(bad("boolean")),
        },
        FieldType::Int => text.trim().parse::<i32>().map(Value::Int).map_err(|_| bad("integer")),
        FieldType::LongLong => text
            .trim()
            .parse::<i64>()
            .map(Value::LongLong)
            .map_err(|_| bad("bigint")),
        FieldType::Double => text
            .trim()
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| bad("double")),
        FieldType::Date => NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)
            .map(Value::Date)
            .map_err(|_| bad("date")),
        FieldType::Time => {
            let (local, offset) = split_zone(text.trim()).ok_or_else(|| bad("time"))?;
            let time = NaiveTime::parse_from_str(local, TIME_FORMAT).map_err(|_| bad("time"))?;
            Ok(Value::Time(match offset {
                Some(offset) => {
                    time.overflowing_sub_signed(chrono::Duration::seconds(offset.local_minus_utc() as i64))
                        .0
                }
                None => time,
            }))
        }
        FieldType::DateTime => {
            let t = text.trim().replacen('T', " ", 1);
            let (local, offset) = split_zone(&t).ok_or_else(|| bad("datetime"))?;
            let naive = NaiveDateTime::parse_from_str(local, DATETIME_FORMAT).map_err(|_| bad("datetime"))?;
            match offset {
                Some(offset) => offset
                    .from_local_datetime(&naive)
                    .single()
                    .map(|dt| Value::DateTime(dt.with_timezone(&Utc).naive_utc()))
                    .ok_or_else(|| bad("datetime")),
                None => Ok(Value::DateTime(naive)),
            }
        }
        _ => Ok(Value::String(text.to_string())),
    }
}

/// Split a trailing `+HH`, `-HH:MM`, `+HHMM` or `Z` zone suffix off a
/// time or timestamp
///
/// Zoned values are converted to UTC by the caller; values without a zone
/// are kept as written. `None` for a malformed offset.
fn split_zone(text: &str) -> Option<(&str, Option<FixedOffset>)> {
    if let Some(stripped) = text.strip_suffix('Z') {
        return Some((stripped, FixedOffset::east_opt(0)));
    }
    // Only look after the time part so date dashes are not mistaken for
    // offsets
    let time_start = text.find(':').map_or(0, |i| i.saturating_sub(2));
    let Some(i) = text[time_start..].rfind(['+', '-']) else {
        return Some((text, None));
    };
    let (local, zone) = text.split_at(time_start + i);
    let sign = if zone.starts_with('-') { -1 } else { 1 };
    let digits: String = zone[1..].chars().filter(|c| *c != ':').collect();
    if !matches!(digits.len(), 2 | 4) || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = if digits.len() == 4 { digits[2..].parse().ok()? } else { 0 };
    let offset = FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))?;
    Some((local, Some(offset)))
}

fn decode_json(text: &str) -> Result<Value> {
    let json: serde_json::Value =
        serde_json::from_str(text).map_err(|e| Error::parse(format!("invalid json: {}", e)))?;
    Ok(json_to_value(json))
}

fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::LongLong(i),
            None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => Value::List(items.into_iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| {
                    let text = match v {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (k, text)
                })
                .collect(),
        ),
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Unset | Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::LongLong(i) => serde_json::Value::from(*i),
        Value::Double(d) => serde_json::Value::from(*d),
        Value::Map(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        ),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        other => serde_json::Value::String(scalar_text(other).unwrap_or_default()),
    }
}

/// Text form of a scalar value, `None` for null, unset, maps and lists
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Unset | Value::Null | Value::Map(_) | Value::List(_) => None,
        Value::Bool(b) => Some(if *b { "t" } else { "f" }.to_string()),
        Value::Int(i) => Some(i.to_string()),
        Value::LongLong(i) => Some(i.to_string()),
        Value::Double(d) => Some(d.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Date(d) => Some(d.format(DATE_FORMAT).to_string()),
        Value::Time(t) => Some(t.format(TIME_FORMAT).to_string()),
        Value::DateTime(dt) => Some(dt.format(DATETIME_FORMAT).to_string()),
    }
}

/// Encode a value for `field`; null and unset encode as SQL NULL
///
/// # Errors
///
/// `UnsupportedType` for writes to unsupported fields, `ConstraintViolation`
/// (type) for a map or list written to a scalar field.
pub fn encode(field: &Field, value: &Value) -> Result<Datum> {
    if value.is_null() || value.is_unset() {
        return Ok(None);
    }
    if field.field_type == FieldType::Unsupported {
        return Err(Error::UnsupportedType {
            field: field.name.clone(),
            type_name: field.type_name.clone(),
        });
    }
    let type_error = || {
        Error::constraint(
            geostrata_core::ConstraintKind::Type,
            field.name.clone(),
            format!("cannot store {} in a {} field", value.type_name(), field.type_name),
        )
    };
    match value {
        Value::Map(map) if field.field_type == FieldType::Map => {
            if is_json(field) {
                Ok(Some(value_to_json(value).to_string()))
            } else {
                let pairs: Vec<(&String, Option<&String>)> = map.iter().map(|(k, v)| (k, Some(v))).collect();
                Ok(Some(format_hstore(&pairs)))
            }
        }
        Value::List(items) if field.field_type.is_list() => {
            let elements: Vec<Option<String>> = items.iter().map(scalar_text).collect();
            Ok(Some(format_array(&elements)))
        }
        Value::List(_) if is_json(field) => Ok(Some(value_to_json(value).to_string())),
        Value::Map(_) | Value::List(_) => Err(type_error()),
        scalar => Ok(scalar_text(scalar)),
    }
}
