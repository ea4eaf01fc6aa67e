//! Attribute values
//!
//! This module defines `Value`, the tagged union every feature attribute is
//! drawn from.
//!
//! ## Null versus unset
//!
//! `Null` is an explicit SQL NULL. `Unset` means "no value was fetched or
//! supplied": attributes outside a requested subset are `Unset`, and a
//! feature built for insertion leaves columns `Unset` so the store applies
//! its default. The two never compare equal.
//!
//! ## Equality
//!
//! - Different variants are never equal (`Int(1) != LongLong(1)`); use
//!   [`Value::compare`] for numeric comparisons across widths.
//! - `Map` equality ignores insertion order (it is a `BTreeMap`).
//! - `List` equality is element-wise and order-sensitive.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Attribute value of a feature
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// Not fetched / not supplied
    #[default]
    Unset,
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// 16 or 32-bit signed integer
    Int(i32),
    /// 64-bit signed integer
    LongLong(i64),
    /// Double precision float (also used for numeric columns)
    Double(f64),
    /// UTF-8 text
    String(String),
    /// Calendar date
    Date(NaiveDate),
    /// Time of day
    Time(NaiveTime),
    /// Date and time
    DateTime(NaiveDateTime),
    /// String to string mapping (hstore, json objects)
    Map(BTreeMap<String, String>),
    /// List of uniformly typed scalars (array columns)
    List(Vec<Value>),
}

impl Value {
    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unset => "Unset",
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::LongLong(_) => "LongLong",
            Value::Double(_) => "Double",
            Value::String(_) => "String",
            Value::Date(_) => "Date",
            Value::Time(_) => "Time",
            Value::DateTime(_) => "DateTime",
            Value::Map(_) => "Map",
            Value::List(_) => "List",
        }
    }

    /// Check if this is an explicit NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value was never fetched or supplied
    pub fn is_unset(&self) -> bool {
        matches!(self, Value::Unset)
    }

    /// NULL or unset: no usable value
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Null | Value::Unset)
    }

    /// Get as bool if this is a Bool value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view across `Int` and `LongLong`
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i as i64),
            Value::LongLong(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view across all numeric variants
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::LongLong(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Get as &str if this is a String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the mapping if this is a Map value
    pub fn as_map(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Get the elements if this is a List value
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::LongLong(_) | Value::Double(_))
    }

    /// Compare two values the way SQL does
    ///
    /// Numeric variants compare by magnitude regardless of width. Values of
    /// unrelated variants, and any NULL or unset operand, are incomparable
    /// and yield `None`.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::LongLong(a), Value::LongLong(b)) => Some(a.cmp(b)),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
                    return Some(x.cmp(&y));
                }
                a.as_f64()?.partial_cmp(&b.as_f64()?)
            }
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::DateTime(b)) => Some(a.and_time(NaiveTime::MIN).cmp(b)),
            (Value::DateTime(a), Value::Date(b)) => Some(a.cmp(&b.and_time(NaiveTime::MIN))),
            (Value::Map(a), Value::Map(b)) if a == b => Some(Ordering::Equal),
            (Value::List(a), Value::List(b)) if a == b => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Equality with numeric widening (`Int(1)` matches `LongLong(1)`)
    pub fn loosely_equals(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unset | Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            Value::Int(i) => write!(f, "{}", i),
            Value::LongLong(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

// ============================================================================
// From implementations for ergonomic API usage
// ============================================================================

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i16> for Value {
    fn from(i: i16) -> Self {
        Value::Int(i as i32)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::LongLong(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Double(f)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<NaiveTime> for Value {
    fn from(t: NaiveTime) -> Self {
        Value::Time(t)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::DateTime(dt)
    }
}

impl From<BTreeMap<String, String>> for Value {
    fn from(m: BTreeMap<String, String>) -> Self {
        Value::Map(m)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_is_not_unset() {
        assert_ne!(Value::Null, Value::Unset);
        assert!(Value::Null.is_empty());
        assert!(Value::Unset.is_empty());
        assert!(Value::Null.is_null());
        assert!(!Value::Unset.is_null());
    }

    #[test]
    fn test_different_widths_not_equal_but_comparable() {
        assert_ne!(Value::Int(1), Value::LongLong(1));
        assert!(Value::Int(1).loosely_equals(&Value::LongLong(1)));
        assert!(Value::Int(2).loosely_equals(&Value::Double(2.0)));
        assert_eq!(
            Value::LongLong(i64::MAX).compare(&Value::LongLong(i64::MAX - 1)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn test_null_is_incomparable() {
        assert_eq!(Value::Null.compare(&Value::Null), None);
        assert_eq!(Value::Int(1).compare(&Value::Null), None);
        assert_eq!(Value::Int(1).compare(&Value::from("1")), None);
    }

    #[test]
    fn test_map_equality_ignores_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert("a".to_string(), "b".to_string());
        a.insert("1".to_string(), "2".to_string());
        let mut b = BTreeMap::new();
        b.insert("1".to_string(), "2".to_string());
        b.insert("a".to_string(), "b".to_string());
        assert_eq!(Value::Map(a), Value::Map(b));
    }

    #[test]
    fn test_list_equality_is_ordered() {
        let a = Value::List(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::List(vec![Value::Int(2), Value::Int(1)]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_option() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some(3)), Value::Int(3));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Int(-5).to_string(), "-5");
        assert_eq!(Value::Double(1.5).to_string(), "1.5");
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(
            Value::List(vec![Value::from("a"), Value::from("b")]).to_string(),
            "[a, b]"
        );
    }

    #[test]
    fn test_date_compares_with_datetime() {
        let d = NaiveDate::from_ymd_opt(2004, 3, 4).unwrap();
        let dt = d.and_hms_opt(13, 41, 52).unwrap();
        assert_eq!(Value::Date(d).compare(&Value::DateTime(dt)), Some(Ordering::Less));
    }

    #[test]
    fn test_serde_round_trip() {
        let v = Value::List(vec![Value::Double(1.1), Value::Null]);
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }
}
