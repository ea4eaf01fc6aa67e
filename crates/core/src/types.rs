//! Identity types
//!
//! - DatabaseId: identity of a store instance (feature ids are scoped to it)
//! - FeatureId: opaque, store-scoped feature identifier
//! - RowId: physical row identity inside the store

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier of a store instance
///
/// Feature identifiers are only meaningful together with the store that
/// produced them; two stores may hand out the same numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatabaseId(Uuid);

impl DatabaseId {
    /// Create a new random DatabaseId using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from the canonical string form
    pub fn from_string(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for DatabaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Feature identifier
///
/// Positive ids come from the store (directly from an integer key or via the
/// key map); negative ids are temporary ids of features that only exist in a
/// client edit buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureId(pub i64);

impl FeatureId {
    /// Sentinel for "no identifier assigned yet"
    pub const NULL: FeatureId = FeatureId(i64::MIN);

    /// Raw value
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// True for ids that only live in a client edit buffer
    pub fn is_temporary(&self) -> bool {
        self.0 < 0 && *self != FeatureId::NULL
    }

    /// True for the "unassigned" sentinel
    pub fn is_null(&self) -> bool {
        *self == FeatureId::NULL
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "NULL")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<i64> for FeatureId {
    fn from(v: i64) -> Self {
        FeatureId(v)
    }
}

/// Physical row identity inside a store table (never reused)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(pub u64);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_id_unique() {
        assert_ne!(DatabaseId::new(), DatabaseId::new());
    }

    #[test]
    fn test_database_id_parse() {
        let id = DatabaseId::new();
        assert_eq!(DatabaseId::from_string(&id.to_string()), Some(id));
        assert_eq!(DatabaseId::from_string("nope"), None);
    }

    #[test]
    fn test_feature_id_flags() {
        assert!(FeatureId(-3).is_temporary());
        assert!(!FeatureId(3).is_temporary());
        assert!(!FeatureId::NULL.is_temporary());
        assert!(FeatureId::NULL.is_null());
        assert_eq!(FeatureId::NULL.to_string(), "NULL");
        assert_eq!(FeatureId(4294967295).to_string(), "4294967295");
    }
}
