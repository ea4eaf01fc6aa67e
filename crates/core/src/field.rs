//! Field metadata
//!
//! - `FieldType`: generic attribute type system the provider maps store
//!   column types onto
//! - `FieldConstraints`: not-null / unique constraints tagged with origin
//! - `Field`: one column of a feature source
//! - `Fields`: ordered field list with a name→index table built once

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Generic attribute type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// Boolean
    Bool,
    /// 16/32-bit integer
    Int,
    /// 64-bit integer
    LongLong,
    /// Floating point or numeric
    Double,
    /// Text
    String,
    /// Calendar date
    Date,
    /// Time of day
    Time,
    /// Timestamp
    DateTime,
    /// String to string mapping
    Map,
    /// List of strings
    StringList,
    /// List of non-string scalars (see `Field::sub_type`)
    List,
    /// Store type with no mapping; the field is present but untyped
    Unsupported,
}

impl FieldType {
    /// True for list-valued types
    pub fn is_list(&self) -> bool {
        matches!(self, FieldType::List | FieldType::StringList)
    }

    /// True for numeric types
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Int | FieldType::LongLong | FieldType::Double)
    }
}

/// Constraint kinds a field can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Constraint {
    /// Value must not be NULL
    NotNull,
    /// Value must be unique across features
    Unique,
}

/// Who enforces a constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintOrigin {
    /// Enforced by the store (schema constraint)
    Store,
    /// Enforced by the client (layer-level rule)
    Client,
}

/// Constraint set of a field with the origin of each constraint
///
/// Store-origin constraints can never be downgraded or removed by a client
/// override; client constraints are purely additive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConstraints {
    constraints: BTreeMap<Constraint, ConstraintOrigin>,
}

impl FieldConstraints {
    /// Empty constraint set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a constraint
    ///
    /// A store-origin entry wins over a client-origin one for the same
    /// constraint, whichever arrives first.
    pub fn set_constraint(&mut self, constraint: Constraint, origin: ConstraintOrigin) {
        match self.constraints.get(&constraint) {
            Some(ConstraintOrigin::Store) => {}
            _ => {
                self.constraints.insert(constraint, origin);
            }
        }
    }

    /// Remove a client-origin constraint; store constraints stay
    pub fn remove_client_constraint(&mut self, constraint: Constraint) {
        if self.constraints.get(&constraint) == Some(&ConstraintOrigin::Client) {
            self.constraints.remove(&constraint);
        }
    }

    /// Check whether a constraint is present
    pub fn contains(&self, constraint: Constraint) -> bool {
        self.constraints.contains_key(&constraint)
    }

    /// Origin of a constraint, `None` when absent
    pub fn origin(&self, constraint: Constraint) -> Option<ConstraintOrigin> {
        self.constraints.get(&constraint).copied()
    }

    /// All constraints, ordered
    pub fn iter(&self) -> impl Iterator<Item = (Constraint, ConstraintOrigin)> + '_ {
        self.constraints.iter().map(|(c, o)| (*c, *o))
    }

    /// Check if there are no constraints
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Merge another set into this one (additive)
    pub fn merge(&mut self, other: &FieldConstraints) {
        for (c, o) in other.iter() {
            self.set_constraint(c, o);
        }
    }
}

/// One attribute column of a feature source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Column name, unique within its `Fields`
    pub name: String,
    /// Mapped generic type
    pub field_type: FieldType,
    /// Element type for list types
    pub sub_type: Option<FieldType>,
    /// Store type name shown to users (domain names are kept)
    pub type_name: String,
    /// Nominal length, -1 when the store does not define one
    pub length: i32,
    /// Numeric precision (scale), -1 when undefined
    pub precision: i32,
    /// Constraints with origins
    pub constraints: FieldConstraints,
}

impl Field {
    /// Create a field with no length, precision or constraints
    pub fn new(name: impl Into<String>, field_type: FieldType, type_name: impl Into<String>) -> Self {
        Field {
            name: name.into(),
            field_type,
            sub_type: None,
            type_name: type_name.into(),
            length: -1,
            precision: -1,
            constraints: FieldConstraints::new(),
        }
    }

    /// Builder: set length and precision
    pub fn with_length(mut self, length: i32, precision: i32) -> Self {
        self.length = length;
        self.precision = precision;
        self
    }

    /// Builder: set list element type
    pub fn with_sub_type(mut self, sub_type: FieldType) -> Self {
        self.sub_type = Some(sub_type);
        self
    }
}

/// Ordered field list
///
/// The name→index table is rebuilt whenever names change so lookups never
/// scan the list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    fields: Vec<Field>,
    index: FxHashMap<String, usize>,
}

impl Fields {
    /// Empty field list
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a vector of fields
    pub fn from_vec(fields: Vec<Field>) -> Self {
        let mut f = Fields {
            fields,
            index: FxHashMap::default(),
        };
        f.rebuild_index();
        f
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (i, field) in self.fields.iter().enumerate() {
            self.index.entry(field.name.clone()).or_insert(i);
        }
    }

    /// Append a field; returns false when the name is already taken
    pub fn append(&mut self, field: Field) -> bool {
        if self.index.contains_key(&field.name) {
            return false;
        }
        self.index.insert(field.name.clone(), self.fields.len());
        self.fields.push(field);
        true
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if there are no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field at index (negative indexes are simply out of range)
    pub fn at(&self, index: i64) -> Option<&Field> {
        usize::try_from(index).ok().and_then(|i| self.fields.get(i))
    }

    /// Mutable field at index
    pub fn at_mut(&mut self, index: usize) -> Option<&mut Field> {
        self.fields.get_mut(index)
    }

    /// Field by exact name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.index_from_name(name).map(|i| &self.fields[i])
    }

    /// Exact-name index lookup
    pub fn index_from_name(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Exact lookup, falling back to a case-insensitive match
    pub fn lookup_field(&self, name: &str) -> Option<usize> {
        self.index_from_name(name).or_else(|| {
            self.fields
                .iter()
                .position(|f| f.name.eq_ignore_ascii_case(name))
        })
    }

    /// Rename the field at `index`
    ///
    /// Fails (returns false) when the index is out of range or the new name
    /// belongs to another field.
    pub fn rename(&mut self, index: usize, name: &str) -> bool {
        match self.index_from_name(name) {
            Some(existing) if existing != index => return false,
            _ => {}
        }
        match self.fields.get_mut(index) {
            Some(field) => {
                field.name = name.to_string();
                self.rebuild_index();
                true
            }
            None => false,
        }
    }

    /// Field names in order
    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Iterate over fields
    pub fn iter(&self) -> std::slice::Iter<'_, Field> {
        self.fields.iter()
    }
}

impl<'a> IntoIterator for &'a Fields {
    type Item = &'a Field;
    type IntoIter = std::slice::Iter<'a, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Fields {
        Fields::from_vec(vec![
            Field::new("pk", FieldType::Int, "int4"),
            Field::new("name", FieldType::String, "text"),
            Field::new("Value", FieldType::Double, "float8"),
        ])
    }

    #[test]
    fn test_store_constraint_not_overridden() {
        let mut c = FieldConstraints::new();
        c.set_constraint(Constraint::NotNull, ConstraintOrigin::Store);
        c.set_constraint(Constraint::NotNull, ConstraintOrigin::Client);
        assert_eq!(c.origin(Constraint::NotNull), Some(ConstraintOrigin::Store));

        c.remove_client_constraint(Constraint::NotNull);
        assert!(c.contains(Constraint::NotNull));
    }

    #[test]
    fn test_client_constraint_is_additive() {
        let mut c = FieldConstraints::new();
        c.set_constraint(Constraint::NotNull, ConstraintOrigin::Store);
        c.set_constraint(Constraint::Unique, ConstraintOrigin::Client);
        assert!(c.contains(Constraint::NotNull));
        assert_eq!(c.origin(Constraint::Unique), Some(ConstraintOrigin::Client));
    }

    #[test]
    fn test_store_upgrades_client_constraint() {
        let mut c = FieldConstraints::new();
        c.set_constraint(Constraint::Unique, ConstraintOrigin::Client);
        c.set_constraint(Constraint::Unique, ConstraintOrigin::Store);
        assert_eq!(c.origin(Constraint::Unique), Some(ConstraintOrigin::Store));
    }

    #[test]
    fn test_lookup() {
        let f = sample();
        assert_eq!(f.index_from_name("name"), Some(1));
        assert_eq!(f.index_from_name("value"), None);
        assert_eq!(f.lookup_field("value"), Some(2));
        assert!(f.at(-1).is_none());
        assert!(f.at(3).is_none());
        assert_eq!(f.at(0).unwrap().name, "pk");
    }

    #[test]
    fn test_rename_rebuilds_index() {
        let mut f = sample();
        assert!(f.rename(1, "label"));
        assert_eq!(f.index_from_name("label"), Some(1));
        assert_eq!(f.index_from_name("name"), None);
    }

    #[test]
    fn test_rename_collision_rejected() {
        let mut f = sample();
        assert!(!f.rename(1, "pk"));
        assert!(!f.rename(10, "other"));
        // renaming to its own name is a no-op success
        assert!(f.rename(1, "name"));
        assert_eq!(f.names(), vec!["pk", "name", "Value"]);
    }

    #[test]
    fn test_append_duplicate() {
        let mut f = sample();
        assert!(!f.append(Field::new("pk", FieldType::Int, "int4")));
        assert!(f.append(Field::new("extra", FieldType::Bool, "bool")));
        assert_eq!(f.len(), 4);
    }
}
