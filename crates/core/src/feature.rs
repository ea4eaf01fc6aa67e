//! Features
//!
//! A `Feature` is one record: an identifier, attribute values in field
//! order and an optional geometry. The attribute vector always has exactly
//! one slot per field; slots that were not fetched hold `Value::Unset`.

use crate::error::{Error, Result};
use crate::field::Fields;
use crate::geometry::Geometry;
use crate::types::FeatureId;
use crate::value::Value;
use std::sync::Arc;

/// One record of a feature source
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    id: FeatureId,
    fields: Arc<Fields>,
    attributes: Vec<Value>,
    geometry: Option<Geometry>,
}

impl Feature {
    /// New feature with every attribute unset and no identifier
    pub fn new(fields: Arc<Fields>) -> Self {
        let attributes = vec![Value::Unset; fields.len()];
        Feature {
            id: FeatureId::NULL,
            fields,
            attributes,
            geometry: None,
        }
    }

    /// Build from parts
    ///
    /// # Errors
    /// Returns `InvalidOperation` if the attribute count differs from the
    /// field count.
    pub fn from_parts(
        id: FeatureId,
        fields: Arc<Fields>,
        attributes: Vec<Value>,
        geometry: Option<Geometry>,
    ) -> Result<Self> {
        if attributes.len() != fields.len() {
            return Err(Error::invalid_operation(format!(
                "feature has {} attributes but {} fields",
                attributes.len(),
                fields.len()
            )));
        }
        Ok(Feature {
            id,
            fields,
            attributes,
            geometry,
        })
    }

    /// Feature identifier
    pub fn id(&self) -> FeatureId {
        self.id
    }

    /// Set the feature identifier
    pub fn set_id(&mut self, id: FeatureId) {
        self.id = id;
    }

    /// Field list this feature was built against
    pub fn fields(&self) -> &Arc<Fields> {
        &self.fields
    }

    /// Attribute values in field order
    pub fn attributes(&self) -> &[Value] {
        &self.attributes
    }

    /// Consume into attribute values
    pub fn into_attributes(self) -> Vec<Value> {
        self.attributes
    }

    /// Attribute by index
    pub fn attribute(&self, index: usize) -> Option<&Value> {
        self.attributes.get(index)
    }

    /// Attribute by field name (case-insensitive fallback)
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .lookup_field(name)
            .and_then(|i| self.attributes.get(i))
    }

    /// Set attribute by index; returns false when out of range
    pub fn set_attribute(&mut self, index: usize, value: impl Into<Value>) -> bool {
        match self.attributes.get_mut(index) {
            Some(slot) => {
                *slot = value.into();
                true
            }
            None => false,
        }
    }

    /// Set attribute by field name; returns false for unknown names
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> bool {
        match self.fields.lookup_field(name) {
            Some(i) => self.set_attribute(i, value),
            None => false,
        }
    }

    /// Geometry, if any
    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometry.as_ref()
    }

    /// Replace the geometry
    pub fn set_geometry(&mut self, geometry: Option<Geometry>) {
        self.geometry = geometry;
    }

    /// Rebind to a new field list of the same length (after renames)
    pub fn rebind(&mut self, fields: Arc<Fields>) -> bool {
        if fields.len() != self.attributes.len() {
            return false;
        }
        self.fields = fields;
        true
    }
}
