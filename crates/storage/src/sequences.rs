//! Named sequences
//!
//! Sequence values are handed out outside any transaction: a value taken
//! by a rolled-back insert is never reused.

use dashmap::DashMap;
use geostrata_core::{Error, Result};

/// (schema, name)
pub type SequenceKey = (String, String);

/// Sequence registry
#[derive(Debug, Default)]
pub struct Sequences {
    counters: DashMap<SequenceKey, i64>,
}

impl Sequences {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sequence whose first `next` returns `start`
    pub fn create(&self, schema: &str, name: &str, start: i64) {
        self.counters
            .insert((schema.to_string(), name.to_string()), start - 1);
    }

    /// Check whether a sequence exists
    pub fn exists(&self, schema: &str, name: &str) -> bool {
        self.counters
            .contains_key(&(schema.to_string(), name.to_string()))
    }

    /// Advance and return the next value
    pub fn next(&self, schema: &str, name: &str) -> Result<i64> {
        let mut counter = self
            .counters
            .get_mut(&(schema.to_string(), name.to_string()))
            .ok_or_else(|| {
                Error::not_found(format!("sequence \"{}.{}\" does not exist", schema, name))
            })?;
        *counter += 1;
        Ok(*counter)
    }

    /// Last value handed out (or `start - 1` before the first call)
    pub fn current(&self, schema: &str, name: &str) -> Option<i64> {
        self.counters
            .get(&(schema.to_string(), name.to_string()))
            .map(|c| *c)
    }

    /// Move the sequence forward so the next value is above `value`
    pub fn advance_past(&self, schema: &str, name: &str, value: i64) {
        if let Some(mut counter) = self
            .counters
            .get_mut(&(schema.to_string(), name.to_string()))
        {
            if *counter < value {
                *counter = value;
            }
        }
    }

    /// Move a sequence to a new schema/name (table renames)
    pub fn rename(&self, from: &SequenceKey, to: SequenceKey) {
        if let Some((_, value)) = self.counters.remove(from) {
            self.counters.insert(to, value);
        }
    }
}
