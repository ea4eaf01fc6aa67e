//! Primary-key resolution and feature id encoding
//!
//! ## Key kinds
//!
//! | Key | Feature id |
//! |-----|-----------|
//! | one int2/int4 column | value reinterpreted as unsigned 32-bit |
//! | int8, compound or non-integer | first-seen order in a per-source key map, from 1 |
//! | no key (table, view or query) | position in the iteration, from 1 |
//!
//! The key map is shared by every cursor of a source, so equal key tuples
//! always get equal ids and ids map back to their key values for lookups.

use crate::uri::DataSourceUri;
use geostrata_core::{
    Datum, Error, FeatureId, Fields, Literal, Predicate, RelationInfo, Result, Storage, StoredRow, TypeKind,
};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::{debug, warn};

/// Key column values of one row
pub type KeyTuple = SmallVec<[Datum; 2]>;

/// How feature ids are derived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Single signed 16/32-bit integer column
    Int32,
    /// Key tuple mapped through the shared key map
    Mapped,
    /// Sequential ids per iteration
    Keyless,
}

/// Bidirectional key tuple ↔ feature id map
#[derive(Debug, Default)]
pub struct KeyMap {
    inner: RwLock<KeyMapInner>,
}

#[derive(Debug, Default)]
struct KeyMapInner {
    by_key: FxHashMap<KeyTuple, i64>,
    by_fid: FxHashMap<i64, KeyTuple>,
}

impl KeyMap {
    /// Id for a tuple, assigning the next one on first sight
    pub fn fid_for(&self, key: &KeyTuple) -> i64 {
        if let Some(fid) = self.inner.read().by_key.get(key) {
            return *fid;
        }
        let mut inner = self.inner.write();
        if let Some(fid) = inner.by_key.get(key) {
            return *fid;
        }
        let fid = inner.by_key.len() as i64 + 1;
        inner.by_key.insert(key.clone(), fid);
        inner.by_fid.insert(fid, key.clone());
        fid
    }

    /// Tuple an id was assigned to
    pub fn key_for(&self, fid: i64) -> Option<KeyTuple> {
        self.inner.read().by_fid.get(&fid).cloned()
    }

    /// Number of tuples seen
    pub fn len(&self) -> usize {
        self.inner.read().by_key.len()
    }

    /// True when no tuple was seen yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How a feature id is found again in the store
#[derive(Debug, Clone, PartialEq)]
pub enum FidLookup {
    /// Rows matching a key predicate
    Predicate(Predicate),
    /// The n-th row of an iteration (1-based)
    Ordinal(i64),
    /// The id cannot match any row
    Missing,
}

/// Resolved key of a feature source
#[derive(Debug)]
pub struct PrimaryKey {
    kind: KeyKind,
    names: Vec<String>,
    columns: SmallVec<[usize; 2]>,
    key_map: KeyMap,
}

impl PrimaryKey {
    /// Determine the key of a relation
    ///
    /// Declared key columns win over the relation's primary key. Unless the
    /// descriptor asks for estimated metadata, a key that is not backed by
    /// a unique constraint (or that spans an inheritance tree) is verified
    /// by counting distinct tuples.
    ///
    /// # Errors
    ///
    /// `InvalidSource` for unknown key columns or non-unique keys.
    pub fn resolve(info: &RelationInfo, uri: &DataSourceUri, storage: &dyn Storage) -> Result<Self> {
        let declared = !uri.key_columns.is_empty();
        let names: Vec<String> = if declared {
            uri.key_columns.clone()
        } else {
            info.primary_key
                .iter()
                .filter_map(|i| info.columns.get(*i).map(|c| c.name.clone()))
                .collect()
        };

        if names.is_empty() {
            debug!(target: "geostrata::provider", relation = %info.relation, "No key columns");
            return Ok(PrimaryKey {
                kind: KeyKind::Keyless,
                names,
                columns: SmallVec::new(),
                key_map: KeyMap::default(),
            });
        }

        let columns = names
            .iter()
            .map(|n| {
                info.column_index(n).ok_or_else(|| {
                    Error::invalid_source(format!(
                        "key column \"{}\" does not exist in {}",
                        n, info.relation
                    ))
                })
            })
            .collect::<Result<SmallVec<[usize; 2]>>>()?;

        let guaranteed = info.is_unique_key(&columns) && !info.has_subclass;
        if !guaranteed && !uri.estimated_metadata {
            let (rows, distinct) = storage.count_distinct(&info.relation, &names)?;
            if rows != distinct {
                warn!(
                    target: "geostrata::provider",
                    relation = %info.relation,
                    key = ?names,
                    rows,
                    distinct,
                    "Key columns are not unique"
                );
                return Err(Error::invalid_source(format!(
                    "key ({}) of {} is not unique: {} rows, {} distinct values",
                    names.join(","),
                    info.relation,
                    rows,
                    distinct
                )));
            }
        }

        let kind = if columns.len() == 1 && is_int32(&info.columns[columns[0]].kind, &info.columns[columns[0]].type_name) {
            KeyKind::Int32
        } else {
            KeyKind::Mapped
        };
        debug!(target: "geostrata::provider", relation = %info.relation, key = ?names, ?kind, "Key resolved");
        Ok(PrimaryKey {
            kind,
            names,
            columns,
            key_map: KeyMap::default(),
        })
    }

    /// How ids are derived
    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    /// Key column names as resolved at open time
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Key column positions in the relation
    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    /// Key column names as the relation currently calls them
    pub fn current_names(&self, info: &RelationInfo) -> Vec<String> {
        self.columns
            .iter()
            .filter_map(|i| info.columns.get(*i).map(|c| c.name.clone()))
            .collect()
    }

    /// Field indexes of the key columns, in key order
    pub fn attribute_indexes(&self, info: &RelationInfo, fields: &Fields) -> Vec<usize> {
        self.current_names(info)
            .iter()
            .filter_map(|n| fields.index_from_name(n))
            .collect()
    }

    /// Key values of a row
    pub fn key_of(&self, row: &StoredRow) -> KeyTuple {
        self.columns
            .iter()
            .map(|i| row.values.get(*i).cloned().flatten())
            .collect()
    }

    /// Feature id of a row; `ordinal` is the row's 1-based position in the
    /// current iteration
    pub fn fid_for_row(&self, row: &StoredRow, ordinal: i64) -> FeatureId {
        match self.kind {
            KeyKind::Int32 => {
                let parsed = row
                    .values
                    .get(self.columns[0])
                    .and_then(|d| d.as_deref())
                    .and_then(|s| s.trim().parse::<i32>().ok());
                match parsed {
                    Some(v) => FeatureId(encode_int32(v)),
                    None => FeatureId(self.key_map.fid_for(&self.key_of(row))),
                }
            }
            KeyKind::Mapped => FeatureId(self.key_map.fid_for(&self.key_of(row))),
            KeyKind::Keyless => FeatureId(ordinal),
        }
    }

    /// How to find a feature id in the store
    pub fn lookup(&self, fid: FeatureId, info: &RelationInfo) -> FidLookup {
        if fid.is_null() || fid.as_i64() < 0 {
            return FidLookup::Missing;
        }
        let names = self.current_names(info);
        match self.kind {
            KeyKind::Int32 => match (decode_int32(fid.as_i64()), names.first()) {
                (Some(v), Some(name)) => FidLookup::Predicate(Predicate::eq(name.clone(), Literal::Int(v as i64))),
                _ => self.mapped_lookup(fid, &names),
            },
            KeyKind::Mapped => self.mapped_lookup(fid, &names),
            KeyKind::Keyless => FidLookup::Ordinal(fid.as_i64()),
        }
    }

    fn mapped_lookup(&self, fid: FeatureId, names: &[String]) -> FidLookup {
        match self.key_map.key_for(fid.as_i64()) {
            Some(tuple) => FidLookup::Predicate(key_predicate(names, &tuple)),
            None => FidLookup::Missing,
        }
    }
}

/// Conjunction of `column = value` (or `IS NULL`) terms
pub fn key_predicate(names: &[String], tuple: &[Datum]) -> Predicate {
    let terms: Vec<Predicate> = names
        .iter()
        .zip(tuple)
        .map(|(name, value)| match value {
            Some(v) => Predicate::eq(name.clone(), Literal::Text(v.clone())),
            None => Predicate::IsNull {
                column: name.clone(),
                negated: false,
            },
        })
        .collect();
    Predicate::and(terms)
}

/// Signed 32-bit key → id, negative values wrap modulo 2^32
pub fn encode_int32(value: i32) -> i64 {
    value as u32 as i64
}

/// Inverse of `encode_int32`; `None` outside the unsigned 32-bit range
pub fn decode_int32(fid: i64) -> Option<i32> {
    u32::try_from(fid).ok().map(|v| v as i32)
}

fn is_int32(kind: &TypeKind, type_name: &str) -> bool {
    let base = match kind {
        TypeKind::Domain { base_type_name, .. } => base_type_name.as_str(),
        TypeKind::Base => type_name,
        _ => return false,
    };
    matches!(base, "int2" | "int4")
}
