//! Transaction validation for OCC
//!
//! Rules:
//! - First-committer-wins on the rows a transaction updates or deletes
//! - Plain reads are not tracked; a transaction scanning rows another one
//!   changes still commits
//! - Inserts never conflict here; duplicate keys surface as unique
//!   constraint violations from the store
//!
//! Validation runs inside `Storage::commit`, under the store's commit lock,
//! against a view of the latest committed state.

use geostrata_core::{RelationRef, Result, RowId, SnapshotView};
use rustc_hash::FxHashMap;
use std::fmt;

/// Row versions a transaction observed before changing the rows
pub type ReadSet = FxHashMap<(RelationRef, RowId), u64>;

/// Types of conflicts that can occur during transaction validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictType {
    /// Row was rewritten by another transaction after this one read it
    RowChanged {
        /// Relation the row was read through
        relation: RelationRef,
        /// Row identity
        row_id: RowId,
        /// Version recorded when the row was read
        read_version: u64,
        /// Latest committed version of the row
        current_version: u64,
    },

    /// Row was deleted by another transaction after this one read it
    RowDeleted {
        /// Relation the row was read through
        relation: RelationRef,
        /// Row identity
        row_id: RowId,
        /// Version recorded when the row was read
        read_version: u64,
    },
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictType::RowChanged {
                relation,
                row_id,
                read_version,
                current_version,
            } => write!(
                f,
                "row {} of {} changed (read at v{}, now v{})",
                row_id, relation, read_version, current_version
            ),
            ConflictType::RowDeleted {
                relation,
                row_id,
                read_version,
            } => write!(
                f,
                "row {} of {} was deleted (read at v{})",
                row_id, relation, read_version
            ),
        }
    }
}

/// Result of transaction validation
///
/// Accumulates all conflicts found during validation.
/// A transaction commits only if is_valid() returns true.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    /// All conflicts detected during validation
    pub conflicts: Vec<ConflictType>,
}

impl ValidationResult {
    /// Create a successful validation result (no conflicts)
    pub fn ok() -> Self {
        ValidationResult {
            conflicts: Vec::new(),
        }
    }

    /// Create a validation result with a single conflict
    pub fn conflict(conflict: ConflictType) -> Self {
        ValidationResult {
            conflicts: vec![conflict],
        }
    }

    /// Check if validation passed (no conflicts)
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Merge another validation result into this one
    pub fn merge(&mut self, other: ValidationResult) {
        self.conflicts.extend(other.conflicts);
    }

    /// Number of conflicts detected
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.conflicts.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Validate a read set against the latest committed state
///
/// For each `(relation, row) -> version` entry, the row's current version
/// must still equal the recorded one. Entries are checked in a stable
/// order so repeated validations report conflicts identically.
pub fn validate_read_set(read_set: &ReadSet, latest: &dyn SnapshotView) -> Result<ValidationResult> {
    let mut entries: Vec<_> = read_set.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut result = ValidationResult::ok();
    for ((relation, row_id), &read_version) in entries {
        match latest.row_version(relation, *row_id)? {
            Some(current) if current == read_version => {}
            Some(current) => result.conflicts.push(ConflictType::RowChanged {
                relation: relation.clone(),
                row_id: *row_id,
                read_version,
                current_version: current,
            }),
            None => result.conflicts.push(ConflictType::RowDeleted {
                relation: relation.clone(),
                row_id: *row_id,
                read_version,
            }),
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geostrata_core::predicate::Predicate;
    use geostrata_core::StoredRow;

    /// Snapshot answering row versions from a fixed table
    struct FixedVersions(FxHashMap<RowId, u64>);

    impl SnapshotView for FixedVersions {
        fn version(&self) -> u64 {
            10
        }

        fn scan(&self, _: &RelationRef, _: Option<&Predicate>) -> Result<Vec<StoredRow>> {
            Ok(Vec::new())
        }

        fn row_version(&self, _: &RelationRef, row_id: RowId) -> Result<Option<u64>> {
            Ok(self.0.get(&row_id).copied())
        }

        fn filter(&self, _: &RelationRef, _: &Predicate, rows: Vec<StoredRow>) -> Result<Vec<StoredRow>> {
            Ok(rows)
        }
    }

    fn rel() -> RelationRef {
        RelationRef::table("public", "t")
    }

    // ========================================
    // ValidationResult
    // ========================================

    #[test]
    fn test_ok_and_merge() {
        let mut result = ValidationResult::ok();
        assert!(result.is_valid());

        result.merge(ValidationResult::conflict(ConflictType::RowDeleted {
            relation: rel(),
            row_id: RowId(1),
            read_version: 2,
        }));
        assert!(!result.is_valid());
        assert_eq!(result.conflict_count(), 1);
        assert!(result.to_string().contains("was deleted"));
    }

    // ========================================
    // Read set validation
    // ========================================

    #[test]
    fn test_unchanged_rows_pass() {
        let latest = FixedVersions([(RowId(1), 3), (RowId(2), 4)].into_iter().collect());
        let mut read_set = ReadSet::default();
        read_set.insert((rel(), RowId(1)), 3);
        read_set.insert((rel(), RowId(2)), 4);

        assert!(validate_read_set(&read_set, &latest).unwrap().is_valid());
    }

    #[test]
    fn test_changed_and_deleted_rows_conflict() {
        let latest = FixedVersions([(RowId(1), 7)].into_iter().collect());
        let mut read_set = ReadSet::default();
        read_set.insert((rel(), RowId(1)), 3);
        read_set.insert((rel(), RowId(2)), 4);

        let result = validate_read_set(&read_set, &latest).unwrap();
        assert_eq!(result.conflict_count(), 2);
        assert_eq!(
            result.conflicts[0],
            ConflictType::RowChanged {
                relation: rel(),
                row_id: RowId(1),
                read_version: 3,
                current_version: 7,
            }
        );
        assert!(matches!(
            result.conflicts[1],
            ConflictType::RowDeleted { row_id: RowId(2), .. }
        ));
    }

    #[test]
    fn test_empty_read_set_is_valid() {
        let latest = FixedVersions(FxHashMap::default());
        assert!(validate_read_set(&ReadSet::default(), &latest)
            .unwrap()
            .is_valid());
    }
}
