//! MVCC row storage
//!
//! Each physical row owns a version chain. A delete pushes a tombstone so
//! snapshots opened before the delete still see the row.

use geostrata_core::{Datum, RowId};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// One committed state of a row; `None` is a tombstone
#[derive(Debug, Clone)]
pub struct RowVersion {
    /// Commit version that wrote this state
    pub version: u64,
    /// Row contents, `None` once deleted
    pub values: Option<Arc<Vec<Datum>>>,
}

/// Version chain for MVCC, stored newest-first
#[derive(Debug, Clone)]
pub struct RowChain {
    versions: VecDeque<RowVersion>,
}

impl RowChain {
    /// Create a chain with a single version
    pub fn new(version: u64, values: Vec<Datum>) -> Self {
        let mut versions = VecDeque::with_capacity(2);
        versions.push_front(RowVersion {
            version,
            values: Some(Arc::new(values)),
        });
        Self { versions }
    }

    /// Add a new version (must be newer than existing versions)
    #[inline]
    pub fn push(&mut self, version: u64, values: Option<Vec<Datum>>) {
        debug_assert!(self.latest().map_or(true, |v| v.version < version));
        self.versions.push_front(RowVersion {
            version,
            values: values.map(Arc::new),
        });
    }

    /// State visible at `max_version` (tombstones included)
    pub fn at_version(&self, max_version: u64) -> Option<&RowVersion> {
        self.versions.iter().find(|v| v.version <= max_version)
    }

    /// Live contents at `max_version`
    pub fn visible(&self, max_version: u64) -> Option<&Arc<Vec<Datum>>> {
        self.at_version(max_version).and_then(|v| v.values.as_ref())
    }

    /// Latest state
    #[inline]
    pub fn latest(&self) -> Option<&RowVersion> {
        self.versions.front()
    }

    /// Drop versions no snapshot at or above `min_version` can reach;
    /// keeps at least the newest version
    pub fn gc(&mut self, min_version: u64) {
        while self.versions.len() > 1 {
            // the second-oldest entry shadows the oldest for every reader
            // at or above min_version
            let shadowed = self
                .versions
                .get(self.versions.len() - 2)
                .map_or(false, |v| v.version <= min_version);
            if shadowed {
                self.versions.pop_back();
            } else {
                break;
            }
        }
    }

    /// Number of versions stored
    pub fn version_count(&self) -> usize {
        self.versions.len()
    }
}

/// Rows of one physical table, ordered by row id
#[derive(Debug, Clone, Default)]
pub struct TableRows {
    chains: BTreeMap<RowId, RowChain>,
}

impl TableRows {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain for a row
    pub fn chain(&self, row_id: RowId) -> Option<&RowChain> {
        self.chains.get(&row_id)
    }

    /// Write a new row state at `version`
    pub fn write(&mut self, row_id: RowId, version: u64, values: Option<Vec<Datum>>) {
        match self.chains.get_mut(&row_id) {
            Some(chain) => chain.push(version, values),
            None => {
                if let Some(values) = values {
                    self.chains.insert(row_id, RowChain::new(version, values));
                }
            }
        }
    }

    /// Rows visible at `version`, in row id order
    pub fn visible(&self, version: u64) -> impl Iterator<Item = (RowId, &Arc<Vec<Datum>>)> + '_ {
        self.chains
            .iter()
            .filter_map(move |(id, chain)| chain.visible(version).map(|values| (*id, values)))
    }

    /// Live rows at the latest version
    pub fn latest(&self) -> impl Iterator<Item = (RowId, &Arc<Vec<Datum>>)> + '_ {
        self.chains.iter().filter_map(|(id, chain)| {
            chain
                .latest()
                .and_then(|v| v.values.as_ref())
                .map(|values| (*id, values))
        })
    }

    /// Garbage-collect every chain
    pub fn gc(&mut self, min_version: u64) {
        for chain in self.chains.values_mut() {
            chain.gc(min_version);
        }
        self.chains.retain(|_, chain| {
            !(chain.version_count() == 1
                && chain.latest().map_or(true, |v| v.values.is_none() && v.version <= min_version))
        });
    }

    /// Number of row chains (live or not)
    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(v: &str) -> Vec<Datum> {
        vec![Some(v.to_string())]
    }

    #[test]
    fn test_chain_visibility() {
        let mut chain = RowChain::new(1, row("a"));
        chain.push(3, Some(row("b")));
        chain.push(5, None);

        assert!(chain.visible(0).is_none());
        assert_eq!(chain.visible(1).unwrap()[0].as_deref(), Some("a"));
        assert_eq!(chain.visible(4).unwrap()[0].as_deref(), Some("b"));
        assert!(chain.visible(5).is_none());
        assert_eq!(chain.at_version(9).unwrap().version, 5);
    }

    #[test]
    fn test_chain_gc_keeps_reachable() {
        let mut chain = RowChain::new(1, row("a"));
        chain.push(3, Some(row("b")));
        chain.push(5, Some(row("c")));
        chain.gc(4);
        // version 3 still answers readers at 4
        assert_eq!(chain.version_count(), 2);
        assert_eq!(chain.visible(4).unwrap()[0].as_deref(), Some("b"));
    }

    #[test]
    fn test_table_rows_order_and_tombstones() {
        let mut rows = TableRows::new();
        rows.write(RowId(2), 1, Some(row("two")));
        rows.write(RowId(1), 1, Some(row("one")));
        rows.write(RowId(2), 2, None);

        let at1: Vec<_> = rows.visible(1).map(|(id, _)| id).collect();
        assert_eq!(at1, vec![RowId(1), RowId(2)]);
        let at2: Vec<_> = rows.visible(2).map(|(id, _)| id).collect();
        assert_eq!(at2, vec![RowId(1)]);

        rows.gc(2);
        assert_eq!(rows.chain_count(), 1);
    }
}
