//! Feature iteration
//!
//! A `FeatureIterator` reads from exactly one snapshot: either a store
//! snapshot taken when the iterator was created, or the read-your-writes
//! view of a transaction at that moment. Rows are materialized from the
//! snapshot on first use and decoded in batches of `fetch_size`, so an open
//! iterator holds no store lock and never blocks writers or other cursors.
//!
//! Decoding a batch applies, in order: feature id assignment, the fid
//! filter, attribute decoding, geometry decoding, client-side expression
//! checks, and the attribute subset.

use crate::codec;
use crate::connection::Connection;
use crate::expression::Expression;
use crate::primary_key::PrimaryKey;
use crate::source::Layout;
use geostrata_core::{
    Feature, FeatureId, Geometry, Predicate, RelationRef, Result, RowId, SnapshotView, StoredRow, Value,
};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Everything needed to turn rows of one relation into features
#[derive(Debug)]
pub(crate) struct ScanPlan {
    pub relation: RelationRef,
    pub layout: Arc<Layout>,
    pub key: Arc<PrimaryKey>,
    /// Number rows over the unfiltered scan (keyless relations)
    pub numbered: bool,
    /// Filter that defines the source itself
    pub base: Option<Predicate>,
    /// Request filter pushed to the store
    pub narrowing: Option<Predicate>,
    /// Expressions re-checked on every decoded feature
    pub client_checks: Vec<Expression>,
    pub fids: Option<BTreeSet<FeatureId>>,
    /// Field indexes to decode
    pub decode: Vec<usize>,
    /// Field indexes the caller asked for; the others are unset on output
    pub keep: Option<Vec<usize>>,
    pub geometry: bool,
    pub srid: Option<i32>,
    pub limit: Option<usize>,
    pub fetch_size: usize,
}

impl ScanPlan {
    /// Materialize matching rows with their 1-based ordinals
    pub(crate) fn fetch(
        &self,
        scan: &dyn Fn(Option<&Predicate>) -> Result<Vec<StoredRow>>,
        filter: &dyn Fn(&Predicate, Vec<StoredRow>) -> Result<Vec<StoredRow>>,
    ) -> Result<Vec<(i64, StoredRow)>> {
        if self.fids.as_ref().map_or(false, |f| f.is_empty()) {
            return Ok(Vec::new());
        }
        if !self.numbered {
            let pushed = match (&self.base, &self.narrowing) {
                (Some(b), Some(n)) => Some(Predicate::and(vec![b.clone(), n.clone()])),
                (Some(p), None) | (None, Some(p)) => Some(p.clone()),
                (None, None) => None,
            };
            let rows = scan(pushed.as_ref())?;
            debug!(
                target: "geostrata::provider",
                relation = %self.relation,
                predicate = ?pushed.as_ref().map(|p| p.to_sql()),
                rows = rows.len(),
                "Rows fetched"
            );
            return Ok(rows.into_iter().zip(1i64..).map(|(r, i)| (i, r)).collect());
        }

        let numbered: Vec<(i64, StoredRow)> = scan(self.base.as_ref())?
            .into_iter()
            .zip(1i64..)
            .map(|(r, i)| (i, r))
            .collect();
        let rows = match &self.narrowing {
            None => numbered,
            Some(pred) => {
                let all: Vec<StoredRow> = numbered.iter().map(|(_, r)| r.clone()).collect();
                let kept: BTreeSet<RowId> = filter(pred, all)?.into_iter().map(|r| r.row_id).collect();
                numbered.into_iter().filter(|(_, r)| kept.contains(&r.row_id)).collect()
            }
        };
        debug!(
            target: "geostrata::provider",
            relation = %self.relation,
            rows = rows.len(),
            "Numbered rows fetched"
        );
        Ok(rows)
    }

    /// Decode one row; `None` when the row is filtered out
    fn build(&self, ordinal: i64, row: &StoredRow) -> Option<Result<Feature>> {
        let fid = self.key.fid_for_row(row, ordinal);
        if let Some(fids) = &self.fids {
            if !fids.contains(&fid) {
                return None;
            }
        }

        let fields = &self.layout.fields;
        let mut attributes = vec![Value::Unset; fields.len()];
        for &index in &self.decode {
            let (Some(field), Some(&column)) = (fields.at(index as i64), self.layout.columns.get(index)) else {
                continue;
            };
            let datum = row.values.get(column).cloned().flatten();
            match codec::decode(field, &datum) {
                Ok(value) => attributes[index] = value,
                Err(e) => return Some(Err(e)),
            }
        }

        let geometry = match (self.geometry, self.layout.geometry) {
            (true, Some(column)) => match row.values.get(column).and_then(|d| d.as_deref()) {
                Some(hex) => match Geometry::from_hex_ewkb(hex) {
                    Ok(mut g) => {
                        if g.srid.is_none() {
                            g.srid = self.srid;
                        }
                        Some(g)
                    }
                    Err(e) => return Some(Err(e)),
                },
                None => None,
            },
            _ => None,
        };

        let mut feature = match Feature::from_parts(fid, Arc::clone(fields), attributes, geometry) {
            Ok(f) => f,
            Err(e) => return Some(Err(e)),
        };

        for check in &self.client_checks {
            match check.matches(&feature) {
                Ok(true) => {}
                Ok(false) => return None,
                Err(e) => return Some(Err(e)),
            }
        }

        if let Some(keep) = &self.keep {
            for index in 0..fields.len() {
                if !keep.contains(&index) {
                    feature.set_attribute(index, Value::Unset);
                }
            }
        }
        Some(Ok(feature))
    }
}

enum Feed {
    /// Snapshot taken; rows not read yet
    Pending(Box<dyn SnapshotView>),
    Rows(std::vec::IntoIter<(i64, StoredRow)>),
    Failed(geostrata_core::Error),
    Done,
}

/// Lazy sequence of features read from one snapshot
///
/// Each item is a decoded feature or the error that stopped decoding one
/// row. Dropping the iterator releases its cursor.
pub struct FeatureIterator {
    conn: Arc<Connection>,
    cursor: Option<u64>,
    plan: ScanPlan,
    feed: Feed,
    buffer: VecDeque<Result<Feature>>,
    emitted: usize,
}

impl FeatureIterator {
    /// Iterator over a store snapshot; rows are read on first use
    pub(crate) fn deferred(conn: Arc<Connection>, plan: ScanPlan, snapshot: Box<dyn SnapshotView>) -> Self {
        Self::with_feed(conn, plan, Feed::Pending(snapshot))
    }

    /// Iterator over rows already read (transaction views)
    pub(crate) fn materialized(conn: Arc<Connection>, plan: ScanPlan, rows: Result<Vec<(i64, StoredRow)>>) -> Self {
        let feed = match rows {
            Ok(rows) => Feed::Rows(rows.into_iter()),
            Err(e) => Feed::Failed(e),
        };
        Self::with_feed(conn, plan, feed)
    }

    fn with_feed(conn: Arc<Connection>, plan: ScanPlan, feed: Feed) -> Self {
        let cursor = Some(conn.register_cursor(&plan.relation));
        FeatureIterator {
            conn,
            cursor,
            plan,
            feed,
            buffer: VecDeque::new(),
            emitted: 0,
        }
    }

    /// Release the cursor; later calls to `next` return `None`
    pub fn close(&mut self) {
        if let Some(id) = self.cursor.take() {
            self.conn.unregister_cursor(id);
        }
        self.feed = Feed::Done;
        self.buffer.clear();
    }

    /// True once the iterator is exhausted or closed
    pub fn is_closed(&self) -> bool {
        self.cursor.is_none()
    }

    /// Decode the next batch; false when no rows are left
    fn refill(&mut self) -> bool {
        if let Feed::Pending(snapshot) = &self.feed {
            let relation = self.plan.relation.clone();
            let fetched = self.plan.fetch(
                &|p| snapshot.scan(&relation, p),
                &|p, rows| snapshot.filter(&relation, p, rows),
            );
            self.feed = match fetched {
                Ok(rows) => Feed::Rows(rows.into_iter()),
                Err(e) => Feed::Failed(e),
            };
        }

        match std::mem::replace(&mut self.feed, Feed::Done) {
            Feed::Failed(e) => {
                self.buffer.push_back(Err(e));
                true
            }
            Feed::Rows(mut rows) => {
                let mut taken = 0;
                for (ordinal, row) in rows.by_ref().take(self.plan.fetch_size.max(1)) {
                    taken += 1;
                    if let Some(item) = self.plan.build(ordinal, &row) {
                        self.buffer.push_back(item);
                    }
                }
                if taken > 0 {
                    debug!(
                        target: "geostrata::provider",
                        relation = %self.plan.relation,
                        rows = taken,
                        features = self.buffer.len(),
                        "Batch decoded"
                    );
                    self.feed = Feed::Rows(rows);
                }
                taken > 0
            }
            Feed::Pending(_) | Feed::Done => false,
        }
    }
}

impl Iterator for FeatureIterator {
    type Item = Result<Feature>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cursor.is_none() {
                return None;
            }
            if self.plan.limit.map_or(false, |l| self.emitted >= l) {
                self.close();
                return None;
            }
            if let Some(item) = self.buffer.pop_front() {
                if item.is_ok() {
                    self.emitted += 1;
                }
                return Some(item);
            }
            if !self.refill() {
                self.close();
                return None;
            }
        }
    }
}

impl Drop for FeatureIterator {
    fn drop(&mut self) {
        if let Some(id) = self.cursor.take() {
            self.conn.unregister_cursor(id);
        }
    }
}

impl std::fmt::Debug for FeatureIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureIterator")
            .field("relation", &self.plan.relation)
            .field("cursor", &self.cursor)
            .field("emitted", &self.emitted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::FeatureRequest;
    use crate::source::FeatureSource;
    use geostrata_core::{ColumnDef, Storage, TableDef};
    use geostrata_storage::Database;

    static_assertions::assert_impl_all!(FeatureIterator: Send);

    fn connection(rows: usize) -> Arc<Connection> {
        let db = Database::new();
        db.create_table(
            &TableDef::new("public", "pts")
                .column(ColumnDef::new("id", "serial"))
                .column(ColumnDef::new("cnt", "int4"))
                .column(ColumnDef::new("geom", "geometry(Point,4326)"))
                .primary_key(["id"]),
        )
        .unwrap();
        let rel = RelationRef::table("public", "pts");
        for i in 0..rows {
            let hex = Geometry::point(i as f64, i as f64).with_srid(4326).to_hex_ewkb();
            db.insert(&rel, &[("cnt", Some((i * 10).to_string())), ("geom", Some(hex))])
                .unwrap();
        }
        let mut config = crate::config::ProviderConfig::default();
        config.fetch_size = 2;
        Connection::with_config(db, config)
    }

    #[test]
    fn test_batches_cover_every_row() {
        let conn = connection(5);
        let source = FeatureSource::open(&conn, "table=\"public\".\"pts\" (geom)");
        let ids: Vec<i64> = source
            .get_features(&FeatureRequest::new())
            .unwrap()
            .map(|f| f.unwrap().id().as_i64())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_cursor_released_on_drop_and_exhaustion() {
        let conn = connection(3);
        let source = FeatureSource::open(&conn, "table=\"public\".\"pts\" (geom)");
        let mut it = source.get_features(&FeatureRequest::new()).unwrap();
        assert_eq!(conn.open_cursors(), 1);
        assert!(it.next().is_some());
        drop(it);
        assert_eq!(conn.open_cursors(), 0);

        let it = source.get_features(&FeatureRequest::new()).unwrap();
        assert_eq!(it.count(), 3);
        assert_eq!(conn.open_cursors(), 0);
    }

    #[test]
    fn test_iterator_keeps_its_snapshot() {
        let conn = connection(2);
        let source = FeatureSource::open(&conn, "table=\"public\".\"pts\" (geom)");
        let mut it = source.get_features(&FeatureRequest::new()).unwrap();
        let rel = RelationRef::table("public", "pts");
        let row = conn.storage().prepare_insert(&rel, &[]).unwrap();
        conn.transaction(|txn| txn.insert(&rel, row)).unwrap();
        assert!(it.next().is_some());
        assert!(it.next().is_some());
        assert!(it.next().is_none());
        assert_eq!(source.feature_count().unwrap(), 3);
    }

    #[test]
    fn test_limit_and_subset() {
        let conn = connection(4);
        let source = FeatureSource::open(&conn, "table=\"public\".\"pts\" (geom)");
        let features: Vec<Feature> = source
            .get_features(&FeatureRequest::new().with_subset(vec![1]).no_geometry().with_limit(2))
            .unwrap()
            .map(|f| f.unwrap())
            .collect();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0].attribute(0), Some(&Value::Unset));
        assert_eq!(features[0].attribute(1), Some(&Value::Int(0)));
        assert!(features[0].geometry().is_none());
    }
}
