//! Integration tests for the storage layer
//!
//! These tests verify that Database works correctly as a complete system:
//! - Constraint enforcement at commit (not-null, primary key, unique)
//! - Updatable views and inheritance scans
//! - Default clauses and sequences
//! - Snapshot isolation under concurrent commits
//! - Atomic batches and column renames

use std::sync::Arc;
use std::thread;

use geostrata_core::predicate::{CompareOp, Literal, Predicate};
use geostrata_core::{
    ColumnDef, ConstraintKind, Error, RelationKind, RelationRef, RowWrite, Storage, TableDef,
    TypeKind, WriteBatch,
};
use geostrata_storage::Database;

// ============================================================================
// Helper Functions
// ============================================================================

fn some_data() -> (Database, RelationRef) {
    let db = Database::new();
    db.create_schema("qgis_test");
    db.create_table(
        &TableDef::new("qgis_test", "someData")
            .column(ColumnDef::new("pk", "serial"))
            .column(ColumnDef::new("cnt", "integer"))
            .column(ColumnDef::new("name", "text").default_expr("'qgis'::text"))
            .column(ColumnDef::new("geom", "geometry(Point,4326)"))
            .primary_key(["pk"]),
    )
    .unwrap();
    let rel = RelationRef::table("qgis_test", "someData");
    for (pk, cnt) in [(5, "-200"), (3, "300"), (1, "100")] {
        db.insert(&rel, &[("pk", Some(pk.to_string())), ("cnt", Some(cnt.to_string()))])
            .unwrap();
    }
    (db, rel)
}

fn insert_batch(db: &Database, rel: &RelationRef, values: &[(&str, Option<&str>)]) -> WriteBatch {
    let owned: Vec<(String, Option<String>)> = values
        .iter()
        .map(|(n, v)| (n.to_string(), v.map(String::from)))
        .collect();
    let row = db.prepare_insert(rel, &owned).unwrap();
    let mut batch = WriteBatch::new();
    batch.push(RowWrite::Insert {
        relation: rel.clone(),
        row,
    });
    batch
}

// ============================================================================
// Constraint Tests
// ============================================================================

mod constraints {
    use super::*;

    #[test]
    fn test_describe_serial_default_clause() {
        let (db, rel) = some_data();
        let info = db.describe(&rel).unwrap();
        assert_eq!(info.kind, RelationKind::Table);
        assert_eq!(info.primary_key, vec![0]);
        assert!(info.columns[0].not_null);
        assert_eq!(
            info.columns[0].default_expr.as_deref(),
            Some("nextval('qgis_test.\"someData_pk_seq\"'::regclass)")
        );
        assert_eq!(info.columns[2].default_expr.as_deref(), Some("'qgis'::text"));
    }

    #[test]
    fn test_sequence_continues_after_loaded_rows() {
        let (db, rel) = some_data();
        assert_eq!(db.evaluate_default(&rel, "pk").unwrap().as_deref(), Some("6"));
        assert_eq!(db.evaluate_default(&rel, "name").unwrap().as_deref(), Some("qgis"));
        assert_eq!(db.evaluate_default(&rel, "cnt").unwrap(), None);
    }

    #[test]
    fn test_duplicate_primary_key_rejected_at_commit() {
        let (db, rel) = some_data();
        let batch = insert_batch(&db, &rel, &[("pk", Some("3"))]);
        let err = db.commit(&batch, &|_| Ok(())).unwrap_err();
        match err {
            Error::ConstraintViolation { kind, .. } => assert_eq!(kind, ConstraintKind::Unique),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(db.snapshot().scan(&rel, None).unwrap().len(), 3);
    }

    #[test]
    fn test_not_null_checked_on_prepare() {
        let (db, rel) = some_data();
        let err = db
            .prepare_insert(&rel, &[("pk".to_string(), None)])
            .unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn test_type_errors_are_constraint_violations() {
        let (db, rel) = some_data();
        let err = db
            .prepare_insert(&rel, &[("cnt".to_string(), Some("abc".to_string()))])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ConstraintViolation {
                kind: ConstraintKind::Type,
                ..
            }
        ));
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let (db, rel) = some_data();
        let mut batch = insert_batch(&db, &rel, &[("cnt", Some("7"))]);
        for write in insert_batch(&db, &rel, &[("pk", Some("1"))]).iter() {
            batch.push(write.clone());
        }
        assert!(db.commit(&batch, &|_| Ok(())).is_err());
        let rows = db.snapshot().scan(&rel, None).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(db.current_version(), 3);
    }

    #[test]
    fn test_validator_failure_applies_nothing() {
        let (db, rel) = some_data();
        let batch = insert_batch(&db, &rel, &[("cnt", Some("7"))]);
        let err = db
            .commit(&batch, &|_| Err(Error::Conflict("stale read".into())))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(db.snapshot().scan(&rel, None).unwrap().len(), 3);
    }
}

// ============================================================================
// Relation Kind Tests
// ============================================================================

mod relations {
    use super::*;

    #[test]
    fn test_view_insert_fills_hidden_and_omitted_columns() {
        let db = Database::new();
        db.create_table(
            &TableDef::new("public", "bikes")
                .column(ColumnDef::new("pk", "serial"))
                .column(ColumnDef::new("name", "varchar(10)"))
                .column(ColumnDef::new("hidden", "text").default_expr("'x'")),
        )
        .unwrap();
        let base = RelationRef::table("public", "bikes");
        db.create_view("public", "bikes_view", &base, &[("pk", "pk"), ("name", "label")])
            .unwrap();
        let view = RelationRef::table("public", "bikes_view");

        let info = db.describe(&view).unwrap();
        assert_eq!(info.kind, RelationKind::View);
        assert!(info.primary_key.is_empty());
        assert_eq!(info.columns[1].name, "label");

        let batch = insert_batch(&db, &view, &[("label", Some("fast"))]);
        db.commit(&batch, &|_| Ok(())).unwrap();

        let rows = db.snapshot().scan(&base, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values[0].as_deref(), Some("1"));
        assert_eq!(rows[0].values[2].as_deref(), Some("x"));
    }

    #[test]
    fn test_parent_scan_includes_children() {
        let db = Database::new();
        db.create_schema("qgis_test");
        db.create_table(
            &TableDef::new("qgis_test", "base_table")
                .column(ColumnDef::new("gid", "serial"))
                .column(ColumnDef::new("code", "text"))
                .primary_key(["gid"]),
        )
        .unwrap();
        db.create_table(
            &TableDef::new("qgis_test", "child_table")
                .column(ColumnDef::new("extra", "integer"))
                .inherits("qgis_test", "base_table"),
        )
        .unwrap();
        let base = RelationRef::table("qgis_test", "base_table");
        let child = RelationRef::table("qgis_test", "child_table");
        db.insert(&base, &[("gid", Some("1".into()))]).unwrap();
        // same key in the child: allowed, uniqueness is per physical table
        db.insert(&child, &[("gid", Some("1".into())), ("extra", Some("5".into()))])
            .unwrap();

        assert!(db.describe(&base).unwrap().has_subclass);
        let rows = db.snapshot().scan(&base, None).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.values.len() == 2));
        assert_eq!(db.count_distinct(&base, &["gid".to_string()]).unwrap(), (2, 1));
        assert_eq!(db.snapshot().scan(&child, None).unwrap().len(), 1);
    }

    #[test]
    fn test_query_relations_are_read_only() {
        let db = Database::new();
        db.register_query(
            "(SELECT 1 AS \"Id1\", 2 AS \"Id2\")",
            &[("Id1", "int4"), ("Id2", "int8")],
            vec![vec![Some("1".into()), Some("2".into())]],
        )
        .unwrap();
        let rel = RelationRef::query("SELECT 1 AS \"Id1\",  2 AS \"Id2\"");
        let info = db.describe(&rel).unwrap();
        assert_eq!(info.kind, RelationKind::Query);
        assert!(!info.writable);
        assert_eq!(db.snapshot().scan(&rel, None).unwrap().len(), 1);
        assert!(db.prepare_insert(&rel, &[]).is_err());
    }

    #[test]
    fn test_domains_report_base_type() {
        let db = Database::new();
        db.create_schema("qgis_test");
        db.create_domain("qgis_test", "var_char_domain_6", "varchar(6)", false)
            .unwrap();
        db.create_table(
            &TableDef::new("qgis_test", "domains")
                .column(ColumnDef::new("fld", "qgis_test.var_char_domain_6")),
        )
        .unwrap();
        let info = db.describe(&RelationRef::table("qgis_test", "domains")).unwrap();
        let col = &info.columns[0];
        assert_eq!(col.type_name, "qgis_test.var_char_domain_6");
        assert_eq!(
            col.kind,
            TypeKind::Domain {
                base_type_name: "varchar".into(),
                base_formatted: "character varying(6)".into()
            }
        );
    }
}

// ============================================================================
// Scan and Snapshot Tests
// ============================================================================

mod scans {
    use super::*;

    #[test]
    fn test_predicate_scan() {
        let (db, rel) = some_data();
        let pred = Predicate::Compare {
            column: "cnt".into(),
            op: CompareOp::Ge,
            literal: Literal::Int(100),
        };
        let rows = db.snapshot().scan(&rel, Some(&pred)).unwrap();
        let pks: Vec<_> = rows.iter().map(|r| r.values[0].clone().unwrap()).collect();
        assert_eq!(pks, vec!["3", "1"]);
    }

    #[test]
    fn test_concurrent_commits_never_disturb_open_snapshot() {
        let (db, rel) = some_data();
        let db = Arc::new(db);
        let snapshot = db.snapshot();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let db = Arc::clone(&db);
                let rel = rel.clone();
                thread::spawn(move || {
                    for j in 0..10 {
                        let cnt = (i * 100 + j).to_string();
                        db.insert(&rel, &[("cnt", Some(cnt))]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(snapshot.scan(&rel, None).unwrap().len(), 3);
        let rows = db.snapshot().scan(&rel, None).unwrap();
        assert_eq!(rows.len(), 43);
        // serial values stay unique under contention
        assert_eq!(db.count_distinct(&rel, &["pk".to_string()]).unwrap(), (43, 43));
    }

    #[test]
    fn test_rename_columns_is_atomic() {
        let (db, rel) = some_data();
        let err = db.rename_columns(
            &rel,
            &[("cnt".into(), "count".into()), ("name".into(), "pk".into())],
        );
        assert!(err.is_err());
        assert_eq!(db.describe(&rel).unwrap().columns[1].name, "cnt");

        db.rename_columns(&rel, &[("cnt".into(), "count".into())]).unwrap();
        assert_eq!(db.describe(&rel).unwrap().columns[1].name, "count");
    }

    #[test]
    fn test_update_and_delete() {
        let (db, rel) = some_data();
        let rows = db.snapshot().scan(&rel, None).unwrap();
        let updated = db
            .prepare_update(&rel, &rows[0], &[("cnt".into(), Some("42".into()))])
            .unwrap();
        let mut batch = WriteBatch::new();
        batch.push(RowWrite::Update {
            relation: rel.clone(),
            row: updated,
        });
        batch.push(RowWrite::Delete {
            relation: rel.clone(),
            row_id: rows[1].row_id,
        });
        db.commit(&batch, &|_| Ok(())).unwrap();

        let after = db.snapshot().scan(&rel, None).unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].values[1].as_deref(), Some("42"));

        db.vacuum(db.current_version());
        assert_eq!(db.snapshot().scan(&rel, None).unwrap().len(), 2);
    }
}
