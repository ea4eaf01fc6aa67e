//! The `qgis_test` fixture database

#![allow(dead_code)]

use geostrata::{Connection, Database, FeatureRequest, FeatureSource};
use geostrata_core::{ColumnDef, Datum, Feature, RelationRef, Storage, TableDef};
use std::sync::Arc;

/// Default clause of `someData.pk`
pub const PK_CLAUSE: &str = "nextval('qgis_test.\"someData_pk_seq\"'::regclass)";

/// Descriptor of `someData` without geometry
pub const SOME_DATA: &str = "dbname='qgis_test' key='pk' table=\"qgis_test\".\"someData\" sql=";

/// Descriptor of `someData` with its point geometry
pub const SOME_DATA_GEOM: &str = "dbname='qgis_test' key='pk' srid=4326 type=POINT table=\"qgis_test\".\"someData\" (geom) sql=";

fn text(s: &str) -> Datum {
    Some(s.to_string())
}

/// Point as hex EWKB with SRID 4326
pub fn point_hex(x: f64, y: f64) -> String {
    geostrata_core::Geometry::point(x, y).with_srid(4326).to_hex_ewkb()
}

fn some_data(db: &Database) {
    db.create_table(
        &TableDef::new("qgis_test", "someData")
            .column(ColumnDef::new("pk", "serial"))
            .column(ColumnDef::new("cnt", "int4"))
            .column(ColumnDef::new("name", "text").default_expr("'qgis'::text"))
            .column(ColumnDef::new("name2", "text").default_expr("'qgis'::text"))
            .column(ColumnDef::new("num_char", "text"))
            .column(ColumnDef::new("comment", "text"))
            .column(ColumnDef::new("geom", "geometry(Point,4326)"))
            .primary_key(["pk"]),
    )
    .unwrap();
    let rel = RelationRef::table("qgis_test", "someData");
    let rows: [(&str, &str, Option<&str>, &str, &str, Option<(f64, f64)>); 5] = [
        ("5", "-200", None, "NuLl", "5", Some((-71.123, 78.23))),
        ("3", "300", Some("Pear"), "PEaR", "3", None),
        ("1", "100", Some("Orange"), "oranGe", "1", Some((-70.332, 66.33))),
        ("2", "200", Some("Apple"), "Apple", "2", Some((-68.2, 70.8))),
        ("4", "400", Some("Honey"), "Honey", "4", Some((-65.32, 78.3))),
    ];
    for (pk, cnt, name, name2, num_char, geom) in rows {
        db.insert(
            &rel,
            &[
                ("pk", text(pk)),
                ("cnt", text(cnt)),
                ("name", name.map(str::to_string)),
                ("name2", text(name2)),
                ("num_char", text(num_char)),
                ("geom", geom.map(|(x, y)| point_hex(x, y))),
            ],
        )
        .unwrap();
    }
}

fn constraints(db: &Database) {
    db.create_table(
        &TableDef::new("qgis_test", "constraints")
            .column(ColumnDef::new("gid", "serial"))
            .column(ColumnDef::new("val", "int4").unique())
            .column(ColumnDef::new("name", "text").not_null().unique())
            .column(ColumnDef::new("description", "text"))
            .primary_key(["gid"]),
    )
    .unwrap();
}

fn signed_keys(db: &Database) {
    for (table, key_type, key) in [("int2_pk", "int2", "-1"), ("int4_pk", "int4", "-2"), ("int8_pk", "int8", "-3")] {
        db.create_table(
            &TableDef::new("qgis_test", table)
                .column(ColumnDef::new("pk", key_type))
                .column(ColumnDef::new("value", "text"))
                .primary_key(["pk"]),
        )
        .unwrap();
        db.insert(
            &RelationRef::table("qgis_test", table),
            &[("pk", text(key)), ("value", text("first"))],
        )
        .unwrap();
    }
}

fn typed(db: &Database) {
    for (table, value_type) in [("dict", "hstore"), ("string_array", "text[]"), ("int_array", "int4[]")] {
        db.create_table(
            &TableDef::new("qgis_test", table)
                .column(ColumnDef::new("pk", "serial"))
                .column(ColumnDef::new("value", value_type))
                .primary_key(["pk"]),
        )
        .unwrap();
    }
}

/// Fresh fixture database
pub fn database() -> Database {
    let db = Database::new();
    db.create_schema("qgis_test");
    some_data(&db);
    constraints(&db);
    signed_keys(&db);
    typed(&db);
    db
}

/// Connection to a fresh fixture database
pub fn connection() -> Arc<Connection> {
    Connection::new(database())
}

/// Open a source, failing the test when it is invalid
pub fn open(conn: &Arc<Connection>, uri: &str) -> FeatureSource {
    let source = FeatureSource::open(conn, uri);
    assert!(source.is_valid(), "invalid source {}: {:?}", uri, source.error());
    source
}

/// Every feature of a source
pub fn all_features(source: &FeatureSource) -> Vec<Feature> {
    source
        .get_features(&FeatureRequest::new())
        .unwrap()
        .collect::<geostrata_core::Result<Vec<_>>>()
        .unwrap()
}
