//! Attribute renames are atomic and persist past reopening

use crate::fixtures;
use geostrata::{Connection, FeatureRequest, FeatureSource};
use geostrata_core::{ColumnDef, RelationRef, Storage, TableDef};
use std::collections::BTreeMap;
use std::sync::Arc;

const URI: &str = "table=\"qgis_test\".\"rename_table\" sql=";

fn connection() -> Arc<Connection> {
    let db = fixtures::database();
    db.create_table(
        &TableDef::new("qgis_test", "rename_table")
            .column(ColumnDef::new("gid", "serial"))
            .column(ColumnDef::new("field1", "text"))
            .column(ColumnDef::new("field2", "text"))
            .primary_key(["gid"]),
    )
    .unwrap();
    db.insert(
        &RelationRef::table("qgis_test", "rename_table"),
        &[("field1", Some("one".into())), ("field2", Some("two".into()))],
    )
    .unwrap();
    Connection::new(db)
}

fn renames(pairs: &[(i64, &str)]) -> BTreeMap<i64, String> {
    pairs.iter().map(|(i, n)| (*i, n.to_string())).collect()
}

fn first_feature_names(source: &FeatureSource) -> Vec<String> {
    source
        .get_features(&FeatureRequest::new())
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .fields()
        .names()
}

#[test]
fn rename_sequence() {
    let conn = connection();
    let source = fixtures::open(&conn, URI);
    source.rename_attributes(&renames(&[(1, "field1"), (2, "field2")])).unwrap();

    assert!(source.rename_attributes(&renames(&[(-1, "not_a_field")])).is_err());
    assert!(source.rename_attributes(&renames(&[(100, "not_a_field")])).is_err());
    assert!(source.rename_attributes(&renames(&[(1, "field2")])).is_err());
    assert!(source.rename_attributes(&BTreeMap::new()).is_err());

    source.rename_attributes(&renames(&[(1, "newname")])).unwrap();
    assert_eq!(source.fields().at(1).unwrap().name, "newname");
    assert_eq!(first_feature_names(&source)[1], "newname");

    source
        .rename_attributes(&renames(&[(1, "newname2"), (2, "another")]))
        .unwrap();
    assert_eq!(first_feature_names(&source), vec!["gid", "newname2", "another"]);

    drop(source);
    let reopened = fixtures::open(&conn, URI);
    assert_eq!(reopened.fields().names(), vec!["gid", "newname2", "another"]);
    let feature = reopened
        .get_features(&FeatureRequest::new().with_filter_expression("\"another\" = 'two'").unwrap())
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    assert_eq!(feature.get("newname2"), Some(&geostrata_core::Value::String("one".into())));
}

#[test]
fn renamed_key_columns_still_resolve_ids() {
    let conn = connection();
    let source = fixtures::open(&conn, "key='gid' table=\"qgis_test\".\"rename_table\" sql=");
    source.rename_attributes(&renames(&[(0, "fid")])).unwrap();
    let feature = source.get_feature(geostrata_core::FeatureId(1)).unwrap().unwrap();
    assert_eq!(feature.get("fid"), Some(&geostrata_core::Value::Int(1)));
    assert_eq!(source.primary_key_attributes().unwrap(), vec![0]);
}
