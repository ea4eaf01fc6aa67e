//! Feature id encoding for signed, wide, compound and missing keys

use crate::fixtures::{self, PK_CLAUSE};
use geostrata::{Connection, FeatureRequest, FeatureSource, KeyKind};
use geostrata_core::{ColumnDef, Feature, FeatureId, RelationRef, Storage, TableDef, Value};

fn table_uri(table: &str) -> String {
    format!("key='pk' table=\"qgis_test\".\"{}\" sql=", table)
}

#[test]
fn signed_small_keys_wrap_to_unsigned_ids() {
    let conn = fixtures::connection();
    for (table, expected) in [("int2_pk", 4294967295_i64), ("int4_pk", 4294967294_i64)] {
        let source = fixtures::open(&conn, &table_uri(table));
        assert_eq!(source.key_kind(), Some(KeyKind::Int32));
        let features = fixtures::all_features(&source);
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].id(), FeatureId(expected), "{}", table);

        let again = source.get_feature(FeatureId(expected)).unwrap().unwrap();
        assert_eq!(again.get("value"), Some(&Value::String("first".into())));
    }
}

#[test]
fn wide_keys_go_through_the_key_map() {
    let conn = fixtures::connection();
    let source = fixtures::open(&conn, &table_uri("int8_pk"));
    assert_eq!(source.key_kind(), Some(KeyKind::Mapped));
    let features = fixtures::all_features(&source);
    assert_eq!(features[0].id(), FeatureId(1));
    assert_eq!(features[0].attribute(0), Some(&Value::LongLong(-3)));

    let mut new = Feature::new(source.fields());
    new.set_attribute(0, Value::LongLong(i64::MIN));
    new.set_attribute(1, Value::String("second".into()));
    let mut batch = [new];
    source.add_features(&mut batch).unwrap();
    assert_eq!(batch[0].id(), FeatureId(2));
    assert_eq!(
        source.get_feature(FeatureId(2)).unwrap().unwrap().attribute(0),
        Some(&Value::LongLong(i64::MIN))
    );
}

#[test]
fn compound_keys_are_stable_across_requests() {
    let conn = fixtures::connection();
    let source = fixtures::open(&conn, "key='name2,num_char' table=\"qgis_test\".\"someData\" sql=");
    assert_eq!(source.key_kind(), Some(KeyKind::Mapped));
    assert_eq!(source.primary_key_attributes().unwrap(), vec![3, 4]);

    let first: Vec<FeatureId> = fixtures::all_features(&source).iter().map(Feature::id).collect();
    let second: Vec<FeatureId> = fixtures::all_features(&source).iter().map(Feature::id).collect();
    assert_eq!(first, second);

    let honey = source
        .get_features(&FeatureRequest::new().with_filter_expression("\"name\" = 'Honey'").unwrap())
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    let by_id = source.get_feature(honey.id()).unwrap().unwrap();
    assert_eq!(by_id.get("pk"), Some(&Value::Int(4)));
}

#[test]
fn keyless_views_number_rows_per_request() {
    let db = fixtures::database();
    db.create_view(
        "qgis_test",
        "some_data_view",
        &geostrata_core::RelationRef::table("qgis_test", "someData"),
        &[("cnt", "cnt"), ("name", "name")],
    )
    .unwrap();
    let conn = geostrata::Connection::new(db);
    let source = fixtures::open(&conn, "table=\"qgis_test\".\"some_data_view\" sql=");
    assert_eq!(source.key_kind(), Some(KeyKind::Keyless));
    assert!(!source.is_writable());

    let ids: Vec<i64> = fixtures::all_features(&source).iter().map(|f| f.id().as_i64()).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);

    let filtered: Vec<i64> = source
        .get_features(&FeatureRequest::new().with_filter_expression("\"cnt\" >= 300").unwrap())
        .unwrap()
        .map(|f| f.unwrap().id().as_i64())
        .collect();
    assert_eq!(filtered, vec![2, 5]);
}

#[test]
fn inserted_serial_keys_come_back_as_ids() {
    let conn = fixtures::connection();
    let source = fixtures::open(&conn, fixtures::SOME_DATA);
    let mut feature = Feature::new(source.fields());
    feature.set_attribute(0, Value::String(PK_CLAUSE.into()));
    feature.set_attribute(1, Value::Int(-1));
    let mut batch = [feature];
    source.add_features(&mut batch).unwrap();
    assert_eq!(batch[0].id(), FeatureId(6));
    assert_eq!(batch[0].attribute(0), Some(&Value::Int(6)));
    assert_eq!(batch[0].attribute(2), Some(&Value::String("qgis".into())));
}

fn ids(source: &FeatureSource) -> Vec<i64> {
    fixtures::all_features(source).iter().map(|f| f.id().as_i64()).collect()
}

#[test]
fn keyless_tables_number_rows_from_one() {
    let db = fixtures::database();
    db.create_table(
        &TableDef::new("qgis_test", "no_key")
            .column(ColumnDef::new("name", "text"))
            .column(ColumnDef::new("cnt", "int4")),
    )
    .unwrap();
    let rel = RelationRef::table("qgis_test", "no_key");
    for (name, cnt) in [("a", "10"), ("b", "20"), ("c", "30")] {
        db.insert(&rel, &[("name", Some(name.into())), ("cnt", Some(cnt.into()))])
            .unwrap();
    }
    let conn = Connection::new(db);
    let source = fixtures::open(&conn, "table=\"qgis_test\".\"no_key\" sql=");
    assert_eq!(source.key_kind(), Some(KeyKind::Keyless));
    assert!(!source.is_writable());

    assert_eq!(ids(&source), vec![1, 2, 3]);
    assert_eq!(ids(&source), vec![1, 2, 3]);

    let second = source.get_feature(FeatureId(2)).unwrap().unwrap();
    assert_eq!(second.get("name"), Some(&Value::String("b".into())));
    assert!(source.get_feature(FeatureId(4)).unwrap().is_none());

    let filtered: Vec<i64> = source
        .get_features(&FeatureRequest::new().with_filter_expression("\"cnt\" > 15").unwrap())
        .unwrap()
        .map(|f| f.unwrap().id().as_i64())
        .collect();
    assert_eq!(filtered, vec![2, 3]);
}

#[test]
fn keyless_queries_number_rows_from_one() {
    let db = fixtures::database();
    db.register_query(
        "(SELECT n FROM numbers)",
        &[("n", "int8")],
        vec![vec![Some("70".into())], vec![Some("80".into())]],
    )
    .unwrap();
    let conn = Connection::new(db);
    let source = fixtures::open(&conn, "table=\"(SELECT n FROM numbers)\" sql=");
    assert_eq!(source.key_kind(), Some(KeyKind::Keyless));
    assert_eq!(ids(&source), vec![1, 2]);
    assert_eq!(ids(&source), vec![1, 2]);
}

fn inheritance(db: &geostrata::Database) -> (RelationRef, RelationRef) {
    db.create_table(
        &TableDef::new("qgis_test", "base_table")
            .column(ColumnDef::new("gid", "serial"))
            .column(ColumnDef::new("code", "text"))
            .primary_key(["gid"]),
    )
    .unwrap();
    db.create_table(
        &TableDef::new("qgis_test", "child_table")
            .column(ColumnDef::new("extra", "int4"))
            .inherits("qgis_test", "base_table"),
    )
    .unwrap();
    let base = RelationRef::table("qgis_test", "base_table");
    let child = RelationRef::table("qgis_test", "child_table");
    db.insert(&base, &[("gid", Some("1".into())), ("code", Some("a".into()))])
        .unwrap();
    db.insert(&base, &[("gid", Some("2".into())), ("code", Some("b".into()))])
        .unwrap();
    db.insert(&child, &[("gid", Some("3".into())), ("code", Some("c".into()))])
        .unwrap();
    (base, child)
}

const BASE_TABLE: &str = "key='gid' table=\"qgis_test\".\"base_table\" sql=";

#[test]
fn unique_key_across_an_inheritance_tree_is_accepted() {
    let db = fixtures::database();
    inheritance(&db);
    let conn = Connection::new(db);
    let source = fixtures::open(&conn, BASE_TABLE);
    let mut found = ids(&source);
    found.sort_unstable();
    assert_eq!(found, vec![1, 2, 3]);
}

#[test]
fn duplicate_key_in_a_child_table_invalidates_the_parent() {
    let db = fixtures::database();
    let (_, child) = inheritance(&db);
    db.insert(&child, &[("gid", Some("1".into())), ("code", Some("dup".into()))])
        .unwrap();
    assert_eq!(db.count_distinct(&RelationRef::table("qgis_test", "base_table"), &["gid".to_string()]).unwrap(), (4, 3));
    let conn = Connection::new(db);

    let checked = FeatureSource::open(&conn, BASE_TABLE);
    assert!(!checked.is_valid());
    assert!(checked.error().unwrap_or_default().contains("is not unique"), "{:?}", checked.error());

    let estimated = fixtures::open(&conn, &format!("estimatedmetadata=\"true\" {}", BASE_TABLE));
    assert_eq!(fixtures::all_features(&estimated).len(), 4);
}
