//! Round trips of maps and arrays through inserts and reads

use crate::fixtures;
use geostrata::FeatureSource;
use geostrata_core::{Feature, FieldType, Value};
use std::collections::BTreeMap;

fn insert_and_read(source: &FeatureSource, value: Value) -> Value {
    let mut feature = Feature::new(source.fields());
    feature.set_attribute(1, value);
    let mut batch = [feature];
    source.add_features(&mut batch).unwrap();
    let new_id = batch[0].id();
    source
        .get_feature(new_id)
        .unwrap()
        .unwrap()
        .attribute(1)
        .cloned()
        .unwrap()
}

#[test]
fn hstore_round_trip() {
    let conn = fixtures::connection();
    let source = fixtures::open(&conn, "key='pk' table=\"qgis_test\".\"dict\" sql=");
    assert_eq!(source.fields().at(1).unwrap().field_type, FieldType::Map);

    let map = BTreeMap::from([
        ("simple".to_string(), "1".to_string()),
        ("doubleQuote".to_string(), "\"y\"".to_string()),
        ("quote".to_string(), "'q'".to_string()),
        ("backslash".to_string(), "a\\b".to_string()),
    ]);
    assert_eq!(insert_and_read(&source, Value::Map(map.clone())), Value::Map(map));
    assert_eq!(insert_and_read(&source, Value::Null), Value::Null);
}

#[test]
fn string_array_round_trip() {
    let conn = fixtures::connection();
    let source = fixtures::open(&conn, "key='pk' table=\"qgis_test\".\"string_array\" sql=");
    assert_eq!(source.fields().at(1).unwrap().field_type, FieldType::StringList);

    let list = Value::List(vec![
        Value::String("a".into()),
        Value::String("b b".into()),
        Value::String("c\"c".into()),
        Value::String("d,d".into()),
    ]);
    assert_eq!(insert_and_read(&source, list.clone()), list);
    assert_eq!(insert_and_read(&source, Value::List(vec![])), Value::List(vec![]));
}

#[test]
fn int_array_round_trip() {
    let conn = fixtures::connection();
    let source = fixtures::open(&conn, "key='pk' table=\"qgis_test\".\"int_array\" sql=");
    let field = source.fields().at(1).unwrap().clone();
    assert_eq!(field.field_type, FieldType::List);
    assert_eq!(field.sub_type, Some(FieldType::Int));

    let list = Value::List(vec![Value::Int(1), Value::Int(-2), Value::Int(i32::MAX)]);
    assert_eq!(insert_and_read(&source, list.clone()), list);
}
