//! Exporting layers into new tables

use crate::fixtures;
use geostrata::{export_layer, DataSourceUri, FeatureSource};
use geostrata_core::{Feature, Field, FieldType, Fields, Value};
use std::sync::Arc;

fn fields() -> Arc<Fields> {
    Arc::new(Fields::from_vec(vec![
        Field::new("f1", FieldType::Int, "integer"),
        Field::new("F2", FieldType::Int, "integer"),
        Field::new("f3", FieldType::Int, "integer"),
    ]))
}

fn feature(fields: &Arc<Fields>, values: [i32; 3]) -> Feature {
    let mut f = Feature::new(Arc::clone(fields));
    for (i, v) in values.into_iter().enumerate() {
        f.set_attribute(i, Value::Int(v));
    }
    f
}

#[test]
fn import_key_orders() {
    let conn = fixtures::connection();
    let fields = fields();
    let rows = [feature(&fields, [1, 2, 3]), feature(&fields, [4, 5, 6])];
    let cases: [(&str, &[usize], &[&str]); 5] = [
        ("f1", &[0], &["f1", "F2", "f3"]),
        ("\"f1\"", &[0], &["f1", "F2", "f3"]),
        ("\"f1\",\"F2\"", &[0, 1], &["f1", "F2", "f3"]),
        ("\"f1\",\"F2\",\"f3\"", &[0, 1, 2], &["f1", "F2", "f3"]),
        ("", &[0], &["id", "f1", "F2", "f3"]),
    ];
    for (n, (key, expected_key, expected_fields)) in cases.into_iter().enumerate() {
        let key_part = if key.is_empty() { String::new() } else { format!("key='{}' ", key) };
        let uri = DataSourceUri::parse(&format!(
            "{}table=\"qgis_test\".\"import_test_{}\" sql=",
            key_part, n
        ))
        .unwrap();
        assert_eq!(export_layer(&conn, &uri, &fields, &rows).unwrap(), 2);

        let source = FeatureSource::open_uri(&conn, uri);
        assert!(source.is_valid(), "{:?}", source.error());
        assert_eq!(source.primary_key_attributes().unwrap(), expected_key.to_vec(), "key {}", key);
        assert_eq!(source.fields().names(), expected_fields.to_vec());
        assert_eq!(fixtures::all_features(&source).len(), 2);
    }
}

#[test]
fn export_refuses_existing_tables() {
    let conn = fixtures::connection();
    let uri = DataSourceUri::parse("key='f1' table=\"qgis_test\".\"someData\" sql=").unwrap();
    assert!(export_layer(&conn, &uri, &fields(), &[]).is_err());
}
