//! Default values, constraint introspection and client-side validation

use crate::fixtures::{self, PK_CLAUSE, SOME_DATA};
use geostrata::{DefaultsMode, EditMode, VectorLayer};
use geostrata_core::{Constraint, ConstraintOrigin, Value};
use std::collections::BTreeMap;

fn clause(text: &str) -> Value {
    Value::String(text.to_string())
}

#[test]
fn some_data_fields_without_geometry() {
    let conn = fixtures::connection();
    let source = fixtures::open(&conn, SOME_DATA);
    assert_eq!(
        source.fields().names(),
        vec!["pk", "cnt", "name", "name2", "num_char", "comment"]
    );
    assert_eq!(source.geometry_column(), None);
    assert_eq!(source.primary_key_attributes().unwrap(), vec![0]);
}

#[test]
fn default_clauses_and_values() {
    let conn = fixtures::connection();
    let source = fixtures::open(&conn, SOME_DATA);
    assert_eq!(source.default_value_clause(0, DefaultsMode::Defer).as_deref(), Some(PK_CLAUSE));
    assert_eq!(source.default_value_clause(1, DefaultsMode::Defer), None);
    assert_eq!(
        source.default_value_clause(2, DefaultsMode::Defer).as_deref(),
        Some("'qgis'::text")
    );

    assert_eq!(source.default_value(0, DefaultsMode::Evaluate).unwrap(), Value::Int(6));
    assert_eq!(source.default_value(1, DefaultsMode::Evaluate).unwrap(), Value::Null);
    assert_eq!(source.default_value(2, DefaultsMode::Evaluate).unwrap(), clause("qgis"));
    assert_eq!(source.default_value_clause(0, DefaultsMode::Evaluate), None);
}

#[test]
fn create_feature_prefers_store_clauses_over_supplied_values() {
    let conn = fixtures::connection();
    let layer = VectorLayer::new(fixtures::open(&conn, SOME_DATA));
    let supplied = BTreeMap::from([(1, Value::Int(5)), (3, clause("map"))]);

    let feature = layer.create_feature(&supplied).unwrap();
    assert_eq!(
        feature.attributes(),
        &[
            clause(PK_CLAUSE),
            Value::Int(5),
            clause("'qgis'::text"),
            clause("'qgis'::text"),
            Value::Unset,
            Value::Unset,
        ]
    );

    layer.set_default_value_expression(3, Some("'mappy'")).unwrap();
    let feature = layer.create_feature(&supplied).unwrap();
    assert_eq!(feature.attribute(3), Some(&clause("mappy")));
}

#[test]
fn skip_constraint_check_follows_defaults_mode() {
    let conn = fixtures::connection();
    let source = fixtures::open(&conn, SOME_DATA);
    assert!(source.skip_constraint_check(0, Constraint::Unique, &clause(PK_CLAUSE), DefaultsMode::Defer));
    assert!(!source.skip_constraint_check(0, Constraint::Unique, &Value::Int(59), DefaultsMode::Defer));
    assert!(source.skip_constraint_check(0, Constraint::Unique, &Value::Int(59), DefaultsMode::Evaluate));
    assert!(!source.skip_constraint_check(1, Constraint::Unique, &Value::Int(59), DefaultsMode::Evaluate));
}

#[test]
fn constraints_table() {
    let conn = fixtures::connection();
    let source = fixtures::open(&conn, "key='gid' table=\"qgis_test\".\"constraints\" sql=");
    assert_eq!(source.fields().len(), 4);

    let expected = [(true, true), (false, true), (true, true), (false, false)];
    for (index, (not_null, unique)) in expected.into_iter().enumerate() {
        let constraints = source.field_constraints(index as i64);
        assert_eq!(constraints.contains(Constraint::NotNull), not_null, "field {}", index);
        assert_eq!(constraints.contains(Constraint::Unique), unique, "field {}", index);
        for (_, origin) in constraints.iter() {
            assert_eq!(origin, ConstraintOrigin::Store);
        }
    }

    let layer = VectorLayer::new(source);
    layer.set_field_constraint(3, Constraint::NotNull);
    layer.set_field_constraint(2, Constraint::NotNull);
    assert_eq!(
        layer.field_constraints(3).origin(Constraint::NotNull),
        Some(ConstraintOrigin::Client)
    );
    assert_eq!(
        layer.field_constraints(2).origin(Constraint::NotNull),
        Some(ConstraintOrigin::Store)
    );
}

#[test]
fn value_exists_and_validation_in_buffer() {
    let conn = fixtures::connection();
    let layer = VectorLayer::new(fixtures::open(&conn, SOME_DATA));
    assert!(layer.value_exists(0, &Value::Int(4)).unwrap());
    assert!(!layer.value_exists(0, &Value::Int(9)).unwrap());

    layer.start_editing(EditMode::Buffered).unwrap();
    let mut feature = layer.create_feature(&BTreeMap::new()).unwrap();
    let fid = layer.add_feature(feature.clone()).unwrap();
    feature.set_id(fid);
    assert!(layer.value_exists(0, &clause(PK_CLAUSE)).unwrap());
    assert_eq!(layer.validate_attribute(&feature, 0).unwrap(), (true, vec![]));

    layer.commit_changes().unwrap();
    assert!(layer.value_exists(0, &Value::Int(6)).unwrap());
    assert!(!layer.value_exists(0, &clause(PK_CLAUSE)).unwrap());
}

#[test]
fn evaluated_defaults_skip_client_checks() {
    let conn = fixtures::connection();
    let layer = VectorLayer::new(fixtures::open(&conn, SOME_DATA));
    layer.set_defaults_mode(DefaultsMode::Evaluate);
    let feature = layer.create_feature(&BTreeMap::from([(0, Value::Int(1))])).unwrap();
    assert_eq!(feature.attribute(0), Some(&Value::Int(6)));
    assert_eq!(feature.attribute(2), Some(&Value::Unset));
    assert!(layer.validate_attribute(&feature, 0).unwrap().0);
}
