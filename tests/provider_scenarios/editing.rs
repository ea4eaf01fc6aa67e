//! Edit sessions: buffered and transaction modes

use crate::fixtures::{self, SOME_DATA, SOME_DATA_GEOM};
use geostrata::{EditMode, FeatureRequest, VectorLayer};
use geostrata_core::{Feature, FeatureId, Geometry, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

#[test]
fn nested_insert_while_iterating_in_transaction_mode() {
    let conn = fixtures::connection();
    let layer = VectorLayer::new(fixtures::open(&conn, SOME_DATA_GEOM));
    layer.start_editing(EditMode::Transaction).unwrap();

    let mut seen = 0;
    for feature in layer.get_features(&FeatureRequest::new()).unwrap() {
        feature.unwrap();
        seen += 1;
        if seen == 2 {
            let mut new = Feature::new(layer.source().fields());
            new.set_attribute(0, Value::Null);
            new.set_attribute(1, Value::Int(1000));
            new.set_geometry(Some(Geometry::point(1.0, 2.0)));
            assert_eq!(layer.add_feature(new).unwrap(), FeatureId(6));
        }
    }
    assert_eq!(seen, 5);

    let inside: Vec<Feature> = layer
        .get_features(&FeatureRequest::new())
        .unwrap()
        .collect::<geostrata_core::Result<_>>()
        .unwrap();
    assert_eq!(inside.len(), 6);
    assert_eq!(fixtures::all_features(layer.source()).len(), 5);

    layer.commit_changes().unwrap();
    let written = layer.get_feature(FeatureId(6)).unwrap().unwrap();
    assert_eq!(written.attribute(1), Some(&Value::Int(1000)));
    assert_eq!(written.geometry().and_then(|g| g.srid), Some(4326));
}

#[test]
fn readers_on_other_threads_never_block_the_session() {
    let conn = fixtures::connection();
    let layer = Arc::new(VectorLayer::new(fixtures::open(&conn, SOME_DATA)));
    layer.start_editing(EditMode::Transaction).unwrap();
    layer.delete_feature(FeatureId(3)).unwrap();

    let reader = {
        let source = Arc::clone(layer.source());
        thread::spawn(move || fixtures::all_features(&source).len())
    };
    layer
        .change_attribute_value(FeatureId(1), 1, Value::Int(101))
        .unwrap();
    assert_eq!(reader.join().unwrap(), 5);

    layer.commit_changes().unwrap();
    assert_eq!(fixtures::all_features(layer.source()).len(), 4);
    assert_eq!(conn.metrics().committed, 1);
}

#[test]
fn failed_buffered_commit_keeps_the_buffer() {
    let conn = fixtures::connection();
    let layer = VectorLayer::new(fixtures::open(&conn, "key='gid' table=\"qgis_test\".\"constraints\" sql="));
    layer.start_editing(EditMode::Buffered).unwrap();
    let adjusted = layer
        .create_feature(&BTreeMap::from([(2, Value::String("a".into()))]))
        .unwrap();
    assert_eq!(adjusted.attribute(2), Some(&Value::String("a".into())));
    for _ in 0..2 {
        let mut feature = Feature::new(layer.source().fields());
        feature.set_attribute(2, Value::String("a".into()));
        layer.add_feature(feature).unwrap();
    }

    let err = layer.commit_changes().unwrap_err();
    assert!(err.is_constraint_violation(), "{}", err);
    assert_eq!(layer.edit_mode(), Some(EditMode::Buffered));
    assert!(fixtures::all_features(layer.source()).is_empty());

    let buffered: Vec<FeatureId> = layer
        .get_features(&FeatureRequest::new())
        .unwrap()
        .map(|f| f.unwrap().id())
        .collect();
    assert_eq!(buffered.len(), 2);
    layer.change_attribute_value(buffered[1], 2, Value::String("b".into())).unwrap();
    layer.commit_changes().unwrap();
    assert_eq!(fixtures::all_features(layer.source()).len(), 2);
}

#[test]
fn buffered_geometry_changes() {
    let conn = fixtures::connection();
    let layer = VectorLayer::new(fixtures::open(&conn, SOME_DATA_GEOM));
    layer.start_editing(EditMode::Buffered).unwrap();
    layer
        .change_geometry(FeatureId(3), Some(Geometry::point(10.0, 20.0)))
        .unwrap();
    layer.change_geometry(FeatureId(1), None).unwrap();
    let moved = layer.get_feature(FeatureId(3)).unwrap().unwrap();
    assert_eq!(moved.geometry().map(|g| g.to_wkt()), Some("Point (10 20)".to_string()));

    layer.commit_changes().unwrap();
    let source = layer.source();
    let moved = source.get_feature(FeatureId(3)).unwrap().unwrap();
    assert_eq!(moved.geometry().map(|g| g.to_wkt()), Some("Point (10 20)".to_string()));
    assert!(source.get_feature(FeatureId(1)).unwrap().unwrap().geometry().is_none());
}

#[test]
fn sessions_refuse_read_only_sources() {
    let conn = fixtures::connection();
    let source = geostrata::FeatureSource::open(&conn, "table=\"qgis_test\".\"nope\" sql=");
    let layer = VectorLayer::new(source);
    assert!(layer.start_editing(EditMode::Buffered).is_err());
    assert!(!layer.is_editing());
}
