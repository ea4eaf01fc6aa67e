//! Connections configured from `geostrata.toml`

use crate::fixtures::{self, SOME_DATA};
use geostrata::{Connection, DataSourceUri, DefaultsMode, NewStyle, ProviderConfig, StyleStore, VectorLayer};
use geostrata_core::RelationRef;
use std::collections::BTreeMap;
use tempfile::TempDir;

#[test]
fn config_file_drives_defaults_and_style_table() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("geostrata.toml");
    std::fs::write(
        &path,
        "default_values = \"evaluate\"\nfetch_size = 2\nstyle_table = \"qgis_test.styles\"\n",
    )
    .unwrap();
    let config = ProviderConfig::from_file(&path).unwrap();
    assert!(config.compile_expressions);

    let conn = Connection::with_config(fixtures::database(), config);
    let layer = VectorLayer::new(fixtures::open(&conn, SOME_DATA));
    assert_eq!(layer.defaults_mode(), DefaultsMode::Evaluate);
    let feature = layer.create_feature(&BTreeMap::new()).unwrap();
    assert!(feature.attributes().iter().all(|v| v.is_unset()));
    assert_eq!(fixtures::all_features(layer.source()).len(), 5);

    let styles = StyleStore::new(&conn);
    let uri = DataSourceUri::parse(SOME_DATA).unwrap();
    styles
        .save_style(&uri, &NewStyle { name: "plain".into(), ..NewStyle::default() })
        .unwrap();
    assert!(conn.storage().relation_exists(&RelationRef::table("qgis_test", "styles")));
    assert!(!conn.storage().relation_exists(&RelationRef::table("public", "layer_styles")));
}

#[test]
fn invalid_config_is_refused() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("geostrata.toml");
    std::fs::write(&path, "default_values = \"sometimes\"\n").unwrap();
    assert!(ProviderConfig::from_file(&path).is_err());

    ProviderConfig::write_default_if_missing(&dir.path().join("fresh.toml")).unwrap();
    let fresh = ProviderConfig::from_file(&dir.path().join("fresh.toml")).unwrap();
    assert_eq!(fresh, ProviderConfig::default());
}
