//! Styles stored next to the data

use crate::fixtures;
use geostrata::{DataSourceUri, NewStyle, StyleStore};

fn layer_uri() -> DataSourceUri {
    DataSourceUri::parse(fixtures::SOME_DATA_GEOM).unwrap()
}

#[test]
fn style_lifecycle() {
    let conn = fixtures::connection();
    let styles = StyleStore::new(&conn);
    let uri = layer_uri();

    let list = styles.list_styles(&uri);
    assert_eq!(list.related_count, -1);
    assert!(list.ids.is_empty() && list.names.is_empty() && list.descriptions.is_empty());
    assert!(!list.error.is_empty());

    assert!(styles.get_style("1").is_err());

    let style = NewStyle {
        name: "by day".into(),
        description: "faded greens and elegant patterns".into(),
        qml: "<!DOCTYPE qgis PUBLIC 'http://mrcc.com/qgis.dtd' 'SYSTEM'><qgis/>".into(),
        ..NewStyle::default()
    };
    assert_eq!(styles.save_style(&uri, &style).unwrap(), 1);
    assert!(styles.get_style("by day").is_err());

    let list = styles.list_styles(&uri);
    assert_eq!(list.related_count, 1);
    assert_eq!(list.ids, vec!["1"]);
    assert_eq!(list.names, vec!["by day"]);
    assert_eq!(list.descriptions, vec!["faded greens and elegant patterns"]);
    assert!(list.error.is_empty());

    assert!(styles.get_style("100").is_err());
    assert_eq!(styles.get_style("1").unwrap(), style.qml);

    assert!(styles.delete_style("100").is_ok());
    assert!(styles.delete_style("1").is_ok());

    let list = styles.list_styles(&uri);
    assert_eq!(list.related_count, 0);
    assert!(list.ids.is_empty());
    assert!(list.error.is_empty());
}

#[test]
fn default_style_follows_latest_save() {
    let conn = fixtures::connection();
    let styles = StyleStore::new(&conn);
    let uri = layer_uri();
    for name in ["day", "night"] {
        let style = NewStyle {
            name: name.into(),
            qml: format!("<qgis style=\"{}\"/>", name),
            use_as_default: true,
            ..NewStyle::default()
        };
        styles.save_style(&uri, &style).unwrap();
    }
    assert_eq!(
        styles.load_default_style(&uri).unwrap().as_deref(),
        Some("<qgis style=\"night\"/>")
    );

    let other = DataSourceUri::parse("key='gid' table=\"qgis_test\".\"constraints\" sql=").unwrap();
    assert_eq!(styles.load_default_style(&other).unwrap(), None);
    let list = styles.list_styles(&other);
    assert_eq!(list.related_count, 0);
    assert_eq!(list.ids.len(), 2);
}
