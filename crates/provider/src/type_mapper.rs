//! Store column types → generic field types
//!
//! Domains map through their base type but keep the domain name for
//! display. Lengths and precisions come from the formatted type
//! (`character varying(6)`, `numeric(10,4)`). Geometry columns are not
//! attribute fields. Types without a mapping become `Unsupported` fields
//! that stay in the field list.

use geostrata_core::{ColumnInfo, Field, FieldType, TypeKind};
use tracing::warn;

/// Result of mapping one store type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedType {
    /// Generic type
    pub field_type: FieldType,
    /// Element type of list types
    pub sub_type: Option<FieldType>,
    /// Nominal length, -1 when undefined
    pub length: i32,
    /// Precision (scale), -1 when undefined
    pub precision: i32,
}

impl MappedType {
    fn plain(field_type: FieldType) -> Self {
        MappedType {
            field_type,
            sub_type: None,
            length: -1,
            precision: -1,
        }
    }

    fn list(field_type: FieldType, sub_type: FieldType) -> Self {
        MappedType {
            sub_type: Some(sub_type),
            ..Self::plain(field_type)
        }
    }
}

/// Map an internal type name and its formatted form
///
/// Returns `None` for names with no mapping.
pub fn map_type(type_name: &str, formatted: &str) -> Option<MappedType> {
    let (length, precision) = type_modifiers(formatted);
    let mapped = match type_name {
        "int2" | "int4" | "serial" | "smallserial" | "oid" => MappedType::plain(FieldType::Int),
        "int8" | "bigserial" => MappedType::plain(FieldType::LongLong),
        "float4" | "float8" => MappedType::plain(FieldType::Double),
        "numeric" => MappedType {
            length,
            precision,
            ..MappedType::plain(FieldType::Double)
        },
        "bool" => MappedType::plain(FieldType::Bool),
        "text" | "name" | "citext" | "uuid" => MappedType::plain(FieldType::String),
        "varchar" => MappedType {
            length,
            ..MappedType::plain(FieldType::String)
        },
        "bpchar" | "char" => MappedType {
            // `character` without a modifier is character(1)
            length: if length < 0 { 1 } else { length },
            ..MappedType::plain(FieldType::String)
        },
        "date" => MappedType::plain(FieldType::Date),
        "time" | "timetz" => MappedType::plain(FieldType::Time),
        "timestamp" | "timestamptz" => MappedType::plain(FieldType::DateTime),
        "hstore" | "json" | "jsonb" => MappedType::plain(FieldType::Map),
        _ => return None,
    };
    Some(mapped)
}

fn map_array(element: &str) -> Option<MappedType> {
    let scalar = map_type(element, element)?;
    match scalar.field_type {
        FieldType::String => Some(MappedType::list(FieldType::StringList, FieldType::String)),
        FieldType::Int | FieldType::LongLong | FieldType::Double | FieldType::Bool => {
            Some(MappedType::list(FieldType::List, scalar.field_type))
        }
        FieldType::Date | FieldType::Time | FieldType::DateTime => {
            Some(MappedType::list(FieldType::List, scalar.field_type))
        }
        _ => None,
    }
}

/// Map a store column to a field; `None` for geometry columns
///
/// The field carries the column's NOT NULL as a store constraint. Unique
/// constraints depend on the whole relation and are added by the caller.
pub fn map_column(column: &ColumnInfo) -> Option<Field> {
    let mapped = match &column.kind {
        TypeKind::Geometry { .. } => return None,
        TypeKind::Base => map_type(&column.type_name, &column.formatted_type),
        TypeKind::Domain {
            base_type_name,
            base_formatted,
        } => match base_type_name.strip_prefix('_') {
            Some(element) => map_array(element),
            None => map_type(base_type_name, base_formatted),
        },
        TypeKind::Array { element } => map_array(element),
        TypeKind::Enum(_) => Some(MappedType::plain(FieldType::String)),
    };

    let mapped = mapped.unwrap_or_else(|| {
        warn!(
            target: "geostrata::provider",
            field = %column.name,
            type_name = %column.type_name,
            "Unsupported column type"
        );
        MappedType::plain(FieldType::Unsupported)
    });

    let mut field = Field::new(&column.name, mapped.field_type, &column.type_name)
        .with_length(mapped.length, mapped.precision);
    if let Some(sub) = mapped.sub_type {
        field = field.with_sub_type(sub);
    }
    if column.not_null {
        field.constraints.set_constraint(
            geostrata_core::Constraint::NotNull,
            geostrata_core::ConstraintOrigin::Store,
        );
    }
    Some(field)
}

/// Store type for a field when creating a table from a field list
pub fn store_type_for(field: &Field) -> String {
    let scalar = |t: FieldType| -> &'static str {
        match t {
            FieldType::Bool => "bool",
            FieldType::Int => "int4",
            FieldType::LongLong => "int8",
            FieldType::Double => "float8",
            FieldType::Date => "date",
            FieldType::Time => "time",
            FieldType::DateTime => "timestamp",
            _ => "text",
        }
    };
    match field.field_type {
        FieldType::String if field.length > 0 => format!("varchar({})", field.length),
        FieldType::Double if field.length > 0 && field.precision >= 0 => {
            format!("numeric({},{})", field.length, field.precision)
        }
        FieldType::Map => "hstore".to_string(),
        FieldType::StringList => "text[]".to_string(),
        FieldType::List => format!("{}[]", scalar(field.sub_type.unwrap_or(FieldType::String))),
        other => scalar(other).to_string(),
    }
}

/// `(length, precision)` from the modifiers in a formatted type name
fn type_modifiers(formatted: &str) -> (i32, i32) {
    let inner = match (formatted.find('('), formatted.rfind(')')) {
        (Some(open), Some(close)) if close > open => &formatted[open + 1..close],
        _ => return (-1, -1),
    };
    let mut parts = inner.split(',').map(|p| p.trim().parse::<i32>());
    match (parts.next(), parts.next()) {
        (Some(Ok(len)), Some(Ok(prec))) => (len, prec),
        (Some(Ok(len)), None) => (len, -1),
        _ => (-1, -1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geostrata_core::{Constraint, ConstraintOrigin};

    fn column(name: &str, type_name: &str, formatted: &str, kind: TypeKind) -> ColumnInfo {
        ColumnInfo {
            name: name.into(),
            type_name: type_name.into(),
            formatted_type: formatted.into(),
            kind,
            not_null: false,
            default_expr: None,
        }
    }

    fn domain(name: &str, base: &str, base_formatted: &str) -> ColumnInfo {
        column(
            name,
            &format!("qgis_test.{}", name),
            &format!("qgis_test.{}", name),
            TypeKind::Domain {
                base_type_name: base.into(),
                base_formatted: base_formatted.into(),
            },
        )
    }

    #[test]
    fn test_scalar_types() {
        let cases = [
            ("int2", FieldType::Int),
            ("int4", FieldType::Int),
            ("int8", FieldType::LongLong),
            ("float8", FieldType::Double),
            ("bool", FieldType::Bool),
            ("text", FieldType::String),
            ("date", FieldType::Date),
            ("time", FieldType::Time),
            ("timestamp", FieldType::DateTime),
            ("timestamptz", FieldType::DateTime),
            ("hstore", FieldType::Map),
            ("jsonb", FieldType::Map),
        ];
        for (name, expected) in cases {
            let field = map_column(&column("c", name, name, TypeKind::Base)).unwrap();
            assert_eq!(field.field_type, expected, "{}", name);
            assert_eq!(field.length, -1, "{}", name);
        }
    }

    #[test]
    fn test_lengths_and_precision() {
        let f = map_column(&column("c", "varchar", "character varying(6)", TypeKind::Base)).unwrap();
        assert_eq!((f.field_type, f.length), (FieldType::String, 6));

        let f = map_column(&column("c", "numeric", "numeric(10,4)", TypeKind::Base)).unwrap();
        assert_eq!((f.field_type, f.length, f.precision), (FieldType::Double, 10, 4));

        let f = map_column(&column("c", "bpchar", "character", TypeKind::Base)).unwrap();
        assert_eq!(f.length, 1);
    }

    #[test]
    fn test_domains_keep_their_name() {
        let f = map_column(&domain("var_char_domain", "varchar", "character varying")).unwrap();
        assert_eq!(f.field_type, FieldType::String);
        assert_eq!(f.type_name, "qgis_test.var_char_domain");
        assert_eq!(f.length, -1);

        let f = map_column(&domain("char_domain_6", "bpchar", "character(6)")).unwrap();
        assert_eq!(f.length, 6);

        let f = map_column(&domain("numeric_domain", "numeric", "numeric(10,4)")).unwrap();
        assert_eq!((f.field_type, f.length, f.precision), (FieldType::Double, 10, 4));
    }

    #[test]
    fn test_arrays() {
        let f = map_column(&column(
            "a",
            "_text",
            "text[]",
            TypeKind::Array {
                element: "text".into(),
            },
        ))
        .unwrap();
        assert_eq!((f.field_type, f.sub_type), (FieldType::StringList, Some(FieldType::String)));

        let f = map_column(&column(
            "a",
            "_int4",
            "integer[]",
            TypeKind::Array {
                element: "int4".into(),
            },
        ))
        .unwrap();
        assert_eq!((f.field_type, f.sub_type), (FieldType::List, Some(FieldType::Int)));

        let f = map_column(&column(
            "a",
            "_float8",
            "double precision[]",
            TypeKind::Array {
                element: "float8".into(),
            },
        ))
        .unwrap();
        assert_eq!(f.sub_type, Some(FieldType::Double));
    }

    #[test]
    fn test_enum_and_geometry() {
        let f = map_column(&column("e", "qgis_test.color", "qgis_test.color", TypeKind::Enum(vec!["red".into()])))
            .unwrap();
        assert_eq!(f.field_type, FieldType::String);

        let geom = column(
            "geom",
            "geometry",
            "geometry(Point,4326)",
            TypeKind::Geometry {
                srid: Some(4326),
                geometry_type: "POINT".into(),
            },
        );
        assert!(map_column(&geom).is_none());
    }

    #[test]
    fn test_unknown_type_is_unsupported_not_fatal() {
        let f = map_column(&column("x", "tsvector", "tsvector", TypeKind::Base)).unwrap();
        assert_eq!(f.field_type, FieldType::Unsupported);
        assert_eq!(f.type_name, "tsvector");
    }

    #[test]
    fn test_not_null_is_store_constraint() {
        let mut c = column("c", "int4", "integer", TypeKind::Base);
        c.not_null = true;
        let f = map_column(&c).unwrap();
        assert_eq!(f.constraints.origin(Constraint::NotNull), Some(ConstraintOrigin::Store));
    }

    #[test]
    fn test_store_type_for_fields() {
        assert_eq!(store_type_for(&Field::new("f", FieldType::Double, "double")), "float8");
        assert_eq!(
            store_type_for(&Field::new("f", FieldType::String, "string").with_length(20, 0)),
            "varchar(20)"
        );
        assert_eq!(store_type_for(&Field::new("f", FieldType::String, "string")), "text");
        assert_eq!(
            store_type_for(&Field::new("f", FieldType::List, "int[]").with_sub_type(FieldType::LongLong)),
            "int8[]"
        );
    }
}
