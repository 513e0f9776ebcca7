//! Fixture builders shared by unit and behaviour tests.

use std::collections::BTreeMap;

use crate::config::{
    ColumnConfig, GeneralizedTableConfig, MappingConfig, TableConfig, TableKind,
};
use crate::registry::TypeRegistry;
use crate::schema::{GeneralizedTableSpec, SchemaSettings, TableSpec};
use crate::{Match, Value};

/// Column declaration shorthand.
pub fn column(name: &str, field: &str, value_type: &str) -> ColumnConfig {
    ColumnConfig::new(name, field, value_type)
}

/// Schema `import`, prefix `osm_`, web mercator.
pub fn settings() -> SchemaSettings {
    SchemaSettings::new("import", "osm_", 3857).expect("fixture settings are valid")
}

/// Line table `roads` with an identifier, two attributes and a geometry.
pub fn roads_config() -> TableConfig {
    TableConfig {
        kind: TableKind::Linestring,
        columns: vec![
            column("osm_id", "id", "int64"),
            column("name", "string", "string"),
            column("type", "mapping_value", "string"),
            column("geometry", "geometry", "geometry"),
        ],
    }
}

/// Polygon table `landuse` with an identifier and a validated geometry.
pub fn landuse_config() -> TableConfig {
    TableConfig {
        kind: TableKind::Polygon,
        columns: vec![
            column("osm_id", "id", "int64"),
            column("geometry", "geometry", "validated_geometry"),
        ],
    }
}

/// `roads` row for feature `id` without a geometry.
pub fn road(id: i64) -> Match {
    Match::new(
        "roads",
        vec![
            Value::Int(id),
            Value::Text("Main Street".to_owned()),
            Value::Text("primary".to_owned()),
            Value::Null,
        ],
    )
}

/// Built `roads` table.
pub fn roads_table() -> TableSpec {
    TableSpec::new("roads", &roads_config(), &settings(), &TypeRegistry::postgis())
        .expect("roads fixture is valid")
}

/// Built `landuse` table.
pub fn polygon_table() -> TableSpec {
    TableSpec::new("landuse", &landuse_config(), &settings(), &TypeRegistry::postgis())
        .expect("landuse fixture is valid")
}

/// Unresolved generalized table without a filter.
pub fn generalized_spec(name: &str, source: &str, tolerance: f64) -> GeneralizedTableSpec {
    GeneralizedTableSpec::new(name, &generalization(source, tolerance), &settings())
        .expect("generalized fixture is valid")
}

/// Generalization of `source` without a filter.
pub fn generalization(source: &str, tolerance: f64) -> GeneralizedTableConfig {
    GeneralizedTableConfig {
        source: source.to_owned(),
        tolerance,
        sql_filter: None,
    }
}

/// Mapping holding only the `roads` table.
pub fn roads_mapping() -> MappingConfig {
    MappingConfig {
        tables: BTreeMap::from([("roads".to_owned(), roads_config())]),
        generalized_tables: BTreeMap::new(),
    }
}

/// `roads` plus a chain `roads_gen0` → … → `roads_gen{depth-1}`.
///
/// Tolerances grow tenfold per level starting at 10.
pub fn chain_mapping(depth: usize) -> MappingConfig {
    let mut mapping = roads_mapping();
    let mut source = "roads".to_owned();
    let mut tolerance = 10.0;
    for level in 0..depth {
        let name = format!("roads_gen{level}");
        mapping
            .generalized_tables
            .insert(name.clone(), generalization(&source, tolerance));
        source = name;
        tolerance *= 10.0;
    }
    mapping
}
