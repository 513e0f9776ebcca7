//! Statements issued by the orchestrator phases.

use geoload_core::ident::{qualified, quote_ident, quote_literal};
use geoload_core::{ColumnSpec, ColumnType, ConfigError, DEFAULT_H3_RESOLUTION, TableSpec};

/// Returns the PostGIS library version.
pub(crate) const POSTGIS_VERSION_PROBE: &str = "SELECT PostGIS_lib_version()";
/// Fails unless the `h3` extension is installed.
pub(crate) const H3_PROBE: &str = "SELECT h3_ext_version()";

const WGS84: i32 = 4326;
const WEB_MERCATOR: i32 = 3857;
/// PostgreSQL truncates identifiers beyond this many bytes.
const MAX_IDENTIFIER_LEN: usize = 63;

pub(crate) fn schema_exists(schema: &str) -> String {
    format!(
        "SELECT EXISTS(SELECT schema_name FROM information_schema.schemata WHERE schema_name = {})",
        quote_literal(schema)
    )
}

pub(crate) fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA {}", quote_ident(schema))
}

pub(crate) fn drop_table(schema: &str, table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", qualified(schema, table))
}

/// `AddGeometryColumn` call registering the table's geometry column.
///
/// Polygon tables are registered as `GEOMETRY` so multipolygons fit.
pub(crate) fn add_geometry_column(table: &TableSpec) -> Option<String> {
    let column = table.geometry_column()?;
    let geometry_type = match table.geometry_kind {
        "point" => "POINT",
        "linestring" => "LINESTRING",
        _ => "GEOMETRY",
    };
    Some(format!(
        "SELECT AddGeometryColumn({}, {}, {}, {}, {}, 2)",
        quote_literal(&table.schema),
        quote_literal(&table.full_name),
        quote_literal(&column.name),
        table.srid,
        quote_literal(geometry_type)
    ))
}

pub(crate) fn populate_geometry_columns(schema: &str, table: &str) -> String {
    format!(
        "SELECT Populate_Geometry_Columns({}::regclass)",
        quote_literal(&qualified(schema, table))
    )
}

/// Whether `PostGIS_lib_version()` output needs `Populate_Geometry_Columns`.
pub(crate) fn needs_populate(version: Option<&str>) -> bool {
    !version.is_some_and(|version| version.starts_with("2."))
}

/// Index name `{table}_{suffix}`, shortened to fit an identifier.
///
/// Names that would be truncated keep their leading bytes and end in a hash
/// of the full name, so indexes differing only in their tail stay distinct.
pub(crate) fn index_name(table: &str, suffix: &str) -> String {
    let name = format!("{table}_{suffix}");
    if name.len() <= MAX_IDENTIFIER_LEN {
        return name;
    }
    let tag = format!("_{:08x}", fnv1a(name.as_bytes()));
    let mut keep = MAX_IDENTIFIER_LEN.saturating_sub(tag.len());
    while !name.is_char_boundary(keep) {
        keep = keep.saturating_sub(1);
    }
    let head = name.get(..keep).unwrap_or_default();
    format!("{head}{tag}")
}

/// 32-bit FNV-1a, stable across builds so reruns reuse the same names.
fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5, |hash: u32, &byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}

/// Functional H3 index expression for `column` at `resolution`.
pub(crate) fn h3_index_expr(column: &str, resolution: u8, srid: i32) -> Result<String, ConfigError> {
    let column = quote_ident(column);
    match srid {
        WGS84 => Ok(format!("h3_geo_to_h3index({column}, {resolution})")),
        WEB_MERCATOR => Ok(format!(
            "h3_geo_to_h3index(ST_Transform(ST_SetSRID({column}, {WEB_MERCATOR}), {WGS84}), {resolution})"
        )),
        other => Err(ConfigError::UnsupportedSrid { srid: other }),
    }
}

/// Index statements created by `finish` for one table.
///
/// `full_name` is the table being indexed; `columns` are its (or, for a
/// generalized table, its root's) columns.
pub(crate) fn index_statements(
    schema: &str,
    full_name: &str,
    columns: &[ColumnSpec],
    srid: i32,
) -> Result<Vec<String>, ConfigError> {
    let table = qualified(schema, full_name);
    let mut statements = Vec::new();
    for column in columns {
        match &column.column_type {
            ColumnType::H3Geometry { resolutions } => {
                let defaults = [DEFAULT_H3_RESOLUTION];
                let resolutions: &[u8] = if resolutions.is_empty() {
                    &defaults
                } else {
                    resolutions
                };
                for &resolution in resolutions {
                    statements.push(format!(
                        "CREATE INDEX IF NOT EXISTS {} ON {table} ({})",
                        quote_ident(&index_name(full_name, &format!("h3_geom_{resolution}"))),
                        h3_index_expr(&column.name, resolution, srid)?
                    ));
                }
            }
            column_type if column_type.is_geometry() => statements.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {table} USING GIST ({})",
                quote_ident(&index_name(full_name, "geom")),
                quote_ident(&column.name)
            )),
            _ => {}
        }
        if column.is_id() {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {table} USING BTREE ({})",
                quote_ident(&index_name(full_name, &format!("{}_idx", column.name))),
                quote_ident(&column.name)
            ));
        }
    }
    Ok(statements)
}

/// The first H3 column of `columns`, if any.
pub(crate) fn h3_column(columns: &[ColumnSpec]) -> Option<&ColumnSpec> {
    columns
        .iter()
        .find(|column| column.column_type.h3_resolutions().is_some())
}

/// Geohash index, cluster and analyse statements run by `optimize`.
pub(crate) fn optimize_statements(
    schema: &str,
    full_name: &str,
    columns: &[ColumnSpec],
    srid: i32,
) -> Vec<String> {
    let table = qualified(schema, full_name);
    let mut statements = Vec::with_capacity(3);
    if let Some(column) = columns.iter().find(|c| c.column_type.is_geometry()) {
        let index = quote_ident(&index_name(full_name, "geom_geohash"));
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS {index} ON {table} \
             (ST_GeoHash(ST_Transform(ST_SetSRID(Box2D({}), {srid}), {WGS84})))",
            quote_ident(&column.name)
        ));
        statements.push(format!("CLUSTER {index} ON {table}"));
    }
    statements.push(format!("ANALYSE {table}"));
    statements
}
