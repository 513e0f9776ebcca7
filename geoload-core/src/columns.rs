//! SQL rendering for the closed set of column types.

use log::warn;

use crate::ident::quote_ident;
use crate::schema::{GeneralizedTableSpec, TableSpec};

/// SQL type token shared by every spatial column variant.
pub const GEOMETRY_SQL_TYPE: &str = "GEOMETRY";

/// Storage type of a column.
///
/// Spatial variants share their SQL rendering; `ValidatedGeometry` wraps the
/// simplified geometry in a zero-width buffer and `H3Geometry` only differs at
/// index time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    /// A plain scalar column with its SQL type.
    Scalar(&'static str),
    /// A geometry column.
    Geometry,
    /// A geometry column whose generalized projection repairs
    /// self-intersections.
    ValidatedGeometry,
    /// A geometry column indexed at the listed H3 resolutions.
    H3Geometry {
        /// Resolutions in `[0, 15]`, never empty once built by the registry.
        resolutions: Vec<u8>,
    },
}

impl ColumnType {
    /// Canonical SQL type token.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Scalar(sql_type) => *sql_type,
            Self::Geometry | Self::ValidatedGeometry | Self::H3Geometry { .. } => {
                GEOMETRY_SQL_TYPE
            }
        }
    }

    /// Whether this column stores geometries.
    #[must_use]
    pub const fn is_geometry(&self) -> bool {
        !matches!(self, Self::Scalar(_))
    }

    /// Placeholder for the `index`-th (1-based) parameter of an insert.
    ///
    /// # Examples
    ///
    /// ```
    /// use geoload_core::ColumnType;
    ///
    /// assert_eq!(ColumnType::Scalar("BIGINT").placeholder_expr(1), "$1");
    /// assert_eq!(ColumnType::Geometry.placeholder_expr(3), "$3::Geometry");
    /// ```
    #[must_use]
    pub fn placeholder_expr(&self, index: usize) -> String {
        if self.is_geometry() {
            format!("${index}::Geometry")
        } else {
            format!("${index}")
        }
    }

    /// Expression selecting `column` from the root table into `target`.
    ///
    /// The same text is used when materializing `target` and when replaying a
    /// single changed row into it.
    #[must_use]
    pub fn projection_expr(
        &self,
        column: &str,
        target: &GeneralizedTableSpec,
        root: &TableSpec,
    ) -> String {
        match self {
            Self::Scalar(_) => quote_ident(column),
            Self::Geometry | Self::H3Geometry { .. } => {
                format!("{} as {}", simplify(column, target.tolerance), quote_ident(column))
            }
            Self::ValidatedGeometry => {
                if root.geometry_kind != "polygon" {
                    warn!(
                        "validated_geometry column returns polygon geometries for {}",
                        target.full_name
                    );
                }
                format!(
                    "ST_Buffer({}, 0) as {}",
                    simplify(column, target.tolerance),
                    quote_ident(column)
                )
            }
        }
    }

    /// H3 resolutions to index, if this is an H3 column.
    #[must_use]
    pub fn h3_resolutions(&self) -> Option<&[u8]> {
        match self {
            Self::H3Geometry { resolutions } => Some(resolutions),
            _ => None,
        }
    }
}

fn simplify(column: &str, tolerance: f64) -> String {
    format!(
        "ST_SimplifyPreserveTopology({}, {tolerance:.6})",
        quote_ident(column)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{generalized_spec, polygon_table, roads_table};
    use rstest::rstest;

    #[rstest]
    #[case(ColumnType::Scalar("VARCHAR"), "VARCHAR")]
    #[case(ColumnType::Geometry, "GEOMETRY")]
    #[case(ColumnType::ValidatedGeometry, "GEOMETRY")]
    #[case(ColumnType::H3Geometry { resolutions: vec![5] }, "GEOMETRY")]
    fn names_sql_type(#[case] column_type: ColumnType, #[case] expected: &str) {
        assert_eq!(column_type.name(), expected);
    }

    #[rstest]
    fn casts_spatial_placeholders() {
        let h3 = ColumnType::H3Geometry {
            resolutions: vec![5],
        };
        assert_eq!(h3.placeholder_expr(2), "$2::Geometry");
        assert_eq!(ColumnType::ValidatedGeometry.placeholder_expr(4), "$4::Geometry");
        assert_eq!(ColumnType::Scalar("INT").placeholder_expr(4), "$4");
    }

    #[rstest]
    fn scalar_projects_quoted_reference() {
        let root = roads_table();
        let target = generalized_spec("roads_gen0", "roads", 50.0);
        assert_eq!(
            ColumnType::Scalar("VARCHAR").projection_expr("name", &target, &root),
            "\"name\""
        );
    }

    #[rstest]
    fn geometry_projects_simplification() {
        let root = roads_table();
        let target = generalized_spec("roads_gen0", "roads", 50.0);
        assert_eq!(
            ColumnType::Geometry.projection_expr("geometry", &target, &root),
            "ST_SimplifyPreserveTopology(\"geometry\", 50.000000) as \"geometry\""
        );
    }

    #[rstest]
    fn h3_projects_like_geometry() {
        let root = roads_table();
        let target = generalized_spec("roads_gen0", "roads", 0.5);
        let h3 = ColumnType::H3Geometry {
            resolutions: vec![3, 9],
        };
        assert_eq!(
            h3.projection_expr("geometry", &target, &root),
            ColumnType::Geometry.projection_expr("geometry", &target, &root)
        );
    }

    #[rstest]
    fn validated_geometry_buffers_result() {
        let root = polygon_table();
        let target = generalized_spec("landuse_gen0", "landuse", 10.0);
        assert_eq!(
            ColumnType::ValidatedGeometry.projection_expr("geometry", &target, &root),
            "ST_Buffer(ST_SimplifyPreserveTopology(\"geometry\", 10.000000), 0) as \"geometry\""
        );
    }

    #[rstest]
    fn validated_geometry_on_lines_is_advisory() {
        let root = roads_table();
        let target = generalized_spec("roads_gen0", "roads", 10.0);
        let sql = ColumnType::ValidatedGeometry.projection_expr("geometry", &target, &root);
        assert!(sql.starts_with("ST_Buffer("));
    }
}
