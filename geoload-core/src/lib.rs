//! Table model for the geoload database backend.
//!
//! The mapping layer hands over table layouts as [`MappingConfig`]. This crate
//! turns them into validated [`TableSpec`] and [`GeneralizedTableSpec`]
//! values, resolves generalization chains in a [`TableSet`], and renders the
//! SQL templates the writer reuses for every row.
//!
//! No database access happens here; every error is a [`ConfigError`] raised
//! before the store is touched.

mod columns;
mod config;
mod error;
mod graph;
pub mod ident;
mod registry;
mod resolutions;
mod schema;
mod value;

#[doc(hidden)]
pub mod test_support;

pub use columns::{ColumnType, GEOMETRY_SQL_TYPE};
pub use config::{
    ColumnConfig, DEFAULT_IMPORT_SCHEMA, DEFAULT_SRID, DatabaseConfig, GeneralizedTableConfig,
    MappingConfig, TableConfig, TableKind,
};
pub use error::ConfigError;
pub use graph::{GeneralizedId, TableId, TableSet};
pub use registry::TypeRegistry;
pub use resolutions::{ColumnContext, DEFAULT_H3_RESOLUTION, MAX_H3_RESOLUTION, parse_resolutions};
pub use schema::{
    ColumnSpec, GeneralizedTableSpec, ID_FIELD, Materialization, SURROGATE_ID_COLUMN,
    SchemaSettings, TableSpec,
};
pub use value::Value;

/// A feature matched to one destination table.
///
/// `row` holds one value per column of the table, in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    /// Destination table name as configured.
    pub table: String,
    /// Column values.
    pub row: Vec<Value>,
}

impl Match {
    /// Match for `table` carrying `row`.
    #[must_use]
    pub fn new(table: impl Into<String>, row: Vec<Value>) -> Self {
        Self {
            table: table.into(),
            row,
        }
    }
}
