//! Configuration errors raised while building the table model.

use thiserror::Error;

/// Errors detected while turning mapping configuration into table specs.
///
/// Every variant is fatal: they are raised at startup, before the store is
/// touched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A generalized table names a source that is neither a base table nor a
    /// generalized table.
    #[error("missing source {source_name:?} for generalized table {table:?}")]
    MissingSource {
        /// Generalized table with the dangling reference.
        table: String,
        /// Source name as configured.
        source_name: String,
    },
    /// Generalized tables depend on each other in a loop.
    #[error("generalized tables {tables:?} form a dependency cycle")]
    CyclicGeneralization {
        /// Tables that could not be resolved to a base table, sorted by name.
        tables: Vec<String>,
    },
    /// A base table and a generalized table share a name.
    #[error("table name {name:?} is used more than once")]
    DuplicateTable {
        /// Conflicting table name.
        name: String,
    },
    /// A column declares a logical type the registry does not know.
    #[error("unhandled column type {column_type:?} for column {column:?} of table {table:?}")]
    UnknownColumnType {
        /// Table declaring the column.
        table: String,
        /// Offending column.
        column: String,
        /// Logical type name as configured.
        column_type: String,
    },
    /// The H3 `resolutions` argument has an unsupported shape or value.
    #[error("invalid H3 resolutions {value} for column {column:?} of table {table:?}")]
    InvalidResolution {
        /// Table declaring the column.
        table: String,
        /// Offending column.
        column: String,
        /// Rendered JSON of the rejected value.
        value: String,
    },
    /// A table needs an identifier column but none is configured.
    #[error("table {table:?} has no identifier column")]
    MissingIdColumn {
        /// Table without a column of field kind `id`.
        table: String,
    },
    /// A schema, table, column or prefix contains characters outside the
    /// permitted set.
    #[error("invalid SQL identifier {identifier:?}: {reason}")]
    InvalidIdentifier {
        /// Identifier as configured.
        identifier: String,
        /// Why the identifier was rejected.
        reason: &'static str,
    },
    /// The working SRID is not supported by an operation.
    #[error("unsupported SRID {srid}")]
    UnsupportedSrid {
        /// Configured spatial reference id.
        srid: i32,
    },
    /// The mapping configuration could not be parsed.
    #[error("failed to parse configuration: {message}")]
    Parse {
        /// Parser message.
        message: String,
    },
}
