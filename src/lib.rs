//! Facade crate for the geoload PostGIS writer.
//!
//! Re-exports the table model from `geoload-core` and the writer from
//! `geoload-postgis`. The `postgres`-backed connector sits behind the
//! `store-postgres` feature, which is enabled by default.

#![forbid(unsafe_code)]

pub use geoload_core::{
    ColumnConfig, ColumnType, ConfigError, DatabaseConfig, GeneralizedTableConfig,
    GeneralizedTableSpec, MappingConfig, Match, SchemaSettings, TableConfig, TableKind, TableSet,
    TableSpec, TypeRegistry, Value,
};
pub use geoload_postgis::{
    DatabaseError, PostGis, RouterMode, StoreError, TxRouter, WorkerPanic, WorkerPool,
    parse_connection, store,
};

#[cfg(feature = "store-postgres")]
pub use geoload_postgis::{PostgresConnection, PostgresConnector};
