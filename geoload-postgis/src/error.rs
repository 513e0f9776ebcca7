//! Error types for the PostGIS writer.

use std::error::Error as StdError;

use geoload_core::ConfigError;
use thiserror::Error;

/// Failure reported by a store connection.
///
/// Wraps whatever the driver returned so the writer stays independent of the
/// concrete client.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct StoreError {
    #[source]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

impl StoreError {
    /// Wrap a driver error.
    pub fn new(source: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Error carrying only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(message.into())
    }
}

/// A pool task panicked instead of returning.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("worker task panicked: {message}")]
pub struct WorkerPanic {
    /// Panic payload rendered as text.
    pub message: String,
}

/// Errors raised by [`crate::PostGis`] and [`crate::TxRouter`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DatabaseError {
    /// Invalid table configuration or settings.
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    /// The connection string could not be understood.
    #[error("invalid connection string: {message}")]
    ConnectionString {
        /// What was wrong with it.
        message: String,
    },
    /// Opening a connection failed.
    #[error("failed to connect to the database")]
    Connect {
        /// Driver error.
        #[source]
        source: StoreError,
    },
    /// A statement failed.
    #[error("SQL error in query {sql}")]
    Statement {
        /// Failing statement.
        sql: String,
        /// Driver error.
        #[source]
        source: StoreError,
    },
    /// An insert failed; carries the rejected row.
    #[error("SQL error in query {sql} ({row})")]
    Insert {
        /// Failing statement.
        sql: String,
        /// Debug rendering of the row.
        row: String,
        /// Driver error.
        #[source]
        source: StoreError,
    },
    /// A row does not have one value per column.
    #[error("row for table {table:?} has {actual} values, expected {expected}: {row}")]
    RowShape {
        /// Destination table.
        table: String,
        /// Column count of the table.
        expected: usize,
        /// Values supplied.
        actual: usize,
        /// Debug rendering of the row.
        row: String,
    },
    /// The router has no route for the table.
    #[error("unknown table {table:?}")]
    UnknownTable {
        /// Requested table name.
        table: String,
    },
    /// The operation has no bulk-mode transport.
    #[error("{operation} on table {table:?} is not supported in bulk mode")]
    UnsupportedInBulk {
        /// Requested table name.
        table: String,
        /// Rejected operation.
        operation: &'static str,
    },
    /// A write or replay was attempted outside a run.
    #[error("no active run; call begin or begin_bulk first")]
    NoActiveRun,
    /// A run was started while another one is still open.
    #[error("a run is already active; call end or abort first")]
    RunActive,
    /// A database extension required by a column is unavailable.
    #[error("the {extension} extension is not set up (table {table:?}, column {column:?})")]
    ExtensionMissing {
        /// Extension name.
        extension: &'static str,
        /// Table whose column needs it.
        table: String,
        /// Column needing it.
        column: String,
        /// Probe failure.
        #[source]
        source: StoreError,
    },
    /// A pool task panicked.
    #[error(transparent)]
    WorkerPanicked(#[from] WorkerPanic),
}

impl DatabaseError {
    pub(crate) fn statement(sql: &str, source: StoreError) -> Self {
        Self::Statement {
            sql: sql.to_owned(),
            source,
        }
    }
}
