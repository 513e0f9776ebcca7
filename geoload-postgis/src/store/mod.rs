//! Connection abstraction the writer runs on.
//!
//! Every phase task and every bulk writer opens its own [`Connection`] through
//! a shared [`Connector`]; transactions are driven with explicit `BEGIN`,
//! `COMMIT` and `ROLLBACK` statements so a connection can be owned by a single
//! writer without borrowing tricks.

use geoload_core::Value;

use crate::StoreError;

#[cfg(feature = "store-postgres")]
mod postgres;

#[cfg(feature = "store-postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "store-postgres")))]
pub use self::postgres::{PostgresConnection, PostgresConnector};

/// Opens connections to the store.
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced.
    type Connection: Connection;

    /// Open a new connection.
    fn connect(&self) -> Result<Self::Connection, StoreError>;
}

/// A single session with the store.
pub trait Connection: Send + 'static {
    /// Prepared statement handle.
    type Statement: Send + 'static;

    /// Run one or more statements without parameters.
    fn batch_execute(&mut self, sql: &str) -> Result<(), StoreError>;

    /// Run a query and return the first column of the first row as text.
    ///
    /// Booleans come back as `t` or `f`. `None` means no row or `NULL`.
    fn query_scalar(&mut self, sql: &str) -> Result<Option<String>, StoreError>;

    /// Prepare a parameterised statement.
    fn prepare(&mut self, sql: &str) -> Result<Self::Statement, StoreError>;

    /// Execute a prepared statement and return the affected row count.
    fn execute(&mut self, statement: &Self::Statement, params: &[Value])
    -> Result<u64, StoreError>;

    /// Stream COPY text rows into a `COPY … FROM STDIN` statement.
    fn copy_in(&mut self, sql: &str, data: &[u8]) -> Result<u64, StoreError>;
}

/// Run `sql` and attach it to the error on failure.
pub(crate) fn run<C: Connection>(conn: &mut C, sql: &str) -> Result<(), crate::DatabaseError> {
    log::debug!("{sql}");
    conn.batch_execute(sql)
        .map_err(|source| crate::DatabaseError::statement(sql, source))
}

/// Run a scalar query and attach `sql` to the error on failure.
pub(crate) fn scalar<C: Connection>(
    conn: &mut C,
    sql: &str,
) -> Result<Option<String>, crate::DatabaseError> {
    log::debug!("{sql}");
    conn.query_scalar(sql)
        .map_err(|source| crate::DatabaseError::statement(sql, source))
}

/// Run `body` between `BEGIN` and `COMMIT`, rolling back when it fails.
pub(crate) fn transaction<C, F>(conn: &mut C, body: F) -> Result<(), crate::DatabaseError>
where
    C: Connection,
    F: FnOnce(&mut C) -> Result<(), crate::DatabaseError>,
{
    run(conn, "BEGIN")?;
    match body(conn) {
        Ok(()) => run(conn, "COMMIT"),
        Err(err) => {
            if let Err(rollback) = run(conn, "ROLLBACK") {
                log::warn!("rollback failed: {rollback}");
            }
            Err(err)
        }
    }
}

/// Open a connection, mapping failures to [`crate::DatabaseError::Connect`].
pub(crate) fn connect<C: Connector>(connector: &C) -> Result<C::Connection, crate::DatabaseError> {
    connector
        .connect()
        .map_err(|source| crate::DatabaseError::Connect { source })
}
