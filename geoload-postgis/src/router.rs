//! Per-run write router.
//!
//! A [`TxRouter`] is created by `begin` or `begin_bulk` and multiplexes rows
//! and deletes to per-table destinations:
//!
//! - bulk mode opens one connection and transaction per table on first use
//!   and streams rows with `COPY … FROM STDIN`;
//! - transactional mode shares one transaction and lazily prepares each
//!   table's insert and delete statements.
//!
//! Both modes are driven through the same `insert`, `delete`, `end` and
//! `abort` calls.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use geoload_core::{TableSet, Value};
use log::{debug, warn};

use crate::DatabaseError;
use crate::copy::encode_row;
use crate::store::{Connection, Connector, connect, run};

/// Buffered COPY text (in bytes) that triggers a flush to the store.
pub const FLUSH_THRESHOLD: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone)]
struct Route {
    insert_sql: String,
    copy_sql: Option<String>,
    delete_sql: Option<String>,
    arity: usize,
}

impl Route {
    fn check_arity(&self, table: &str, row: &[Value]) -> Result<(), DatabaseError> {
        if row.len() == self.arity {
            return Ok(());
        }
        Err(DatabaseError::RowShape {
            table: table.to_owned(),
            expected: self.arity,
            actual: row.len(),
            row: format!("{row:?}"),
        })
    }
}

/// Write transport selected for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterMode {
    /// Per-table COPY streams.
    Bulk,
    /// One shared transaction with prepared statements.
    Transactional,
}

struct BulkWriter<Conn> {
    conn: Conn,
    copy_sql: String,
    buffer: String,
    rows: u64,
}

impl<Conn: Connection> BulkWriter<Conn> {
    fn open<C>(connector: &C, copy_sql: &str) -> Result<Self, DatabaseError>
    where
        C: Connector<Connection = Conn>,
    {
        let mut conn = connect(connector)?;
        run(&mut conn, "BEGIN")?;
        Ok(Self {
            conn,
            copy_sql: copy_sql.to_owned(),
            buffer: String::new(),
            rows: 0,
        })
    }

    fn push(&mut self, row: &[Value]) -> Result<(), DatabaseError> {
        encode_row(&mut self.buffer, row);
        self.rows += 1;
        if self.buffer.len() >= FLUSH_THRESHOLD {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DatabaseError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        debug!("{} ({} bytes)", self.copy_sql, self.buffer.len());
        self.conn
            .copy_in(&self.copy_sql, self.buffer.as_bytes())
            .map_err(|source| DatabaseError::statement(&self.copy_sql, source))?;
        self.buffer.clear();
        Ok(())
    }

    fn finish(&mut self) -> Result<u64, DatabaseError> {
        if let Err(err) = self.flush() {
            self.abort();
            return Err(err);
        }
        run(&mut self.conn, "COMMIT")?;
        Ok(self.rows)
    }

    fn abort(&mut self) {
        self.buffer.clear();
        if let Err(err) = run(&mut self.conn, "ROLLBACK") {
            warn!("rollback of {} failed: {err}", self.copy_sql);
        }
    }
}

struct PreparedTable<Stmt> {
    insert: Stmt,
    delete: Option<Stmt>,
}

struct SharedTransaction<Conn: Connection> {
    conn: Conn,
    prepared: HashMap<String, PreparedTable<Conn::Statement>>,
}

impl<Conn: Connection> SharedTransaction<Conn> {
    fn ensure_prepared(&mut self, table: &str, route: &Route) -> Result<(), DatabaseError> {
        if self.prepared.contains_key(table) {
            return Ok(());
        }
        let insert = prepare(&mut self.conn, &route.insert_sql)?;
        let delete = match &route.delete_sql {
            Some(sql) => Some(prepare(&mut self.conn, sql)?),
            None => None,
        };
        self.prepared
            .insert(table.to_owned(), PreparedTable { insert, delete });
        Ok(())
    }

    fn insert(&mut self, table: &str, route: &Route, row: &[Value]) -> Result<(), DatabaseError> {
        self.ensure_prepared(table, route)?;
        let prepared = self.prepared.get(table).ok_or_else(|| unknown(table))?;
        debug!("{}", route.insert_sql);
        self.conn
            .execute(&prepared.insert, row)
            .map(|_| ())
            .map_err(|source| DatabaseError::Insert {
                sql: route.insert_sql.clone(),
                row: format!("{row:?}"),
                source,
            })
    }

    fn delete(&mut self, table: &str, route: &Route, id: i64) -> Result<(), DatabaseError> {
        self.ensure_prepared(table, route)?;
        let prepared = self.prepared.get(table).ok_or_else(|| unknown(table))?;
        let (Some(statement), Some(sql)) = (&prepared.delete, &route.delete_sql) else {
            return Err(unknown(table));
        };
        debug!("{sql}");
        self.conn
            .execute(statement, &[Value::Int(id)])
            .map(|_| ())
            .map_err(|source| DatabaseError::statement(sql, source))
    }
}

fn prepare<Conn: Connection>(conn: &mut Conn, sql: &str) -> Result<Conn::Statement, DatabaseError> {
    debug!("PREPARE {sql}");
    conn.prepare(sql)
        .map_err(|source| DatabaseError::statement(sql, source))
}

enum Transport<C: Connector> {
    Bulk(Mutex<HashMap<String, Arc<Mutex<BulkWriter<C::Connection>>>>>),
    Transactional(Mutex<SharedTransaction<C::Connection>>),
}

/// Routes rows of one run to their tables.
///
/// All methods take `&self`: each bulk writer sits behind its own mutex, so
/// different tables proceed concurrently while one table's rows are
/// serialized.
pub struct TxRouter<C: Connector> {
    connector: Arc<C>,
    routes: HashMap<String, Route>,
    transport: Transport<C>,
}

impl<C: Connector> fmt::Debug for TxRouter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxRouter")
            .field("mode", &self.mode())
            .field("tables", &self.routes.len())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> TxRouter<C> {
    /// Open a transactional run.
    ///
    /// Every base and generalized table gets a route; a table without an
    /// identifier column fails here with `MissingIdColumn`.
    pub fn begin(connector: Arc<C>, tables: &TableSet) -> Result<Self, DatabaseError> {
        let mut routes = HashMap::new();
        for table in tables.tables() {
            routes.insert(
                table.name.clone(),
                Route {
                    insert_sql: table.insert_sql().to_owned(),
                    copy_sql: None,
                    delete_sql: Some(table.delete_sql()?.to_owned()),
                    arity: table.columns.len(),
                },
            );
        }
        for table in tables.generalized_tables() {
            routes.insert(
                table.name.clone(),
                Route {
                    insert_sql: table.insert_sql()?.to_owned(),
                    copy_sql: None,
                    delete_sql: Some(table.delete_sql()?.to_owned()),
                    arity: 1,
                },
            );
        }

        let mut conn = connect(connector.as_ref())?;
        run(&mut conn, "BEGIN")?;
        debug!("transactional run over {} tables", routes.len());
        Ok(Self {
            connector,
            routes,
            transport: Transport::Transactional(Mutex::new(SharedTransaction {
                conn,
                prepared: HashMap::new(),
            })),
        })
    }

    /// Open a bulk run; connections are opened per table on first insert.
    pub fn begin_bulk(connector: Arc<C>, tables: &TableSet) -> Result<Self, DatabaseError> {
        let mut routes = HashMap::new();
        for table in tables.tables() {
            routes.insert(
                table.name.clone(),
                Route {
                    insert_sql: table.insert_sql().to_owned(),
                    copy_sql: Some(table.copy_sql().to_owned()),
                    delete_sql: None,
                    arity: table.columns.len(),
                },
            );
        }
        for table in tables.generalized_tables() {
            routes.insert(
                table.name.clone(),
                Route {
                    insert_sql: String::new(),
                    copy_sql: None,
                    delete_sql: None,
                    arity: 1,
                },
            );
        }
        debug!("bulk run over {} tables", routes.len());
        Ok(Self {
            connector,
            routes,
            transport: Transport::Bulk(Mutex::new(HashMap::new())),
        })
    }

    /// Transport of this run.
    #[must_use]
    pub fn mode(&self) -> RouterMode {
        match self.transport {
            Transport::Bulk(_) => RouterMode::Bulk,
            Transport::Transactional(_) => RouterMode::Transactional,
        }
    }

    fn route(&self, table: &str) -> Result<&Route, DatabaseError> {
        self.routes.get(table).ok_or_else(|| unknown(table))
    }

    /// Write `row` to `table`; the row needs one value per column.
    pub fn insert(&self, table: &str, row: &[Value]) -> Result<(), DatabaseError> {
        let route = self.route(table)?;
        route.check_arity(table, row)?;
        match &self.transport {
            Transport::Bulk(writers) => {
                let Some(copy_sql) = &route.copy_sql else {
                    return Err(DatabaseError::UnsupportedInBulk {
                        table: table.to_owned(),
                        operation: "insert",
                    });
                };
                let writer = {
                    let mut writers = lock(writers);
                    match writers.get(table) {
                        Some(writer) => Arc::clone(writer),
                        None => {
                            debug!("opening bulk writer for {table}");
                            let writer =
                                Arc::new(Mutex::new(BulkWriter::open(&*self.connector, copy_sql)?));
                            writers.insert(table.to_owned(), Arc::clone(&writer));
                            writer
                        }
                    }
                };
                let mut writer = lock(&writer);
                writer.push(row)
            }
            Transport::Transactional(shared) => lock(shared).insert(table, route, row),
        }
    }

    /// Delete the row identified by `id` from `table`.
    pub fn delete(&self, table: &str, id: i64) -> Result<(), DatabaseError> {
        let route = self.route(table)?;
        match &self.transport {
            Transport::Bulk(_) => Err(DatabaseError::UnsupportedInBulk {
                table: table.to_owned(),
                operation: "delete",
            }),
            Transport::Transactional(shared) => lock(shared).delete(table, route, id),
        }
    }

    /// Flush and commit every destination.
    ///
    /// In bulk mode every writer is closed even after a failure; the first
    /// failure is returned.
    pub fn end(self) -> Result<(), DatabaseError> {
        match self.transport {
            Transport::Bulk(writers) => {
                let mut writers: Vec<_> = writers
                    .into_inner()
                    .unwrap_or_else(PoisonError::into_inner)
                    .into_iter()
                    .collect();
                writers.sort_by(|(a, _), (b, _)| a.cmp(b));
                let mut first_error = None;
                for (table, writer) in writers {
                    let mut writer = lock(&writer);
                    match writer.finish() {
                        Ok(rows) => debug!("copied {rows} rows into {table}"),
                        Err(err) if first_error.is_none() => first_error = Some(err),
                        Err(err) => warn!("closing bulk writer for {table} failed: {err}"),
                    }
                }
                first_error.map_or(Ok(()), Err)
            }
            Transport::Transactional(shared) => {
                let mut shared = shared.into_inner().unwrap_or_else(PoisonError::into_inner);
                run(&mut shared.conn, "COMMIT")
            }
        }
    }

    /// Roll every destination back.
    pub fn abort(self) -> Result<(), DatabaseError> {
        match self.transport {
            Transport::Bulk(writers) => {
                let writers = writers.into_inner().unwrap_or_else(PoisonError::into_inner);
                for writer in writers.values() {
                    lock(writer).abort();
                }
                Ok(())
            }
            Transport::Transactional(shared) => {
                let mut shared = shared.into_inner().unwrap_or_else(PoisonError::into_inner);
                run(&mut shared.conn, "ROLLBACK")
            }
        }
    }
}

fn unknown(table: &str) -> DatabaseError {
    DatabaseError::UnknownTable {
        table: table.to_owned(),
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
