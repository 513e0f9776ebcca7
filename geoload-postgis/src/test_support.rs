//! In-memory store for unit and behaviour tests.
//!
//! [`MemoryConnector`] records every statement and models transactions:
//! writes issued between `BEGIN` and `COMMIT` only become visible on commit
//! and are discarded on `ROLLBACK`. Statements outside a transaction commit
//! immediately.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use geoload_core::Value;

use crate::StoreError;
use crate::store::{Connection, Connector};

/// A write applied to the in-memory store.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Parameterless statement, including scalar queries with side effects.
    Ddl(String),
    /// Prepared statement execution.
    Statement {
        /// Statement text.
        sql: String,
        /// Bound values.
        params: Vec<Value>,
    },
    /// COPY payload.
    Copy {
        /// `COPY … FROM STDIN` statement.
        sql: String,
        /// COPY text rows.
        data: String,
    },
}

impl Write {
    /// Statement text of the write.
    #[must_use]
    pub fn sql(&self) -> &str {
        match self {
            Self::Ddl(sql) | Self::Statement { sql, .. } | Self::Copy { sql, .. } => sql,
        }
    }
}

#[derive(Debug)]
struct MemoryState {
    log: Vec<String>,
    committed: Vec<Write>,
    failures: Vec<String>,
    responses: Vec<(String, String)>,
    connections: usize,
    refuse_connections: bool,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            log: Vec::new(),
            committed: Vec::new(),
            failures: Vec::new(),
            responses: vec![
                ("PostGIS_lib_version".to_owned(), "3.4.0".to_owned()),
                ("h3_ext_version".to_owned(), "4.1.0".to_owned()),
                ("information_schema.schemata".to_owned(), "f".to_owned()),
            ],
            connections: 0,
            refuse_connections: false,
        }
    }
}

impl MemoryState {
    fn check(&mut self, sql: &str) -> Result<(), StoreError> {
        self.log.push(sql.to_owned());
        match self.failures.iter().find(|pattern| sql.contains(pattern.as_str())) {
            Some(pattern) => Err(StoreError::message(format!(
                "simulated failure matching {pattern:?}"
            ))),
            None => Ok(()),
        }
    }

    /// Prepares only fail on patterns starting with `PREPARE`, so a pattern
    /// naming a statement fails its execution rather than its preparation.
    fn check_prepare(&mut self, sql: &str) -> Result<(), StoreError> {
        let logged = format!("PREPARE {sql}");
        self.log.push(logged.clone());
        match self
            .failures
            .iter()
            .filter(|pattern| pattern.starts_with("PREPARE"))
            .find(|pattern| logged.contains(pattern.as_str()))
        {
            Some(pattern) => Err(StoreError::message(format!(
                "simulated failure matching {pattern:?}"
            ))),
            None => Ok(()),
        }
    }

    fn response(&self, sql: &str) -> Option<String> {
        self.responses
            .iter()
            .rev()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, value)| value.clone())
    }
}

/// Connector producing [`MemoryConnection`]s over shared state.
///
/// Clones share the same store.
///
/// # Examples
///
/// ```
/// use geoload_postgis::store::{Connection, Connector};
/// use geoload_postgis::test_support::MemoryConnector;
///
/// let store = MemoryConnector::new();
/// let mut conn = store.connect().unwrap();
/// conn.batch_execute("BEGIN").unwrap();
/// conn.batch_execute("CREATE TABLE t ()").unwrap();
/// assert!(store.committed().is_empty());
/// conn.batch_execute("COMMIT").unwrap();
/// assert_eq!(store.committed_sql("CREATE TABLE"), vec!["CREATE TABLE t ()"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConnector {
    /// Empty store with default probe responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail every statement containing `pattern`.
    #[must_use]
    pub fn failing_on(self, pattern: &str) -> Self {
        self.state().failures.push(pattern.to_owned());
        self
    }

    /// Answer scalar queries containing `pattern` with `value`.
    #[must_use]
    pub fn with_response(self, pattern: &str, value: &str) -> Self {
        self.state()
            .responses
            .push((pattern.to_owned(), value.to_owned()));
        self
    }

    /// Refuse every new connection.
    #[must_use]
    pub fn refusing_connections(self) -> Self {
        self.state().refuse_connections = true;
        self
    }

    /// Every statement run, in order, including failed ones.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.state().log.clone()
    }

    /// Committed writes in commit order.
    #[must_use]
    pub fn committed(&self) -> Vec<Write> {
        self.state().committed.clone()
    }

    /// Statement text of committed writes containing `fragment`.
    #[must_use]
    pub fn committed_sql(&self, fragment: &str) -> Vec<String> {
        self.state()
            .committed
            .iter()
            .map(Write::sql)
            .filter(|sql| sql.contains(fragment))
            .map(str::to_owned)
            .collect()
    }

    /// Parameters of committed prepared statements containing `fragment`.
    #[must_use]
    pub fn committed_params(&self, fragment: &str) -> Vec<Vec<Value>> {
        self.state()
            .committed
            .iter()
            .filter_map(|write| match write {
                Write::Statement { sql, params } if sql.contains(fragment) => Some(params.clone()),
                _ => None,
            })
            .collect()
    }

    /// Committed COPY rows for statements containing `fragment`.
    #[must_use]
    pub fn committed_copy_rows(&self, fragment: &str) -> Vec<String> {
        self.state()
            .committed
            .iter()
            .filter_map(|write| match write {
                Write::Copy { sql, data } if sql.contains(fragment) => Some(data.clone()),
                _ => None,
            })
            .flat_map(|data| data.lines().map(str::to_owned).collect::<Vec<_>>())
            .collect()
    }

    /// Connections opened so far.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.state().connections
    }
}

impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    fn connect(&self) -> Result<Self::Connection, StoreError> {
        let mut state = self.state();
        if state.refuse_connections {
            return Err(StoreError::message("connection refused"));
        }
        state.connections += 1;
        Ok(MemoryConnection {
            state: Arc::clone(&self.state),
            pending: Vec::new(),
            in_transaction: false,
        })
    }
}

/// Prepared statement of a [`MemoryConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryStatement {
    sql: String,
}

/// Session against a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryConnection {
    state: Arc<Mutex<MemoryState>>,
    pending: Vec<Write>,
    in_transaction: bool,
}

impl MemoryConnection {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&mut self, write: Write) {
        if self.in_transaction {
            self.pending.push(write);
        } else {
            self.state().committed.push(write);
        }
    }
}

impl Connection for MemoryConnection {
    type Statement = MemoryStatement;

    fn batch_execute(&mut self, sql: &str) -> Result<(), StoreError> {
        self.state().check(sql)?;
        match sql.trim() {
            "BEGIN" => {
                self.in_transaction = true;
                self.pending.clear();
            }
            "COMMIT" => {
                self.in_transaction = false;
                let pending = std::mem::take(&mut self.pending);
                self.state().committed.extend(pending);
            }
            "ROLLBACK" => {
                self.in_transaction = false;
                self.pending.clear();
            }
            _ => self.apply(Write::Ddl(sql.to_owned())),
        }
        Ok(())
    }

    fn query_scalar(&mut self, sql: &str) -> Result<Option<String>, StoreError> {
        let response = {
            let mut state = self.state();
            state.check(sql)?;
            state.response(sql)
        };
        if response.is_none() {
            self.apply(Write::Ddl(sql.to_owned()));
        }
        Ok(response)
    }

    fn prepare(&mut self, sql: &str) -> Result<Self::Statement, StoreError> {
        self.state().check_prepare(sql)?;
        Ok(MemoryStatement {
            sql: sql.to_owned(),
        })
    }

    fn execute(
        &mut self,
        statement: &Self::Statement,
        params: &[Value],
    ) -> Result<u64, StoreError> {
        self.state().check(&statement.sql)?;
        self.apply(Write::Statement {
            sql: statement.sql.clone(),
            params: params.to_vec(),
        });
        Ok(1)
    }

    fn copy_in(&mut self, sql: &str, data: &[u8]) -> Result<u64, StoreError> {
        self.state().check(sql)?;
        let data = String::from_utf8_lossy(data).into_owned();
        let rows = data.lines().count() as u64;
        self.apply(Write::Copy {
            sql: sql.to_owned(),
            data,
        });
        Ok(rows)
    }
}
