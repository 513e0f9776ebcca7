//! [`Connector`] backed by the synchronous `postgres` client.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::io::Write as _;

use ::postgres::{Client, Config, NoTls, SimpleQueryMessage, Statement};
use bytes::BytesMut;
use geoload_core::Value;
use postgres_types::{IsNull, ToSql, Type, to_sql_checked};

use super::{Connection, Connector};
use crate::StoreError;

/// Opens plain-text connections from parsed `postgres` settings.
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    config: Config,
}

impl PostgresConnector {
    /// Connector for already parsed settings.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Connector for a `key=value` parameter string.
    ///
    /// # Examples
    ///
    /// ```
    /// use geoload_postgis::PostgresConnector;
    ///
    /// let connector = PostgresConnector::from_params("host=localhost dbname=osm sslmode=disable");
    /// assert!(connector.is_ok());
    /// ```
    pub fn from_params(params: &str) -> Result<Self, StoreError> {
        let config = params.parse::<Config>().map_err(StoreError::new)?;
        Ok(Self::new(config))
    }
}

impl Connector for PostgresConnector {
    type Connection = PostgresConnection;

    fn connect(&self) -> Result<Self::Connection, StoreError> {
        let client = self.config.connect(NoTls).map_err(StoreError::new)?;
        Ok(PostgresConnection { client })
    }
}

/// A live PostgreSQL session.
pub struct PostgresConnection {
    client: Client,
}

impl std::fmt::Debug for PostgresConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConnection")
            .field("closed", &self.client.is_closed())
            .finish()
    }
}

impl Connection for PostgresConnection {
    type Statement = Statement;

    fn batch_execute(&mut self, sql: &str) -> Result<(), StoreError> {
        self.client.batch_execute(sql).map_err(StoreError::new)
    }

    fn query_scalar(&mut self, sql: &str) -> Result<Option<String>, StoreError> {
        let messages = self.client.simple_query(sql).map_err(StoreError::new)?;
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                let value = row.try_get(0).map_err(StoreError::new)?;
                return Ok(value.map(str::to_owned));
            }
        }
        Ok(None)
    }

    fn prepare(&mut self, sql: &str) -> Result<Self::Statement, StoreError> {
        self.client.prepare(sql).map_err(StoreError::new)
    }

    fn execute(
        &mut self,
        statement: &Self::Statement,
        params: &[Value],
    ) -> Result<u64, StoreError> {
        let values: Vec<SqlValue<'_>> = params.iter().map(SqlValue).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = values
            .iter()
            .map(|value| value as &(dyn ToSql + Sync))
            .collect();
        self.client
            .execute(statement, &refs)
            .map_err(StoreError::new)
    }

    fn copy_in(&mut self, sql: &str, data: &[u8]) -> Result<u64, StoreError> {
        let mut writer = self.client.copy_in(sql).map_err(StoreError::new)?;
        writer.write_all(data).map_err(StoreError::new)?;
        writer.finish().map_err(StoreError::new)
    }
}

/// Binds a [`Value`] to whatever type the server inferred for a parameter.
#[derive(Debug)]
struct SqlValue<'a>(&'a Value);

impl ToSql for SqlValue<'_> {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(value) => value.to_sql(ty, out),
            Value::Int(value) => {
                if *ty == Type::INT2 {
                    i16::try_from(*value)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*value)?.to_sql(ty, out)
                } else {
                    value.to_sql(ty, out)
                }
            }
            Value::Float(value) => {
                if *ty == Type::FLOAT4 {
                    (*value as f32).to_sql(ty, out)
                } else {
                    value.to_sql(ty, out)
                }
            }
            Value::Text(value) => value.to_sql(ty, out),
            Value::Hstore(tags) => {
                let map: HashMap<String, Option<String>> =
                    tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                map.to_sql(ty, out)
            }
            // PostGIS receives EWKB as the binary form of `geometry`.
            Value::Geometry(ewkb) => {
                out.extend_from_slice(ewkb);
                Ok(IsNull::No)
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
