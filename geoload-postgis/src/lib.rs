//! PostGIS writer for geoload imports.
//!
//! [`PostGis`] takes the table model built by `geoload-core`, creates the
//! tables, streams rows through a per-run [`TxRouter`] and runs the
//! post-import phases (indexing, generalization, clustering) on a
//! [`WorkerPool`]. Database access goes through the [`store::Connector`]
//! trait; the `store-postgres` feature (on by default) provides the
//! implementation backed by the `postgres` client.

mod connection;
mod copy;
mod database;
mod error;
mod pool;
mod router;
mod step;
pub mod store;

#[doc(hidden)]
pub mod test_support;

pub use connection::{ConnectionParams, DEFAULT_PREFIX, NO_PREFIX, parse_connection};
pub use database::PostGis;
pub use error::{DatabaseError, StoreError, WorkerPanic};
pub use pool::{WorkerPool, default_workers};
pub use router::{FLUSH_THRESHOLD, RouterMode, TxRouter};

#[cfg(feature = "store-postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "store-postgres")))]
pub use store::{PostgresConnection, PostgresConnector};
