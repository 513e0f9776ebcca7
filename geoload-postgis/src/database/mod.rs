//! Import orchestration against a PostGIS database.
//!
//! [`PostGis`] owns the resolved [`TableSet`] and drives an import through
//! its phases: `init` creates the tables, `begin`/`begin_bulk` open a run that
//! the insert and delete entry points write through, `finish` builds indexes,
//! `generalize` materializes generalized tables wave by wave,
//! `generalize_updates` replays tracked ids after a diff import and
//! `optimize` clusters and analyses every table.

mod ddl;


use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use geoload_core::{
    ColumnSpec, DatabaseConfig, GeneralizedId, GeneralizedTableSpec, MappingConfig, Match,
    SchemaSettings, TableSet, TypeRegistry, Value,
};
use log::{debug, info, warn};

use crate::connection::parse_connection;
use crate::router::{RouterMode, TxRouter, lock};
use crate::step::Step;
use crate::store::{Connection, Connector, connect, run, scalar, transaction};
use crate::{DatabaseError, WorkerPool};

#[cfg(feature = "store-postgres")]
use crate::store::PostgresConnector;

/// Ids written per generalized table since tracking was enabled.
type UpdatedIds = BTreeMap<String, BTreeSet<i64>>;

/// Statements one pool task runs on its own connection.
struct Job {
    label: String,
    statements: Vec<String>,
}

impl Job {
    fn run<C: Connector>(self, connector: &C) -> Result<(), DatabaseError> {
        let _step = Step::start(self.label);
        let mut conn = connect(connector)?;
        for sql in &self.statements {
            run(&mut conn, sql)?;
        }
        Ok(())
    }
}

/// Statements materializing one generalized table.
struct GeneralizeJob {
    label: String,
    drop_sql: String,
    create_sql: String,
    populate_sql: String,
    indexes: Vec<String>,
}

impl GeneralizeJob {
    fn run<C: Connector>(self, connector: &C) -> Result<(), DatabaseError> {
        let _step = Step::start(self.label);
        let mut conn = connect(connector)?;
        transaction(&mut conn, |conn| {
            run(conn, &self.drop_sql)?;
            run(conn, &self.create_sql)?;
            let version = scalar(conn, ddl::POSTGIS_VERSION_PROBE)?;
            if ddl::needs_populate(version.as_deref()) {
                scalar(conn, &self.populate_sql)?;
            }
            Ok(())
        })?;
        for sql in &self.indexes {
            run(&mut conn, sql)?;
        }
        Ok(())
    }
}

/// PostGIS writer for one import.
///
/// Entry points that write rows take `&self`, so mapping workers can share a
/// single `PostGis` across threads while a run is open.
///
/// # Examples
///
/// ```
/// use geoload_core::{DatabaseConfig, Match, TypeRegistry, Value};
/// use geoload_core::test_support::chain_mapping;
/// use geoload_postgis::PostGis;
/// use geoload_postgis::test_support::MemoryConnector;
///
/// let store = MemoryConnector::new();
/// let mut db = PostGis::new(
///     DatabaseConfig::new("postgis://localhost/osm"),
///     &chain_mapping(1),
///     &TypeRegistry::postgis(),
///     store.clone(),
/// )
/// .unwrap();
///
/// db.init().unwrap();
/// db.begin_bulk().unwrap();
/// let row = vec![
///     Value::Int(1),
///     Value::Text("Main Street".into()),
///     Value::Text("primary".into()),
///     Value::Null,
/// ];
/// db.insert_line_string(1, &[Match::new("roads", row)]).unwrap();
/// db.end().unwrap();
/// db.finish().unwrap();
/// db.generalize().unwrap();
/// db.optimize().unwrap();
/// db.close().unwrap();
///
/// assert_eq!(store.committed_copy_rows("osm_roads").len(), 1);
/// assert_eq!(store.committed_sql("CREATE TABLE \"import\".\"osm_roads_gen0\" AS").len(), 1);
/// ```
pub struct PostGis<C: Connector> {
    connector: Arc<C>,
    config: DatabaseConfig,
    tables: TableSet,
    router: Option<TxRouter<C>>,
    tracking: Mutex<Option<UpdatedIds>>,
    indexed: AtomicBool,
}

impl<C: Connector> std::fmt::Debug for PostGis<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostGis")
            .field("schema", &self.config.import_schema)
            .field("srid", &self.config.srid)
            .field("tables", &self.tables.tables().len())
            .field("generalized_tables", &self.tables.generalized_tables().len())
            .field("run", &self.run_mode())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "store-postgres")]
impl PostGis<PostgresConnector> {
    /// Parse `config.connection`, build the table model and check that the
    /// database is reachable.
    pub fn open(
        config: DatabaseConfig,
        mapping: &MappingConfig,
        registry: &TypeRegistry,
    ) -> Result<Self, DatabaseError> {
        let params = parse_connection(&config.connection)?;
        let connector = PostgresConnector::from_params(&params.params).map_err(|err| {
            DatabaseError::ConnectionString {
                message: err.to_string(),
            }
        })?;
        let db = Self::new(config, mapping, registry, connector)?;
        connect(db.connector.as_ref())?;
        Ok(db)
    }
}

impl<C: Connector> PostGis<C> {
    /// Build the table model for `mapping` on top of `connector`.
    ///
    /// The table prefix comes from the `prefix` parameter of
    /// `config.connection`. Nothing is sent to the database.
    pub fn new(
        config: DatabaseConfig,
        mapping: &MappingConfig,
        registry: &TypeRegistry,
        connector: C,
    ) -> Result<Self, DatabaseError> {
        let params = parse_connection(&config.connection)?;
        let settings = SchemaSettings::new(&config.import_schema, &params.prefix, config.srid)?;
        let tables = TableSet::build(mapping, registry, &settings)?;
        debug!(
            "{} tables and {} generalized tables in schema {:?}",
            tables.tables().len(),
            tables.generalized_tables().len(),
            settings.schema
        );
        Ok(Self {
            connector: Arc::new(connector),
            config,
            tables,
            router: None,
            tracking: Mutex::new(None),
            indexed: AtomicBool::new(false),
        })
    }

    /// The resolved table model.
    #[must_use]
    pub const fn tables(&self) -> &TableSet {
        &self.tables
    }

    /// Transport of the open run, if any.
    #[must_use]
    pub fn run_mode(&self) -> Option<RouterMode> {
        self.router.as_ref().map(TxRouter::mode)
    }

    /// Create the import schema and (re)create every base table.
    pub fn init(&self) -> Result<(), DatabaseError> {
        let _step = Step::start("Creating tables");
        let mut conn = connect(self.connector.as_ref())?;
        self.create_schema(&mut conn)?;
        transaction(&mut conn, |conn| {
            for table in self.tables.tables() {
                run(conn, &ddl::drop_table(&table.schema, &table.full_name))?;
                run(conn, table.create_table_sql())?;
                if let Some(sql) = ddl::add_geometry_column(table) {
                    scalar(conn, &sql)?;
                }
            }
            Ok(())
        })
    }

    fn create_schema(&self, conn: &mut C::Connection) -> Result<(), DatabaseError> {
        let schema = &self.config.import_schema;
        if schema == "public" {
            return Ok(());
        }
        let exists = scalar(conn, &ddl::schema_exists(schema))?;
        if exists.as_deref() == Some("t") {
            return Ok(());
        }
        run(conn, &ddl::create_schema(schema))
    }

    /// Open a transactional run.
    pub fn begin(&mut self) -> Result<(), DatabaseError> {
        self.ensure_idle()?;
        self.router = Some(TxRouter::begin(Arc::clone(&self.connector), &self.tables)?);
        Ok(())
    }

    /// Open a bulk run.
    pub fn begin_bulk(&mut self) -> Result<(), DatabaseError> {
        self.ensure_idle()?;
        self.router = Some(TxRouter::begin_bulk(
            Arc::clone(&self.connector),
            &self.tables,
        )?);
        Ok(())
    }

    fn ensure_idle(&self) -> Result<(), DatabaseError> {
        if self.router.is_some() {
            return Err(DatabaseError::RunActive);
        }
        Ok(())
    }

    /// Commit the open run.
    pub fn end(&mut self) -> Result<(), DatabaseError> {
        self.router.take().ok_or(DatabaseError::NoActiveRun)?.end()
    }

    /// Roll back the open run.
    pub fn abort(&mut self) -> Result<(), DatabaseError> {
        self.router.take().ok_or(DatabaseError::NoActiveRun)?.abort()
    }

    /// Release the writer; an open run is rolled back.
    pub fn close(mut self) -> Result<(), DatabaseError> {
        if let Some(router) = self.router.take() {
            warn!("closing with an open run; rolling it back");
            router.abort()?;
        }
        Ok(())
    }

    /// Record ids written to line and polygon tables so
    /// [`generalize_updates`](Self::generalize_updates) can replay them.
    pub fn enable_generalize_updates(&self) {
        let mut tracking = lock(&self.tracking);
        if tracking.is_none() {
            *tracking = Some(UpdatedIds::new());
        }
    }

    /// Ids currently tracked for `generalized_table`, in ascending order.
    #[must_use]
    pub fn tracked_ids(&self, generalized_table: &str) -> Vec<i64> {
        lock(&self.tracking)
            .as_ref()
            .and_then(|updated| updated.get(generalized_table))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    fn router(&self) -> Result<&TxRouter<C>, DatabaseError> {
        self.router.as_ref().ok_or(DatabaseError::NoActiveRun)
    }

    fn insert_matches(&self, matches: &[Match]) -> Result<(), DatabaseError> {
        let router = self.router()?;
        for matched in matches {
            router.insert(&matched.table, &matched.row)?;
        }
        Ok(())
    }

    fn generalizations_of<'a>(
        &'a self,
        matches: &'a [Match],
    ) -> impl Iterator<Item = &'a GeneralizedTableSpec> + 'a {
        matches
            .iter()
            .filter_map(|matched| self.tables.table_id(&matched.table))
            .flat_map(|table| self.tables.generalizations_of_table(table))
            .map(|&id| self.tables.generalized(id))
    }

    fn track(&self, id: i64, matches: &[Match]) {
        let mut tracking = lock(&self.tracking);
        let Some(updated) = tracking.as_mut() else {
            return;
        };
        for generalized in self.generalizations_of(matches) {
            updated.entry(generalized.name.clone()).or_default().insert(id);
        }
    }

    fn tracking_enabled(&self) -> bool {
        lock(&self.tracking).is_some()
    }

    /// Write point rows.
    pub fn insert_point(&self, matches: &[Match]) -> Result<(), DatabaseError> {
        self.insert_matches(matches)
    }

    /// Write line rows for feature `id`.
    pub fn insert_line_string(&self, id: i64, matches: &[Match]) -> Result<(), DatabaseError> {
        self.insert_matches(matches)?;
        self.track(id, matches);
        Ok(())
    }

    /// Write polygon rows for feature `id`.
    pub fn insert_polygon(&self, id: i64, matches: &[Match]) -> Result<(), DatabaseError> {
        self.insert_matches(matches)?;
        self.track(id, matches);
        Ok(())
    }

    /// Write relation member rows.
    pub fn insert_relation_member(&self, matches: &[Match]) -> Result<(), DatabaseError> {
        self.insert_matches(matches)
    }

    /// Delete feature `id` from every matched table.
    ///
    /// With update tracking enabled the rows derived from those tables are
    /// deleted from their generalized tables as well.
    pub fn delete(&self, id: i64, matches: &[Match]) -> Result<(), DatabaseError> {
        let router = self.router()?;
        for matched in matches {
            router.delete(&matched.table, id)?;
        }
        if self.tracking_enabled() {
            for generalized in self.generalizations_of(matches) {
                router.delete(&generalized.name, id)?;
            }
        }
        Ok(())
    }

    /// Base tables plus generalized tables, each with the columns of its
    /// root table.
    ///
    /// With `materialized_only` set, generalized tables not yet created by
    /// [`generalize`](Self::generalize) are left out.
    fn physical_tables(&self, materialized_only: bool) -> Vec<(&str, &[ColumnSpec])> {
        let base = self
            .tables
            .tables()
            .iter()
            .map(|table| (table.full_name.as_str(), table.columns.as_slice()));
        let generalized = self
            .tables
            .generalized_ids()
            .filter(|&id| !materialized_only || self.tables.generalized(id).is_materialized())
            .map(|id| {
                (
                    self.tables.generalized(id).full_name.as_str(),
                    self.tables.root(id).columns.as_slice(),
                )
            });
        base.chain(generalized).collect()
    }

    fn run_jobs(&self, jobs: Vec<Job>) -> Result<(), DatabaseError> {
        let pool = WorkerPool::new(jobs.len());
        for job in jobs {
            let connector = Arc::clone(&self.connector);
            pool.submit(move || job.run(connector.as_ref()));
        }
        pool.wait()
    }

    fn probe_h3(&self, tables: &[(&str, &[ColumnSpec])]) -> Result<(), DatabaseError> {
        let Some((table, column)) = tables
            .iter()
            .find_map(|&(table, columns)| ddl::h3_column(columns).map(|column| (table, column)))
        else {
            return Ok(());
        };
        let mut conn = connect(self.connector.as_ref())?;
        debug!("{}", ddl::H3_PROBE);
        conn.query_scalar(ddl::H3_PROBE)
            .map_err(|source| DatabaseError::ExtensionMissing {
                extension: "h3",
                table: table.to_owned(),
                column: column.name.clone(),
                source,
            })?;
        Ok(())
    }

    /// Create the spatial, H3 and identifier indexes of every table.
    ///
    /// Generalized tables materialized afterwards are indexed by
    /// [`generalize`](Self::generalize).
    pub fn finish(&self) -> Result<(), DatabaseError> {
        let _step = Step::start("Creating geometry indices");
        let tables = self.physical_tables(true);
        let schema = &self.config.import_schema;
        let jobs = tables
            .iter()
            .map(|&(table, columns)| {
                Ok(Job {
                    label: format!("Creating indices on {table}"),
                    statements: ddl::index_statements(schema, table, columns, self.config.srid)?,
                })
            })
            .collect::<Result<Vec<_>, DatabaseError>>()?;
        self.probe_h3(&tables)?;
        self.run_jobs(jobs)?;
        self.indexed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn generalize_job(&self, id: GeneralizedId) -> Result<GeneralizeJob, DatabaseError> {
        let table = self.tables.generalized(id);
        let root = self.tables.root(id);
        let source = match table.source_generalized() {
            Some(parent) => &self.tables.generalized(parent).full_name,
            None => &root.full_name,
        };
        let indexes = if self.indexed.load(Ordering::SeqCst) {
            ddl::index_statements(
                &table.schema,
                &table.full_name,
                &root.columns,
                self.config.srid,
            )?
        } else {
            Vec::new()
        };
        Ok(GeneralizeJob {
            label: format!("Generalizing {source} into {}", table.full_name),
            drop_sql: ddl::drop_table(&table.schema, &table.full_name),
            create_sql: self.tables.materialize_sql(id),
            populate_sql: ddl::populate_geometry_columns(&table.schema, &table.full_name),
            indexes,
        })
    }

    /// Materialize every generalized table from its nearest ancestor.
    ///
    /// Tables run in dependency waves; a wave starts only after the previous
    /// one fully succeeded.
    pub fn generalize(&mut self) -> Result<(), DatabaseError> {
        let _step = Step::start("Creating generalized tables");
        self.tables.reset_materialization();
        let total = self.tables.generalized_tables().len();
        let done = Arc::new(AtomicUsize::new(0));
        loop {
            let wave = self.tables.ready_for_materialization();
            if wave.is_empty() {
                break;
            }
            let jobs = wave
                .iter()
                .map(|&id| self.generalize_job(id))
                .collect::<Result<Vec<_>, _>>()?;
            let pool: WorkerPool<DatabaseError> = WorkerPool::new(jobs.len());
            for job in jobs {
                let connector = Arc::clone(&self.connector);
                let counter = Arc::clone(&done);
                pool.submit(move || {
                    job.run(connector.as_ref())?;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
            }
            pool.wait()?;
            self.tables.mark_materialized(&wave);
            info!(
                "generalized {}/{total} tables",
                done.load(Ordering::SeqCst)
            );
        }
        Ok(())
    }

    /// Replay ids tracked since [`enable_generalize_updates`] into their
    /// generalized tables, parents before dependents.
    ///
    /// [`enable_generalize_updates`]: Self::enable_generalize_updates
    pub fn generalize_updates(&self) -> Result<(), DatabaseError> {
        let _step = Step::start("Updating generalized tables");
        let router = self.router()?;
        let mut pending = match lock(&self.tracking).as_mut() {
            Some(updated) => std::mem::take(updated),
            None => return Ok(()),
        };
        let result = self.replay(router, &mut pending);
        if result.is_err() {
            self.restore_tracked(pending);
        }
        result
    }

    /// Insert `pending` ids into their generalized tables, removing each id
    /// once it has been written.
    fn replay(
        &self,
        router: &TxRouter<C>,
        pending: &mut BTreeMap<String, BTreeSet<i64>>,
    ) -> Result<(), DatabaseError> {
        for table in self.tables.sorted_generalized() {
            let name = &self.tables.generalized(table).name;
            let Some(ids) = pending.get_mut(name) else {
                continue;
            };
            debug!("replaying {} ids into {name}", ids.len());
            while let Some(&id) = ids.first() {
                router.insert(name, &[Value::Int(id)])?;
                ids.remove(&id);
            }
            pending.remove(name);
        }
        Ok(())
    }

    /// Put ids a failed replay did not write back into the tracking map.
    fn restore_tracked(&self, pending: BTreeMap<String, BTreeSet<i64>>) {
        if let Some(updated) = lock(&self.tracking).as_mut() {
            for (name, ids) in pending {
                updated.entry(name).or_default().extend(ids);
            }
        }
    }

    /// Cluster every table with a geometry column on a geohash index and
    /// analyse it.
    pub fn optimize(&self) -> Result<(), DatabaseError> {
        let _step = Step::start("Clustering on geometry");
        let schema = &self.config.import_schema;
        let jobs = self
            .physical_tables(false)
            .into_iter()
            .map(|(table, columns)| Job {
                label: format!("Clustering {table}"),
                statements: ddl::optimize_statements(schema, table, columns, self.config.srid),
            })
            .collect();
        self.run_jobs(jobs)
    }
}
