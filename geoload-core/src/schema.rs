//! Table definitions and the SQL templates derived from them.

use crate::ColumnType;
use crate::ConfigError;
use crate::config::{ColumnConfig, GeneralizedTableConfig, TableConfig};
use crate::graph::{GeneralizedId, TableId};
use crate::ident::{qualified, quote_ident, validate_identifier, validate_prefix};
use crate::registry::TypeRegistry;

/// Field kind marking the identifier column.
pub const ID_FIELD: &str = "id";
/// Name of the surrogate key added when no column is called `id`.
pub const SURROGATE_ID_COLUMN: &str = "id";

/// Placement shared by every table of an import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSettings {
    /// Schema receiving the tables.
    pub schema: String,
    /// Prefix prepended to every table name.
    pub prefix: String,
    /// Working SRID.
    pub srid: i32,
}

impl SchemaSettings {
    /// Validate schema and prefix.
    pub fn new(schema: &str, prefix: &str, srid: i32) -> Result<Self, ConfigError> {
        validate_identifier(schema)?;
        validate_prefix(prefix)?;
        Ok(Self {
            schema: schema.to_owned(),
            prefix: prefix.to_owned(),
            srid,
        })
    }

    fn full_name(&self, name: &str) -> Result<String, ConfigError> {
        let full_name = format!("{}{name}", self.prefix);
        validate_identifier(&full_name)?;
        Ok(full_name)
    }
}

/// A column of a base table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Logical field kind from the mapping layer.
    pub field: String,
    /// Storage type.
    pub column_type: ColumnType,
}

impl ColumnSpec {
    /// Build a column through the type registry.
    pub fn new(
        table: &str,
        column: &ColumnConfig,
        registry: &TypeRegistry,
    ) -> Result<Self, ConfigError> {
        validate_identifier(&column.name)?;
        Ok(Self {
            name: column.name.clone(),
            field: column.field.clone(),
            column_type: registry.resolve(table, column)?,
        })
    }

    /// Whether this is the identifier column.
    #[must_use]
    pub fn is_id(&self) -> bool {
        self.field == ID_FIELD
    }

    fn as_sql(&self) -> String {
        format!("{} {}", quote_ident(&self.name), self.column_type.name())
    }
}

/// A base table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSpec {
    /// Configured name, used for routing.
    pub name: String,
    /// Prefixed name used in the database.
    pub full_name: String,
    /// Schema holding the table.
    pub schema: String,
    /// Declared geometry kind (`point`, `linestring`, `polygon`, …).
    pub geometry_kind: &'static str,
    /// Spatial reference id of the geometry column.
    pub srid: i32,
    /// Ordered columns; row values follow this order.
    pub columns: Vec<ColumnSpec>,
    pub(crate) generalizations: Vec<GeneralizedId>,
    create_sql: String,
    insert_sql: String,
    copy_sql: String,
    delete_sql: Option<String>,
}

impl TableSpec {
    /// Build a base table and its statement templates.
    pub fn new(
        name: &str,
        config: &TableConfig,
        settings: &SchemaSettings,
        registry: &TypeRegistry,
    ) -> Result<Self, ConfigError> {
        let full_name = settings.full_name(name)?;
        let columns = config
            .columns
            .iter()
            .map(|column| ColumnSpec::new(name, column, registry))
            .collect::<Result<Vec<_>, _>>()?;

        let table = qualified(&settings.schema, &full_name);
        let create_sql = create_table_sql(&table, &columns);
        let insert_sql = insert_sql(&table, &columns);
        let copy_sql = copy_sql(&table, &columns);
        let delete_sql = columns
            .iter()
            .find(|column| column.is_id())
            .map(|id| format!("DELETE FROM {table} WHERE {} = $1", quote_ident(&id.name)));

        Ok(Self {
            name: name.to_owned(),
            full_name,
            schema: settings.schema.clone(),
            geometry_kind: config.kind.geometry_kind(),
            srid: settings.srid,
            columns,
            generalizations: Vec::new(),
            create_sql,
            insert_sql,
            copy_sql,
            delete_sql,
        })
    }

    /// `CREATE TABLE` statement; geometry columns are registered separately.
    #[must_use]
    pub fn create_table_sql(&self) -> &str {
        &self.create_sql
    }

    /// Parameterised `INSERT` statement, one placeholder per column.
    #[must_use]
    pub fn insert_sql(&self) -> &str {
        &self.insert_sql
    }

    /// `COPY … FROM STDIN` statement listing every column.
    #[must_use]
    pub fn copy_sql(&self) -> &str {
        &self.copy_sql
    }

    /// `DELETE` by identifier.
    pub fn delete_sql(&self) -> Result<&str, ConfigError> {
        self.delete_sql
            .as_deref()
            .ok_or_else(|| ConfigError::MissingIdColumn {
                table: self.name.clone(),
            })
    }

    /// The first geometry column, if any.
    #[must_use]
    pub fn geometry_column(&self) -> Option<&ColumnSpec> {
        self.columns
            .iter()
            .find(|column| column.column_type.is_geometry())
    }

    /// The identifier column, if any.
    #[must_use]
    pub fn id_column(&self) -> Option<&ColumnSpec> {
        self.columns.iter().find(|column| column.is_id())
    }

    /// Generalized tables whose root is this table, at every level.
    #[must_use]
    pub fn generalizations(&self) -> &[GeneralizedId] {
        &self.generalizations
    }

    /// Schema-qualified, quoted name.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        qualified(&self.schema, &self.full_name)
    }
}

fn create_table_sql(table: &str, columns: &[ColumnSpec]) -> String {
    let mut definitions = Vec::with_capacity(columns.len() + 1);
    if !columns
        .iter()
        .any(|column| column.name == SURROGATE_ID_COLUMN)
    {
        definitions.push(format!("{SURROGATE_ID_COLUMN} SERIAL PRIMARY KEY"));
    }
    definitions.extend(
        columns
            .iter()
            .filter(|column| !column.column_type.is_geometry())
            .map(ColumnSpec::as_sql),
    );
    format!(
        "CREATE TABLE IF NOT EXISTS {table} ({})",
        definitions.join(", ")
    )
}

fn column_list(columns: &[ColumnSpec]) -> String {
    columns
        .iter()
        .map(|column| quote_ident(&column.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn insert_sql(table: &str, columns: &[ColumnSpec]) -> String {
    let placeholders = columns
        .iter()
        .enumerate()
        .map(|(index, column)| column.column_type.placeholder_expr(index + 1))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders})",
        column_list(columns)
    )
}

fn copy_sql(table: &str, columns: &[ColumnSpec]) -> String {
    format!("COPY {table} ({}) FROM STDIN", column_list(columns))
}

/// Materialization state of a generalized table within the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Materialization {
    /// Not created during this run.
    #[default]
    Pending,
    /// Created by a completed generalization wave.
    Materialized,
}

/// A table derived from a base table or another generalized table.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneralizedTableSpec {
    /// Configured name, used for routing and update tracking.
    pub name: String,
    /// Prefixed name used in the database.
    pub full_name: String,
    /// Schema holding the table.
    pub schema: String,
    /// Configured source name.
    pub source_name: String,
    /// Simplification tolerance.
    pub tolerance: f64,
    /// Optional SQL row filter.
    pub sql_filter: Option<String>,
    pub(crate) source: Option<TableId>,
    pub(crate) source_generalized: Option<GeneralizedId>,
    pub(crate) generalizations: Vec<GeneralizedId>,
    pub(crate) state: Materialization,
    projection: String,
    insert_sql: Option<String>,
    delete_sql: Option<String>,
}

impl GeneralizedTableSpec {
    /// Build an unresolved generalized table.
    pub fn new(
        name: &str,
        config: &GeneralizedTableConfig,
        settings: &SchemaSettings,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            name: name.to_owned(),
            full_name: settings.full_name(name)?,
            schema: settings.schema.clone(),
            source_name: config.source.clone(),
            tolerance: config.tolerance,
            sql_filter: config
                .sql_filter
                .as_ref()
                .map(|filter| filter.trim().to_owned())
                .filter(|filter| !filter.is_empty()),
            source: None,
            source_generalized: None,
            generalizations: Vec::new(),
            state: Materialization::Pending,
            projection: String::new(),
            insert_sql: None,
            delete_sql: None,
        })
    }

    /// Root base table, once resolved.
    #[must_use]
    pub const fn source(&self) -> Option<TableId> {
        self.source
    }

    /// Generalized table this one is derived from, if any.
    #[must_use]
    pub const fn source_generalized(&self) -> Option<GeneralizedId> {
        self.source_generalized
    }

    /// Generalized tables derived directly from this one.
    #[must_use]
    pub fn generalizations(&self) -> &[GeneralizedId] {
        &self.generalizations
    }

    /// Materialization state within the current run.
    #[must_use]
    pub const fn state(&self) -> Materialization {
        self.state
    }

    /// Whether a completed wave created this table.
    #[must_use]
    pub fn is_materialized(&self) -> bool {
        self.state == Materialization::Materialized
    }

    /// Projection list selecting the root's columns into this table.
    #[must_use]
    pub fn projection_sql(&self) -> &str {
        &self.projection
    }

    /// Insert re-deriving a single row from the root table; `$1` is the id.
    pub fn insert_sql(&self) -> Result<&str, ConfigError> {
        self.insert_sql
            .as_deref()
            .ok_or_else(|| ConfigError::MissingIdColumn {
                table: self.name.clone(),
            })
    }

    /// `DELETE` by the root's identifier column.
    pub fn delete_sql(&self) -> Result<&str, ConfigError> {
        self.delete_sql
            .as_deref()
            .ok_or_else(|| ConfigError::MissingIdColumn {
                table: self.name.clone(),
            })
    }

    /// Filter clause appended to selections, including the leading keyword.
    #[must_use]
    pub fn where_clause(&self) -> String {
        self.sql_filter
            .as_ref()
            .map(|filter| format!(" WHERE {filter}"))
            .unwrap_or_default()
    }

    /// Schema-qualified, quoted name.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        qualified(&self.schema, &self.full_name)
    }

    /// Render the templates that depend on the resolved root.
    pub(crate) fn render_templates(&mut self, root: &TableSpec) {
        self.projection = root
            .columns
            .iter()
            .map(|column| column.column_type.projection_expr(&column.name, self, root))
            .collect::<Vec<_>>()
            .join(", ");

        let table = self.qualified_name();
        let Some(id) = root.id_column() else {
            self.insert_sql = None;
            self.delete_sql = None;
            return;
        };
        let id = quote_ident(&id.name);
        let mut filter = format!(" WHERE {id} = $1");
        if let Some(extra) = &self.sql_filter {
            filter.push_str(&format!(" AND ({extra})"));
        }
        self.insert_sql = Some(format!(
            "INSERT INTO {table} (SELECT {} FROM {}{filter})",
            self.projection,
            root.qualified_name()
        ));
        self.delete_sql = Some(format!("DELETE FROM {table} WHERE {id} = $1"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableKind;
    use crate::test_support::{column, polygon_table, roads_table, settings};
    use rstest::rstest;

    #[rstest]
    fn create_adds_surrogate_key_and_skips_geometry() {
        let table = roads_table();
        assert_eq!(
            table.create_table_sql(),
            "CREATE TABLE IF NOT EXISTS \"import\".\"osm_roads\" (id SERIAL PRIMARY KEY, \
             \"osm_id\" BIGINT, \"name\" VARCHAR, \"type\" VARCHAR)"
        );
    }

    #[rstest]
    fn create_keeps_configured_id_column() {
        let config = TableConfig {
            kind: TableKind::Point,
            columns: vec![column("id", "id", "int64"), column("geometry", "geometry", "geometry")],
        };
        let table = TableSpec::new("pois", &config, &settings(), &TypeRegistry::postgis())
            .expect("build table");
        assert_eq!(
            table.create_table_sql(),
            "CREATE TABLE IF NOT EXISTS \"import\".\"osm_pois\" (\"id\" BIGINT)"
        );
    }

    #[rstest]
    fn insert_uses_positional_placeholders() {
        let table = roads_table();
        assert_eq!(
            table.insert_sql(),
            "INSERT INTO \"import\".\"osm_roads\" (\"osm_id\", \"name\", \"type\", \"geometry\") \
             VALUES ($1, $2, $3, $4::Geometry)"
        );
    }

    #[rstest]
    fn copy_lists_every_column() {
        let table = roads_table();
        assert_eq!(
            table.copy_sql(),
            "COPY \"import\".\"osm_roads\" (\"osm_id\", \"name\", \"type\", \"geometry\") FROM STDIN"
        );
    }

    #[rstest]
    fn delete_targets_identifier_column() {
        let table = roads_table();
        assert_eq!(
            table.delete_sql(),
            Ok("DELETE FROM \"import\".\"osm_roads\" WHERE \"osm_id\" = $1")
        );
    }

    #[rstest]
    fn delete_requires_identifier_column() {
        let config = TableConfig {
            kind: TableKind::Polygon,
            columns: vec![column("geometry", "geometry", "geometry")],
        };
        let table = TableSpec::new("areas", &config, &settings(), &TypeRegistry::postgis())
            .expect("build table");
        assert_eq!(
            table.delete_sql(),
            Err(ConfigError::MissingIdColumn {
                table: "areas".into()
            })
        );
    }

    #[rstest]
    fn rejects_unsafe_column_names() {
        let config = TableConfig {
            kind: TableKind::Point,
            columns: vec![column("name\"; --", "string", "string")],
        };
        let err = TableSpec::new("pois", &config, &settings(), &TypeRegistry::postgis())
            .expect_err("unsafe column name");
        assert!(matches!(err, ConfigError::InvalidIdentifier { .. }));
    }

    #[rstest]
    fn geometry_and_id_columns_are_found() {
        let table = polygon_table();
        assert_eq!(table.geometry_column().map(|c| c.name.as_str()), Some("geometry"));
        assert_eq!(table.id_column().map(|c| c.name.as_str()), Some("osm_id"));
    }

    #[rstest]
    fn generalized_insert_filters_by_id_and_configured_filter() {
        let root = roads_table();
        let settings = settings();
        let mut generalized = GeneralizedTableSpec::new(
            "roads_gen0",
            &GeneralizedTableConfig {
                source: "roads".into(),
                tolerance: 50.0,
                sql_filter: Some("type IN ('motorway', 'trunk')".into()),
            },
            &settings,
        )
        .expect("build generalized table");
        generalized.render_templates(&root);

        assert_eq!(
            generalized.insert_sql(),
            Ok(
                "INSERT INTO \"import\".\"osm_roads_gen0\" (SELECT \"osm_id\", \"name\", \"type\", \
                 ST_SimplifyPreserveTopology(\"geometry\", 50.000000) as \"geometry\" \
                 FROM \"import\".\"osm_roads\" WHERE \"osm_id\" = $1 AND (type IN ('motorway', 'trunk')))"
            )
        );
        assert_eq!(
            generalized.delete_sql(),
            Ok("DELETE FROM \"import\".\"osm_roads_gen0\" WHERE \"osm_id\" = $1")
        );
        assert_eq!(
            generalized.where_clause(),
            " WHERE type IN ('motorway', 'trunk')"
        );
    }

    #[rstest]
    fn blank_filters_are_dropped() {
        let generalized = GeneralizedTableSpec::new(
            "roads_gen0",
            &GeneralizedTableConfig {
                source: "roads".into(),
                tolerance: 50.0,
                sql_filter: Some("   ".into()),
            },
            &settings(),
        )
        .expect("build generalized table");
        assert_eq!(generalized.sql_filter, None);
        assert_eq!(generalized.where_clause(), "");
    }
}
