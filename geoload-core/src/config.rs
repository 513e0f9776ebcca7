//! Configuration consumed by the database backend.
//!
//! The mapping layer owns the tag-matching rules; this module only captures
//! the parts the backend needs: table layouts, generalizations and the
//! connection settings.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::ConfigError;

/// Default schema tables are imported into.
pub const DEFAULT_IMPORT_SCHEMA: &str = "import";
/// Default working SRID (web mercator).
pub const DEFAULT_SRID: i32 = 3857;

/// Connection and placement settings for the database backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DatabaseConfig {
    /// Connection string in URL (`postgis://…`) or key=value form.
    pub connection: String,
    /// Schema receiving the imported tables.
    #[serde(default = "default_import_schema")]
    pub import_schema: String,
    /// Spatial reference id of stored geometries.
    #[serde(default = "default_srid")]
    pub srid: i32,
}

impl DatabaseConfig {
    /// Settings with the default schema and SRID.
    #[must_use]
    pub fn new(connection: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            import_schema: default_import_schema(),
            srid: DEFAULT_SRID,
        }
    }
}

fn default_import_schema() -> String {
    DEFAULT_IMPORT_SCHEMA.to_owned()
}

const fn default_srid() -> i32 {
    DEFAULT_SRID
}

/// Kind of features a table receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    /// Point features.
    Point,
    /// Line features.
    Linestring,
    /// Polygon features.
    Polygon,
    /// Mixed geometries.
    Geometry,
    /// Members of matched relations.
    RelationMember,
    /// Relations without a geometry of their own.
    Relation,
}

impl TableKind {
    /// Geometry kind recorded on the table spec.
    ///
    /// Relation member tables hold arbitrary member geometries.
    #[must_use]
    pub const fn geometry_kind(self) -> &'static str {
        match self {
            Self::Point => "point",
            Self::Linestring => "linestring",
            Self::Polygon => "polygon",
            Self::Geometry | Self::RelationMember => "geometry",
            Self::Relation => "relation",
        }
    }
}

/// A single column declaration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ColumnConfig {
    /// Column name.
    pub name: String,
    /// Logical field kind assigned by the mapping layer, e.g. `id`.
    pub field: String,
    /// Logical value type looked up in the type registry, e.g. `int64`.
    #[serde(rename = "type")]
    pub value_type: String,
    /// Free-form arguments such as H3 `resolutions`.
    #[serde(default)]
    pub args: BTreeMap<String, JsonValue>,
}

impl ColumnConfig {
    /// Column without arguments.
    #[must_use]
    pub fn new(name: &str, field: &str, value_type: &str) -> Self {
        Self {
            name: name.to_owned(),
            field: field.to_owned(),
            value_type: value_type.to_owned(),
            args: BTreeMap::new(),
        }
    }

    /// Attach an argument.
    #[must_use]
    pub fn with_arg(mut self, key: &str, value: JsonValue) -> Self {
        self.args.insert(key.to_owned(), value);
        self
    }
}

/// A base table populated directly from matched features.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TableConfig {
    /// Feature kind.
    #[serde(rename = "type")]
    pub kind: TableKind,
    /// Ordered column declarations.
    pub columns: Vec<ColumnConfig>,
}

/// A table derived from a base or another generalized table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeneralizedTableConfig {
    /// Name of the base or generalized table to derive from.
    pub source: String,
    /// Simplification tolerance in SRID units.
    pub tolerance: f64,
    /// Optional SQL row filter.
    #[serde(default)]
    pub sql_filter: Option<String>,
}

/// Table layout handed over by the mapping layer.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MappingConfig {
    /// Base tables keyed by name.
    #[serde(default)]
    pub tables: BTreeMap<String, TableConfig>,
    /// Generalized tables keyed by name.
    #[serde(default)]
    pub generalized_tables: BTreeMap<String, GeneralizedTableConfig>,
}

impl MappingConfig {
    /// Parse a mapping from JSON text.
    ///
    /// # Examples
    ///
    /// ```
    /// use geoload_core::MappingConfig;
    ///
    /// let mapping = MappingConfig::from_json(r#"{
    ///     "tables": {
    ///         "roads": {
    ///             "type": "linestring",
    ///             "columns": [
    ///                 {"name": "osm_id", "field": "id", "type": "int64"},
    ///                 {"name": "geometry", "field": "geometry", "type": "geometry"}
    ///             ]
    ///         }
    ///     },
    ///     "generalized_tables": {
    ///         "roads_gen0": {"source": "roads", "tolerance": 50.0}
    ///     }
    /// }"#).expect("valid mapping");
    /// assert_eq!(mapping.tables.len(), 1);
    /// ```
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|err| ConfigError::Parse {
            message: err.to_string(),
        })
    }
}
