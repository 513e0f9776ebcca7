//! Registry mapping logical value types to column types.

use std::collections::HashMap;

use crate::ColumnType;
use crate::ConfigError;
use crate::config::ColumnConfig;
use crate::resolutions::{ColumnContext, parse_resolutions};

/// Builds a column type for a concrete column declaration.
type Constructor = fn(&ColumnConfig, ColumnContext<'_>) -> Result<ColumnType, ConfigError>;

/// Lookup table from logical type names (`string`, `geometry`, …) to column
/// types.
///
/// Build it once at startup with [`TypeRegistry::postgis`] and pass it to
/// [`crate::TableSet::build`].
///
/// # Examples
///
/// ```
/// use geoload_core::{ColumnConfig, ColumnType, TypeRegistry};
///
/// let registry = TypeRegistry::postgis();
/// let column = ColumnConfig::new("name", "string", "string");
/// let column_type = registry.resolve("roads", &column).expect("known type");
/// assert_eq!(column_type, ColumnType::Scalar("VARCHAR"));
/// ```
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    constructors: HashMap<&'static str, Constructor>,
}

impl TypeRegistry {
    /// Registry without any types.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with the PostGIS column types.
    #[must_use]
    pub fn postgis() -> Self {
        let mut registry = Self::empty();
        registry.register("string", |_, _| Ok(ColumnType::Scalar("VARCHAR")));
        registry.register("bool", |_, _| Ok(ColumnType::Scalar("BOOL")));
        registry.register("int8", |_, _| Ok(ColumnType::Scalar("SMALLINT")));
        registry.register("int32", |_, _| Ok(ColumnType::Scalar("INT")));
        registry.register("int64", |_, _| Ok(ColumnType::Scalar("BIGINT")));
        registry.register("float32", |_, _| Ok(ColumnType::Scalar("REAL")));
        registry.register("hstore_string", |_, _| Ok(ColumnType::Scalar("HSTORE")));
        registry.register("geometry", |_, _| Ok(ColumnType::Geometry));
        registry.register("validated_geometry", |_, _| Ok(ColumnType::ValidatedGeometry));
        registry.register("h3geometry", |column, ctx| {
            let resolutions = parse_resolutions(column.args.get("resolutions"), ctx)?;
            Ok(ColumnType::H3Geometry { resolutions })
        });
        registry
    }

    /// Register (or replace) a logical type.
    pub fn register(&mut self, name: &'static str, constructor: Constructor) {
        self.constructors.insert(name, constructor);
    }

    /// Resolve the column type for `column` of `table`.
    pub fn resolve(&self, table: &str, column: &ColumnConfig) -> Result<ColumnType, ConfigError> {
        let constructor = self
            .constructors
            .get(column.value_type.as_str())
            .ok_or_else(|| ConfigError::UnknownColumnType {
                table: table.to_owned(),
                column: column.name.clone(),
                column_type: column.value_type.clone(),
            })?;
        constructor(
            column,
            ColumnContext {
                table,
                column: &column.name,
            },
        )
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::postgis()
    }
}
