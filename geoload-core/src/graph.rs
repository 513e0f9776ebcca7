//! Dependency model linking generalized tables to their sources.
//!
//! Specs live in two arenas addressed by [`TableId`] and [`GeneralizedId`].
//! Resolution binds every generalized table to its root base table, builds
//! the reverse edges used to fan changes out, and rejects cycles.

use std::collections::{HashMap, HashSet};

use crate::ConfigError;
use crate::config::MappingConfig;
use crate::ident::qualified;
use crate::registry::TypeRegistry;
use crate::schema::{GeneralizedTableSpec, Materialization, SchemaSettings, TableSpec};

/// Index of a base table within a [`TableSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(usize);

/// Index of a generalized table within a [`TableSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeneralizedId(usize);

/// Resolved base and generalized tables of an import.
#[derive(Debug, Clone)]
pub struct TableSet {
    tables: Vec<TableSpec>,
    generalized: Vec<GeneralizedTableSpec>,
    table_names: HashMap<String, TableId>,
    generalized_names: HashMap<String, GeneralizedId>,
}

impl TableSet {
    /// Build every spec from `mapping` and resolve their dependencies.
    ///
    /// # Examples
    ///
    /// ```
    /// use geoload_core::{MappingConfig, SchemaSettings, TableSet, TypeRegistry};
    ///
    /// let mapping = MappingConfig::from_json(r#"{
    ///     "tables": {"roads": {"type": "linestring", "columns": [
    ///         {"name": "osm_id", "field": "id", "type": "int64"},
    ///         {"name": "geometry", "field": "geometry", "type": "geometry"}
    ///     ]}},
    ///     "generalized_tables": {
    ///         "roads_gen0": {"source": "roads", "tolerance": 50.0},
    ///         "roads_gen1": {"source": "roads_gen0", "tolerance": 200.0}
    ///     }
    /// }"#).unwrap();
    /// let settings = SchemaSettings::new("import", "osm_", 3857).unwrap();
    /// let set = TableSet::build(&mapping, &TypeRegistry::postgis(), &settings).unwrap();
    ///
    /// let gen1 = set.generalized_id("roads_gen1").unwrap();
    /// assert_eq!(set.root(gen1).name, "roads");
    /// ```
    pub fn build(
        mapping: &MappingConfig,
        registry: &TypeRegistry,
        settings: &SchemaSettings,
    ) -> Result<Self, ConfigError> {
        let tables = mapping
            .tables
            .iter()
            .map(|(name, config)| TableSpec::new(name, config, settings, registry))
            .collect::<Result<Vec<_>, _>>()?;
        let generalized = mapping
            .generalized_tables
            .iter()
            .map(|(name, config)| GeneralizedTableSpec::new(name, config, settings))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_specs(tables, generalized)
    }

    /// Resolve dependencies between already built specs.
    pub fn from_specs(
        tables: Vec<TableSpec>,
        generalized: Vec<GeneralizedTableSpec>,
    ) -> Result<Self, ConfigError> {
        let mut table_names = HashMap::with_capacity(tables.len());
        for (index, table) in tables.iter().enumerate() {
            if table_names.insert(table.name.clone(), TableId(index)).is_some() {
                return Err(ConfigError::DuplicateTable {
                    name: table.name.clone(),
                });
            }
        }
        let mut generalized_names = HashMap::with_capacity(generalized.len());
        for (index, table) in generalized.iter().enumerate() {
            if table_names.contains_key(&table.name)
                || generalized_names
                    .insert(table.name.clone(), GeneralizedId(index))
                    .is_some()
            {
                return Err(ConfigError::DuplicateTable {
                    name: table.name.clone(),
                });
            }
        }

        let mut set = Self {
            tables,
            generalized,
            table_names,
            generalized_names,
        };
        set.bind_sources()?;
        set.propagate_roots()?;
        set.link_generalizations();
        set.render_templates();
        Ok(set)
    }

    fn bind_sources(&mut self) -> Result<(), ConfigError> {
        for table in &mut self.generalized {
            if let Some(&root) = self.table_names.get(&table.source_name) {
                table.source = Some(root);
            } else if let Some(&parent) = self.generalized_names.get(&table.source_name) {
                table.source_generalized = Some(parent);
            } else {
                return Err(ConfigError::MissingSource {
                    table: table.name.clone(),
                    source_name: table.source_name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Copy roots down generalization chains until every table has one.
    ///
    /// Each pass resolves at least one more level of every acyclic chain, so
    /// more passes than there are generalized tables, or a pass without
    /// progress, means the remaining tables hang off a cycle.
    fn propagate_roots(&mut self) -> Result<(), ConfigError> {
        for _ in 0..=self.generalized.len() {
            let mut unresolved = Vec::new();
            let mut progress = false;
            for index in 0..self.generalized.len() {
                if self.generalized[index].source.is_some() {
                    continue;
                }
                let inherited = self.generalized[index]
                    .source_generalized
                    .and_then(|parent| self.generalized[parent.0].source);
                match inherited {
                    Some(root) => {
                        self.generalized[index].source = Some(root);
                        progress = true;
                    }
                    None => unresolved.push(self.generalized[index].name.clone()),
                }
            }
            if unresolved.is_empty() {
                return Ok(());
            }
            if !progress {
                unresolved.sort();
                return Err(ConfigError::CyclicGeneralization { tables: unresolved });
            }
        }
        Err(ConfigError::CyclicGeneralization {
            tables: self.unresolved_names(),
        })
    }

    fn unresolved_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .generalized
            .iter()
            .filter(|table| table.source.is_none())
            .map(|table| table.name.clone())
            .collect();
        names.sort();
        names
    }

    fn link_generalizations(&mut self) {
        for index in 0..self.generalized.len() {
            let id = GeneralizedId(index);
            let table = &self.generalized[index];
            let (root, parent) = (table.source, table.source_generalized);
            if let Some(root) = root {
                self.tables[root.0].generalizations.push(id);
            }
            if let Some(parent) = parent {
                self.generalized[parent.0].generalizations.push(id);
            }
        }
    }

    fn render_templates(&mut self) {
        for table in &mut self.generalized {
            if let Some(root) = table.source {
                table.render_templates(&self.tables[root.0]);
            }
        }
    }

    /// Base tables in configuration order.
    #[must_use]
    pub fn tables(&self) -> &[TableSpec] {
        &self.tables
    }

    /// Generalized tables in configuration order.
    #[must_use]
    pub fn generalized_tables(&self) -> &[GeneralizedTableSpec] {
        &self.generalized
    }

    /// Ids of every generalized table.
    pub fn generalized_ids(&self) -> impl Iterator<Item = GeneralizedId> + '_ {
        (0..self.generalized.len()).map(GeneralizedId)
    }

    /// Look up a base table by name.
    #[must_use]
    pub fn table_id(&self, name: &str) -> Option<TableId> {
        self.table_names.get(name).copied()
    }

    /// Look up a generalized table by name.
    #[must_use]
    pub fn generalized_id(&self, name: &str) -> Option<GeneralizedId> {
        self.generalized_names.get(name).copied()
    }

    /// Base table by id.
    #[must_use]
    pub fn table(&self, id: TableId) -> &TableSpec {
        &self.tables[id.0]
    }

    /// Generalized table by id.
    #[must_use]
    pub fn generalized(&self, id: GeneralizedId) -> &GeneralizedTableSpec {
        &self.generalized[id.0]
    }

    /// Root base table of a generalized table.
    #[must_use]
    pub fn root(&self, id: GeneralizedId) -> &TableSpec {
        let root = self.generalized[id.0]
            .source
            .unwrap_or_else(|| unreachable!("roots are resolved when the set is built"));
        &self.tables[root.0]
    }

    /// Generalized tables derived (at any level) from a base table.
    #[must_use]
    pub fn generalizations_of_table(&self, id: TableId) -> &[GeneralizedId] {
        &self.tables[id.0].generalizations
    }

    /// Generalized tables ordered so that every table follows its source.
    #[must_use]
    pub fn sorted_generalized(&self) -> Vec<GeneralizedId> {
        let mut added = HashSet::with_capacity(self.generalized.len());
        let mut sorted = Vec::with_capacity(self.generalized.len());
        while sorted.len() < self.generalized.len() {
            let before = sorted.len();
            for id in self.generalized_ids() {
                if added.contains(&id) {
                    continue;
                }
                let ready = self.generalized[id.0]
                    .source_generalized
                    .is_none_or(|parent| added.contains(&parent));
                if ready {
                    added.insert(id);
                    sorted.push(id);
                }
            }
            if sorted.len() == before {
                break;
            }
        }
        sorted
    }

    /// Pending tables whose source is a base table or an already
    /// materialized generalized table.
    #[must_use]
    pub fn ready_for_materialization(&self) -> Vec<GeneralizedId> {
        self.generalized_ids()
            .filter(|id| {
                let table = &self.generalized[id.0];
                !table.is_materialized()
                    && table
                        .source_generalized
                        .is_none_or(|parent| self.generalized[parent.0].is_materialized())
            })
            .collect()
    }

    /// `CREATE TABLE … AS` statement materializing a generalized table from
    /// its nearest ancestor.
    #[must_use]
    pub fn materialize_sql(&self, id: GeneralizedId) -> String {
        let table = &self.generalized[id.0];
        let source = match table.source_generalized {
            Some(parent) => &self.generalized[parent.0].full_name,
            None => &self.root(id).full_name,
        };
        format!(
            "CREATE TABLE {} AS (SELECT {} FROM {}{})",
            table.qualified_name(),
            table.projection_sql(),
            qualified(&table.schema, source),
            table.where_clause()
        )
    }

    /// Reset every generalized table to [`Materialization::Pending`].
    pub fn reset_materialization(&mut self) {
        for table in &mut self.generalized {
            table.state = Materialization::Pending;
        }
    }

    /// Record that a completed wave created `ids`.
    pub fn mark_materialized(&mut self, ids: &[GeneralizedId]) {
        for id in ids {
            self.generalized[id.0].state = Materialization::Materialized;
        }
    }
}
