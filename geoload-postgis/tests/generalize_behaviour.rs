//! Behavioural tests for generalization, update replay and indexing.

use std::cell::RefCell;

use geoload_core::test_support::{chain_mapping, column, road, roads_mapping};
use geoload_core::{DatabaseConfig, MappingConfig, TableConfig, TableKind, TypeRegistry, Value};
use geoload_postgis::test_support::MemoryConnector;
use geoload_postgis::{DatabaseError, PostGis};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::json;

struct GeneralizeWorld {
    store: RefCell<MemoryConnector>,
    database: RefCell<Option<PostGis<MemoryConnector>>>,
    error: RefCell<Option<DatabaseError>>,
}

impl GeneralizeWorld {
    fn create(&self, mapping: &MappingConfig) {
        let db = PostGis::new(
            DatabaseConfig::new("postgis://localhost/osm"),
            mapping,
            &TypeRegistry::postgis(),
            self.store.borrow().clone(),
        )
        .expect("build database");
        self.database.replace(Some(db));
    }

    fn with_database<T>(&self, f: impl FnOnce(&mut PostGis<MemoryConnector>) -> T) -> T {
        let mut database = self.database.borrow_mut();
        f(database.as_mut().expect("database should be created first"))
    }

    fn record(&self, result: Result<(), DatabaseError>) {
        if let Err(err) = result {
            self.error.replace(Some(err));
        }
    }

    fn statements(&self) -> Vec<String> {
        self.store.borrow().statements()
    }

    fn reject(&self, pattern: &str) {
        self.store
            .replace_with(|store| store.clone().failing_on(pattern));
    }
}

#[fixture]
fn world() -> GeneralizeWorld {
    GeneralizeWorld {
        store: RefCell::new(MemoryConnector::new()),
        database: RefCell::new(None),
        error: RefCell::new(None),
    }
}

fn create_statement(table: &str) -> String {
    format!("CREATE TABLE \"import\".\"osm_{table}\" AS")
}

#[given("a roads database with a generalization chain of depth {depth}")]
fn given_chain(world: &GeneralizeWorld, depth: usize) {
    world.create(&chain_mapping(depth));
}

#[given("a buildings database indexed at H3 resolution {resolution}")]
fn given_h3(world: &GeneralizeWorld, resolution: u8) {
    let mut mapping = roads_mapping();
    mapping.tables.insert(
        "buildings".to_owned(),
        TableConfig {
            kind: TableKind::Polygon,
            columns: vec![
                column("osm_id", "id", "int64"),
                column("geometry", "geometry", "h3geometry")
                    .with_arg("resolutions", json!(resolution)),
            ],
        },
    );
    world.create(&mapping);
}

#[given("the store rejects creating {table}")]
fn given_rejected_create(world: &GeneralizeWorld, table: String) {
    world.reject(&format!("\"osm_{table}\" AS"));
}

#[given("the h3 extension is missing")]
fn given_missing_h3(world: &GeneralizeWorld) {
    world.reject("h3_ext_version");
}

#[given("generalized updates are tracked")]
fn given_tracking(world: &GeneralizeWorld) {
    world.with_database(|db| db.enable_generalize_updates());
}

#[when("the tables are generalized")]
fn when_generalized(world: &GeneralizeWorld) {
    let result = world.with_database(PostGis::generalize);
    world.record(result);
}

#[when("the tables are indexed")]
fn when_indexed(world: &GeneralizeWorld) {
    let result = world.with_database(|db| db.finish());
    world.record(result);
}

#[when("road {id} is written in a transactional run")]
fn when_written(world: &GeneralizeWorld, id: i64) {
    world.with_database(|db| {
        db.begin().expect("begin run");
        db.insert_line_string(id, &[road(id)]).expect("insert road");
    });
}

#[when("the generalized updates are replayed")]
fn when_replayed(world: &GeneralizeWorld) {
    world.with_database(|db| {
        db.generalize_updates().expect("replay updates");
        db.end().expect("end run");
    });
}

#[then("{first} is created before {second}")]
fn created_in_order(world: &GeneralizeWorld, first: String, second: String) {
    let statements = world.statements();
    let find = |table: &str| {
        let expected = create_statement(table);
        statements
            .iter()
            .position(|sql| sql.starts_with(&expected))
            .unwrap_or_else(|| panic!("{table} was never created"))
    };
    assert!(find(&first) < find(&second));
}

#[then("every generalized table is materialized")]
fn all_materialized(world: &GeneralizeWorld) {
    world.with_database(|db| {
        assert!(
            db.tables()
                .generalized_tables()
                .iter()
                .all(|table| table.is_materialized())
        );
    });
}

#[then("generalizing fails")]
fn generalizing_fails(world: &GeneralizeWorld) {
    assert!(matches!(
        world.error.borrow().as_ref(),
        Some(DatabaseError::Statement { .. })
    ));
}

#[then("{table} is never created")]
fn never_created(world: &GeneralizeWorld, table: String) {
    let expected = create_statement(&table);
    assert!(!world.statements().iter().any(|sql| sql.starts_with(&expected)));
}

#[then("road {id} is inserted into {first} and then {second}")]
fn replayed_in_order(world: &GeneralizeWorld, id: i64, first: String, second: String) {
    let store = world.store.borrow();
    let inserts = store.committed_sql("INSERT INTO \"import\".\"osm_roads_gen");
    let targets: Vec<_> = inserts
        .iter()
        .map(|sql| {
            if sql.contains(&format!("\"osm_{first}\"")) {
                first.as_str()
            } else if sql.contains(&format!("\"osm_{second}\"")) {
                second.as_str()
            } else {
                "other"
            }
        })
        .collect();
    assert_eq!(targets, vec![first.as_str(), second.as_str()]);
    assert_eq!(
        store.committed_params("INSERT INTO \"import\".\"osm_roads_gen"),
        vec![vec![Value::Int(id)], vec![Value::Int(id)]]
    );
}

#[then("indexing fails naming {table} and {column}")]
fn indexing_fails(world: &GeneralizeWorld, table: String, column: String) {
    let error = world.error.borrow();
    match error.as_ref() {
        Some(DatabaseError::ExtensionMissing {
            table: failed_table,
            column: failed_column,
            ..
        }) => {
            assert_eq!(failed_table, &table);
            assert_eq!(failed_column, &column);
        }
        other => panic!("expected a missing extension error, got {other:?}"),
    }
    assert!(world.store.borrow().committed_sql("CREATE INDEX").is_empty());
}

#[scenario(path = "tests/features/generalize.feature", index = 0)]
fn chained_generalizations(world: GeneralizeWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/generalize.feature", index = 1)]
fn failed_wave(world: GeneralizeWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/generalize.feature", index = 2)]
fn replayed_updates(world: GeneralizeWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/generalize.feature", index = 3)]
fn missing_h3_extension(world: GeneralizeWorld) {
    let _ = world;
}
