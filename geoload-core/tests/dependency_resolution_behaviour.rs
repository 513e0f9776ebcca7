//! Behavioural tests for resolving generalization chains.

use geoload_core::test_support::{chain_mapping, generalization, roads_mapping, settings};
use geoload_core::{ConfigError, MappingConfig, TableSet, TypeRegistry};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::cell::RefCell;

type Outcome = RefCell<Option<Result<TableSet, ConfigError>>>;

#[fixture]
fn mapping() -> RefCell<MappingConfig> {
    RefCell::new(MappingConfig::default())
}

#[fixture]
fn outcome() -> Outcome {
    RefCell::new(None)
}

fn built(outcome: &Outcome) -> TableSet {
    outcome
        .borrow()
        .clone()
        .expect("table set built")
        .expect("table set resolves")
}

fn failure(outcome: &Outcome) -> ConfigError {
    outcome
        .borrow()
        .clone()
        .expect("table set built")
        .expect_err("table set must be rejected")
}

#[given("a roads table with a generalization chain of depth {depth}")]
fn given_chain(#[from(mapping)] mapping: &RefCell<MappingConfig>, depth: usize) {
    *mapping.borrow_mut() = chain_mapping(depth);
}

#[given("a roads table with a generalization of rivers")]
fn given_dangling(#[from(mapping)] mapping: &RefCell<MappingConfig>) {
    let mut config = roads_mapping();
    config
        .generalized_tables
        .insert("rivers_gen0".into(), generalization("rivers", 10.0));
    *mapping.borrow_mut() = config;
}

#[given("a roads table with generalizations depending on each other")]
fn given_cycle(#[from(mapping)] mapping: &RefCell<MappingConfig>) {
    let mut config = roads_mapping();
    config
        .generalized_tables
        .insert("loop_a".into(), generalization("loop_b", 10.0));
    config
        .generalized_tables
        .insert("loop_b".into(), generalization("loop_a", 10.0));
    *mapping.borrow_mut() = config;
}

#[when("the table set is built")]
fn when_built(
    #[from(mapping)] mapping: &RefCell<MappingConfig>,
    #[from(outcome)] outcome: &Outcome,
) {
    let result = TableSet::build(&mapping.borrow(), &TypeRegistry::postgis(), &settings());
    *outcome.borrow_mut() = Some(result);
}

#[then("every generalized table resolves to roads")]
fn then_roots(#[from(outcome)] outcome: &Outcome) {
    let set = built(outcome);
    for id in set.generalized_ids() {
        assert_eq!(set.root(id).name, "roads");
    }
}

#[then("roads lists {count} generalizations")]
fn then_fan_out(#[from(outcome)] outcome: &Outcome, count: usize) {
    let set = built(outcome);
    let roads = set.table_id("roads").expect("roads table");
    assert_eq!(set.generalizations_of_table(roads).len(), count);
}

#[then("the materialization order runs from roads_gen0 to roads_gen2")]
fn then_order(#[from(outcome)] outcome: &Outcome) {
    let set = built(outcome);
    let order: Vec<_> = set
        .sorted_generalized()
        .into_iter()
        .map(|id| set.generalized(id).name.clone())
        .collect();
    assert_eq!(order, vec!["roads_gen0", "roads_gen1", "roads_gen2"]);
}

#[then("building fails with a missing source error")]
fn then_missing_source(#[from(outcome)] outcome: &Outcome) {
    assert!(matches!(
        failure(outcome),
        ConfigError::MissingSource { ref source_name, .. } if source_name == "rivers"
    ));
}

#[then("building fails with a cycle error naming loop_a and loop_b")]
fn then_cycle(#[from(outcome)] outcome: &Outcome) {
    assert_eq!(
        failure(outcome),
        ConfigError::CyclicGeneralization {
            tables: vec!["loop_a".into(), "loop_b".into()],
        }
    );
}

#[scenario(path = "tests/features/dependency_resolution.feature", index = 0)]
fn chains_resolve(mapping: RefCell<MappingConfig>, outcome: Outcome) {
    let _ = (mapping, outcome);
}

#[scenario(path = "tests/features/dependency_resolution.feature", index = 1)]
fn dangling_source_rejected(mapping: RefCell<MappingConfig>, outcome: Outcome) {
    let _ = (mapping, outcome);
}

#[scenario(path = "tests/features/dependency_resolution.feature", index = 2)]
fn cycles_rejected(mapping: RefCell<MappingConfig>, outcome: Outcome) {
    let _ = (mapping, outcome);
}
