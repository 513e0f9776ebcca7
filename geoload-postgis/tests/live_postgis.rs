//! End-to-end import against a real PostGIS database.
//!
//! Runs only when `GEOLOAD_TEST_DATABASE_URL` points at a database with the
//! PostGIS extension installed, for example
//! `postgis://postgres@localhost/geoload_test?prefix=live_`.

#![cfg(feature = "store-postgres")]

use geo::{Geometry, LineString};
use geoload_core::test_support::chain_mapping;
use geoload_core::{DatabaseConfig, Match, TypeRegistry, Value};
use geoload_postgis::PostGis;
use rstest::rstest;

const DATABASE_URL: &str = "GEOLOAD_TEST_DATABASE_URL";

fn road(id: i64, offset: f64) -> Match {
    let line = LineString::from(vec![(offset, 0.0), (offset + 100.0, 50.0), (offset + 200.0, 0.0)]);
    Match::new(
        "roads",
        vec![
            Value::Int(id),
            Value::Text(format!("road {id}")),
            Value::Text("primary".to_owned()),
            Value::geometry(&Geometry::LineString(line), 3857),
        ],
    )
}

#[rstest]
fn imports_generalizes_and_updates() {
    let Ok(url) = std::env::var(DATABASE_URL) else {
        return;
    };
    let mut db = PostGis::open(
        DatabaseConfig::new(url),
        &chain_mapping(2),
        &TypeRegistry::postgis(),
    )
    .expect("open database");

    db.init().expect("init");
    db.begin_bulk().expect("begin bulk run");
    for id in 1..=3 {
        let offset = f64::from(u8::try_from(id).expect("small id")) * 1000.0;
        db.insert_line_string(id, &[road(id, offset)]).expect("insert road");
    }
    db.end().expect("end bulk run");
    db.finish().expect("finish");
    db.generalize().expect("generalize");
    db.optimize().expect("optimize");

    db.enable_generalize_updates();
    db.begin().expect("begin update run");
    db.delete(2, &[road(2, 0.0)]).expect("delete road");
    db.insert_line_string(2, &[road(2, 5000.0)]).expect("reinsert road");
    db.generalize_updates().expect("replay updates");
    db.end().expect("end update run");
    db.close().expect("close");
}
