#![allow(dead_code)]

use std::path::PathBuf;

use datapile::prelude::*;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn testdata(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("testdata")
        .join(name)
}

pub fn cities() -> Dataset {
    Dataset::new(
        Structure::new(DataFormat::Csv, base_schema_array()),
        Commit::new("initial commit"),
    )
    .with_meta(Meta::titled("example city data"))
}

pub fn cities_body() -> BodyFile {
    BodyFile::new(
        "body.csv",
        &b"city,pop,avg_age,in_usa\ntoronto,40000000,55.5,false\nnew york,8500000,44.4,true\n"[..],
    )
}

pub fn json_dataset(title: &str) -> Dataset {
    Dataset::new(
        Structure::new(DataFormat::Json, base_schema_array()),
        Commit::new(title),
    )
}

pub fn json_body(contents: &str) -> BodyFile {
    BodyFile::new("body.json", contents.as_bytes().to_vec())
}
