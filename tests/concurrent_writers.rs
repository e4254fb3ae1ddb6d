mod common;

use std::sync::Arc;

use datapile::prelude::*;
use datapile::repo::memoryrepo::MemoryRepo;
use datapile::repo::objectstore::ObjectStoreRemote;
use rayon::prelude::*;
use url::Url;

use common::cities;
use common::cities_body;
use common::json_body;
use common::json_dataset;

const WRITERS: usize = 16;

#[test]
fn one_writer_wins() {
    common::init_tracing();
    let repo = Arc::new(Repository::new(MemoryRepo::default(), "peer"));
    let base = repo
        .create_dataset("cities", cities(), Some(cities_body()), false)
        .unwrap();

    let results: Vec<_> = (0..WRITERS)
        .into_par_iter()
        .map(|i| {
            repo.create_dataset(
                "cities",
                json_dataset(&format!("writer {i}")).with_previous(base.path),
                Some(json_body(&format!("[{i}]"))),
                false,
            )
        })
        .collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.is_conflict()));

    let refs = repo.list_datasets(usize::MAX, 0, false, false).unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].path, winners[0].path);
}

#[test]
fn distinct_names_do_not_contend() {
    let repo = Repository::new(MemoryRepo::default(), "peer");
    (0..WRITERS).into_par_iter().for_each(|i| {
        repo.create_dataset(
            &format!("ds{i}"),
            json_dataset("initial commit"),
            Some(json_body(&format!("[{i}]"))),
            false,
        )
        .unwrap();
    });
    assert_eq!(
        repo.list_datasets(usize::MAX, 0, false, false).unwrap().len(),
        WRITERS
    );
}

#[test]
fn object_store_writers_race() {
    let url = Url::parse("memory:///race").unwrap();
    let repo = Repository::new(ObjectStoreRemote::with_url(&url).unwrap(), "peer");
    let base = repo
        .create_dataset("cities", cities(), Some(cities_body()), false)
        .unwrap();

    let wins = (0..WRITERS)
        .into_par_iter()
        .filter(|i| {
            repo.create_dataset(
                "cities",
                json_dataset(&format!("writer {i}")).with_previous(base.path),
                Some(json_body(&format!("[{i}]"))),
                false,
            )
            .is_ok()
        })
        .count();
    assert_eq!(wins, 1);
}
