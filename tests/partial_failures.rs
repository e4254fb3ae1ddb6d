//! Repository behaviour when the storage fails or is raced halfway through an
//! operation.

mod common;

use std::convert::Infallible;
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use datapile::blob::MemoryBlobStore;
use datapile::prelude::*;
use datapile::refs::Event;
use datapile::repo::hybridstore::HybridStore;
use datapile::repo::memoryrepo::MemoryRefStore;
use datapile::repo::BlobStoreGet;
use datapile::repo::BlobStorePin;
use datapile::repo::BlobStorePut;
use datapile::repo::EventLog;
use datapile::repo::PinError;
use datapile::repo::PushResult;
use datapile::repo::RefStore;

use common::cities;
use common::cities_body;
use common::json_body;
use common::json_dataset;

fn ok<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}

/// Blob store whose pins always fail.
#[derive(Debug, Default)]
struct BrokenPins {
    blobs: MemoryBlobStore,
}

impl BlobStorePut for BrokenPins {
    type PutError = <MemoryBlobStore as BlobStorePut>::PutError;

    fn put(&self, name: &str, bytes: Bytes) -> Result<ContentKey, Self::PutError> {
        self.blobs.put(name, bytes)
    }
}

impl BlobStoreGet for BrokenPins {
    type GetError = <MemoryBlobStore as BlobStoreGet>::GetError;

    fn get(&self, key: &ContentKey) -> Result<Bytes, Self::GetError> {
        self.blobs.get(key)
    }
}

impl BlobStorePin for BrokenPins {
    type PinError = io::Error;

    fn pin(&self, _key: &ContentKey) -> Result<(), PinError<Self::PinError>> {
        Err(PinError::Store(io::Error::other("pin table full")))
    }
}

/// Reference index that lets a test interfere with writes.
#[derive(Debug, Default)]
struct MeddlingRefs {
    inner: MemoryRefStore,
    /// Move the reference to `stray` right after the next successful update.
    overtake_next_update: AtomicBool,
    /// Deletes of these names fail with an io error.
    failing_deletes: Vec<RefName>,
    /// These names are moved to `stray` just before they are deleted.
    racing_deletes: Vec<RefName>,
}

fn stray() -> ContentKey {
    ContentKey::digest(b"written by someone else")
}

impl RefStore for MeddlingRefs {
    type RefError = io::Error;

    fn get_ref(&self, name: &RefName) -> Result<Option<DatasetRef>, Self::RefError> {
        Ok(ok(self.inner.get_ref(name)))
    }

    fn update(
        &self,
        name: &RefName,
        old: Option<ContentKey>,
        new: ContentKey,
    ) -> Result<PushResult, Self::RefError> {
        let result = ok(self.inner.update(name, old, new));
        if matches!(result, PushResult::Success(_))
            && self.overtake_next_update.swap(false, Ordering::SeqCst)
        {
            ok(self.inner.update(name, Some(new), stray()));
        }
        Ok(result)
    }

    fn create(&self, name: &RefName, record: DatasetRef) -> Result<PushResult, Self::RefError> {
        Ok(ok(self.inner.create(name, record)))
    }

    fn delete(&self, name: &RefName, old: ContentKey) -> Result<PushResult, Self::RefError> {
        if self.failing_deletes.contains(name) {
            return Err(io::Error::other("index unavailable"));
        }
        if self.racing_deletes.contains(name) {
            if let Some(current) = ok(self.inner.get_ref(name)) {
                ok(self.inner.update(name, Some(current.path), stray()));
            }
        }
        Ok(ok(self.inner.delete(name, old)))
    }

    fn references(&self, limit: usize, offset: usize) -> Result<Vec<DatasetRef>, Self::RefError> {
        Ok(ok(self.inner.references(limit, offset)))
    }

    fn set_published(
        &self,
        name: &RefName,
        published: bool,
    ) -> Result<Option<DatasetRef>, Self::RefError> {
        Ok(ok(self.inner.set_published(name, published)))
    }
}

impl EventLog for MeddlingRefs {
    type EventError = io::Error;

    fn append_event(&self, event: Event) -> Result<(), Self::EventError> {
        Ok(ok(self.inner.append_event(event)))
    }

    fn events(&self, limit: usize, offset: usize) -> Result<Vec<Event>, Self::EventError> {
        Ok(ok(self.inner.events(limit, offset)))
    }
}

fn meddled(refs: MeddlingRefs) -> Repository<HybridStore<MemoryBlobStore, MeddlingRefs>> {
    common::init_tracing();
    Repository::new(HybridStore::new(MemoryBlobStore::new(), refs), "peer")
}

#[test]
fn failed_pin_still_logs_the_new_version() {
    common::init_tracing();
    let repo = Repository::new(
        HybridStore::new(BrokenPins::default(), MemoryRefStore::new()),
        "peer",
    );

    let err = repo
        .create_dataset("cities", cities(), Some(cities_body()), true)
        .unwrap_err();
    assert!(matches!(err, RepoError::Pin(_)));

    // the version landed, so its event must be there too
    let current = repo.get_ref("cities").unwrap();
    let events = repo.events(10, 0).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventType::Created);
    assert_eq!(events[0].path, Some(current.path));
}

#[test]
fn create_returns_the_version_it_wrote() {
    let repo = meddled(MeddlingRefs::default());
    let base = repo
        .create_dataset("cities", cities(), Some(cities_body()), false)
        .unwrap();

    repo.storage()
        .refs
        .overtake_next_update
        .store(true, Ordering::SeqCst);
    let ours = repo
        .create_dataset(
            "cities",
            json_dataset("second").with_previous(base.path),
            Some(json_body("[1]")),
            false,
        )
        .unwrap();

    assert_ne!(ours.path, stray());
    assert_eq!(repo.get_ref("cities").unwrap().path, stray());
    let saved = repo.read_dataset(&ours).unwrap();
    assert_eq!(saved.previous_path, Some(base.path));
    let events = repo.events(1, 0).unwrap();
    assert_eq!(events[0].kind, EventType::Updated);
    assert_eq!(events[0].path, Some(ours.path));
}

#[test]
fn rename_rolls_back_when_delete_fails() {
    let repo = meddled(MeddlingRefs {
        failing_deletes: vec![RefName::new("peer", "cities")],
        ..MeddlingRefs::default()
    });
    let r = repo
        .create_dataset("cities", cities(), Some(cities_body()), false)
        .unwrap();

    let err = repo.rename_dataset(&r, "towns").unwrap_err();
    assert!(matches!(err, RepoError::Refs(_)));
    assert!(matches!(
        repo.get_ref("towns"),
        Err(RepoError::RefNotFound(_))
    ));
    assert_eq!(repo.get_ref("cities").unwrap().path, r.path);
    assert_eq!(repo.list_datasets(10, 0, false, false).unwrap().len(), 1);
    assert_eq!(repo.events(1, 0).unwrap()[0].kind, EventType::Created);
}

#[test]
fn rename_rolls_back_when_source_moves() {
    let repo = meddled(MeddlingRefs {
        racing_deletes: vec![RefName::new("peer", "cities")],
        ..MeddlingRefs::default()
    });
    let r = repo
        .create_dataset("cities", cities(), Some(cities_body()), false)
        .unwrap();

    match repo.rename_dataset(&r, "towns").unwrap_err() {
        RepoError::VersionConflict {
            name,
            expected,
            actual,
        } => {
            assert_eq!(name, RefName::new("peer", "cities"));
            assert_eq!(expected, Some(r.path));
            assert_eq!(actual, Some(stray()));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(
        repo.get_ref("towns"),
        Err(RepoError::RefNotFound(_))
    ));
}

#[test]
fn rename_reports_a_rollback_that_lost_a_race() {
    let repo = meddled(MeddlingRefs {
        racing_deletes: vec![RefName::new("peer", "cities"), RefName::new("peer", "towns")],
        ..MeddlingRefs::default()
    });
    let r = repo
        .create_dataset("cities", cities(), Some(cities_body()), false)
        .unwrap();

    match repo.rename_dataset(&r, "towns").unwrap_err() {
        RepoError::VersionConflict { name, actual, .. } => {
            assert_eq!(name, RefName::new("peer", "towns"));
            assert_eq!(actual, Some(stray()));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(repo.get_ref("towns").unwrap().path, stray());
}

#[test]
fn rename_carries_publication_in_one_write() {
    let repo = meddled(MeddlingRefs::default());
    let r = repo
        .create_dataset("cities", cities(), Some(cities_body()), false)
        .unwrap();
    let r = repo.set_publish_status(&r, true).unwrap();

    let renamed = repo.rename_dataset(&r, "towns").unwrap();
    assert!(renamed.published);
    assert_eq!(repo.get_ref("towns").unwrap(), renamed);
}
